//! Recording `CoreHandle` for driving objects in unit tests with a
//! synthetic clock and captured effects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use emu_common::command::{CommandArgs, CommandId};
use emu_common::error::CoreResult;
use emu_common::events::{Event, EventKind, EventPayload};
use emu_common::klass::Klass;
use emu_common::object::{CoreHandle, ObjectId};
use emu_common::state::ObjectState;
use parking_lot::Mutex;

#[derive(Default)]
pub struct RecordingCore {
    states: Mutex<HashMap<ObjectId, ObjectState>>,
    klasses: Mutex<HashMap<ObjectId, Klass>>,
    names: Mutex<HashMap<(Klass, String), ObjectId>>,
    pub completions: Mutex<Vec<(u64, i32)>>,
    pub events: Mutex<Vec<Event>>,
    pub commands: Mutex<Vec<(ObjectId, ObjectId, CommandArgs)>>,
    pub timers: Mutex<Vec<(ObjectId, u64)>>,
    now_ticks: AtomicU64,
    now_ns: AtomicU64,
    next_cmd: AtomicU64,
}

impl RecordingCore {
    pub fn new() -> Self {
        Self {
            next_cmd: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn insert_object(&self, id: u64, klass: Klass, name: &str, state: ObjectState) -> ObjectId {
        let id = ObjectId::new(id);
        self.states.lock().insert(id, state);
        self.klasses.lock().insert(id, klass);
        self.names.lock().insert((klass, name.to_string()), id);
        id
    }

    pub fn set_state(&self, id: ObjectId, state: ObjectState) {
        self.states.lock().insert(id, state);
    }

    pub fn advance(&self, ticks: u64, ns: u64) {
        self.now_ticks.store(ticks, Ordering::Release);
        self.now_ns.store(ns, Ordering::Release);
    }

    pub fn completion_for(&self, id: CommandId) -> Option<i32> {
        self.completions
            .lock()
            .iter()
            .find(|(raw, _)| *raw == id.raw())
            .map(|(_, result)| *result)
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .copied()
            .collect()
    }
}

impl CoreHandle for RecordingCore {
    fn lookup(&self, klass: Klass, name: &str) -> Option<ObjectId> {
        self.names.lock().get(&(klass, name.to_string())).copied()
    }

    fn list_objects(&self, klass: Klass) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .klasses
            .lock()
            .iter()
            .filter(|(_, k)| **k == klass)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn object_state(&self, id: ObjectId) -> Option<ObjectState> {
        self.states.lock().get(&id).copied()
    }

    fn ticks(&self) -> u64 {
        self.now_ticks.load(Ordering::Acquire)
    }

    fn runtime_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    fn submit_command(
        &self,
        origin: ObjectId,
        target: ObjectId,
        args: CommandArgs,
    ) -> CoreResult<CommandId> {
        self.commands.lock().push((origin, target, args));
        Ok(CommandId::new(self.next_cmd.fetch_add(1, Ordering::Relaxed)))
    }

    fn complete_command(&self, id: CommandId, result: i32) {
        self.completions.lock().push((id.raw(), result));
    }

    fn submit_event(&self, kind: EventKind, origin: ObjectId, payload: EventPayload) {
        let klass = self
            .klasses
            .lock()
            .get(&origin)
            .copied()
            .unwrap_or(Klass::DigitalPin);
        self.events.lock().push(Event {
            kind,
            origin,
            klass,
            payload,
        });
    }

    fn set_timer(&self, object: ObjectId, deadline_ticks: u64) -> u64 {
        let mut timers = self.timers.lock();
        timers.push((object, deadline_ticks));
        timers.len() as u64
    }

    fn cancel_timer(&self, _timer: u64) {}
}
