//! The emulator runtime: façade, worker thread, update threads.
//!
//! `Runtime` owns the registry, the pipeline, the bus, the wheel and the
//! clock through a shared core struct that also implements the
//! [`CoreHandle`] objects call back into. `start` spawns the time-control
//! thread, the timer thread, the worker thread and one update thread per
//! updatable object; `stop` is cooperative and joins them all.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use emu_common::command::{CommandArgs, CommandId, Disposition};
use emu_common::consts::{DEFAULT_PACING_HZ, DEFAULT_TICK_WIDTH, OBJECT_ID_INVALID};
use emu_common::error::{CoreError, CoreResult, error_id};
use emu_common::events::{Event, EventKind, EventPayload};
use emu_common::klass::{Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectFactory, ObjectId};
use emu_common::state::ObjectState;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, EventHandler, Subscription};
use crate::clock::{Clock, RunState, TickStats, pin_to_cpu, time_control_loop};
use crate::pipeline::{CommandPipeline, CommandRecord, CompletionSink};
use crate::registry::{ObjectSlot, Registry};
use crate::ring::Completion;
use crate::cache::CacheBox;
use crate::timers::{TimerTarget, TimerWheel};

/// Worker and updater wait bound so `stop` is never missed.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Runtime construction parameters.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Pacing frequency of the time-control thread [Hz].
    pub pacing_hz: u64,
    /// Tick counter width [bits], 16–64.
    pub tick_width: u32,
    /// CPU to pin the time-control thread to.
    pub time_cpu: Option<usize>,
    /// Opt-in SCHED_FIFO priority for the time-control thread.
    pub rt_priority: Option<i32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pacing_hz: DEFAULT_PACING_HZ,
            tick_width: DEFAULT_TICK_WIDTH,
            time_cpu: None,
            rt_priority: None,
        }
    }
}

type HostCompletion = Arc<dyn Fn(CommandId, i32) + Send + Sync>;

/// Shared core: everything the threads and the object-side handle touch.
struct Shared {
    clock: Arc<Clock>,
    registry: Registry,
    pipeline: CommandPipeline,
    bus: EventBus,
    wheel: TimerWheel,
    host_completion: Mutex<Option<HostCompletion>>,
}

impl Shared {
    /// Invoke an object entry point under its slot lock and republish its
    /// snapshot. A panicking object is logged and contained; its next
    /// entry point re-enters normally.
    fn with_object<R>(
        &self,
        slot: &ObjectSlot,
        f: impl FnOnce(&mut dyn emu_common::object::SimObject, &dyn CoreHandle) -> R,
    ) -> Option<R> {
        let mutex = slot.object.as_ref()?;
        let mut object = mutex.lock();
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(object.as_mut(), self))) {
            Ok(result) => {
                slot.publish(object.as_ref());
                Some(result)
            }
            Err(_) => {
                error!(
                    target: "emu.core.runtime",
                    "{}/{} panicked in an entry point",
                    slot.klass,
                    slot.name
                );
                None
            }
        }
    }

    /// Route a finished command to its completion sink, recycling the
    /// record.
    fn finish(&self, record: CacheBox<CommandRecord>, result: i32) {
        let record = record.take();
        match record.sink {
            CompletionSink::Host => {
                let callback = self.host_completion.lock().clone();
                if let Some(callback) = callback {
                    let id = record.cmd.id;
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        callback(id, result)
                    }))
                    .is_err()
                    {
                        error!(target: "emu.core.runtime", "host completion callback panicked for {id}");
                    }
                }
            }
            CompletionSink::Object(origin) => {
                if let Some(slot) = self.registry.get(origin) {
                    self.with_object(&slot, |object, core| {
                        object.on_command_complete(record.cmd.id, result, core);
                    });
                }
            }
        }
    }

    /// One worker pass: pending commands, then events, then completions.
    fn drain(&self) {
        for record in self.pipeline.take_pending() {
            let Some(slot) = self.registry.get(record.cmd.target) else {
                self.finish(record, -libc::ENODEV);
                continue;
            };
            if slot.object.is_none() || !slot.capabilities.contains(Capabilities::EXEC_COMMAND) {
                self.finish(record, -libc::ENOTSUP);
                continue;
            }
            let outcome = self
                .with_object(&slot, |object, core| object.exec_command(&record.cmd, core))
                .unwrap_or(Err(-libc::ENODEV));
            match outcome {
                Ok(Disposition::Pending) => self.pipeline.mark_submitted(record),
                Ok(Disposition::Complete(result)) => self.finish(record, result),
                Err(errno) => self.finish(record, errno),
            }
        }

        for boxed in self.bus.drain() {
            let event: Event = *boxed;
            self.bus.deliver(&event, &mut |id, ev| {
                if let Some(slot) = self.registry.get(id) {
                    self.with_object(&slot, |object, core| object.on_event(ev, core));
                }
            });
        }

        for Completion { id, result } in self.pipeline.drain_completions() {
            if let Some(record) = self.pipeline.resolve(id) {
                self.finish(record, result);
            }
        }
    }
}

impl CoreHandle for Shared {
    fn lookup(&self, klass: Klass, name: &str) -> Option<ObjectId> {
        self.registry.lookup(klass, name)
    }

    fn list_objects(&self, klass: Klass) -> Vec<ObjectId> {
        self.registry.list(klass)
    }

    fn object_state(&self, id: ObjectId) -> Option<ObjectState> {
        self.registry.snapshot(id)
    }

    fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    fn runtime_ns(&self) -> u64 {
        self.clock.runtime_ns()
    }

    fn submit_command(
        &self,
        origin: ObjectId,
        target: ObjectId,
        args: CommandArgs,
    ) -> CoreResult<CommandId> {
        self.pipeline
            .submit(target, args, CompletionSink::Object(origin))
    }

    fn complete_command(&self, id: CommandId, result: i32) {
        self.pipeline.signal_completion(id, result);
    }

    fn submit_event(&self, kind: EventKind, origin: ObjectId, payload: EventPayload) {
        let Some(slot) = self.registry.get(origin) else {
            debug!(target: "emu.core.runtime", "event {kind:?} from unknown origin {origin} dropped");
            return;
        };
        self.bus.submit(Event {
            kind,
            origin,
            klass: slot.klass,
            payload,
        });
    }

    fn set_timer(&self, object: ObjectId, deadline_ticks: u64) -> u64 {
        self.wheel.register(TimerTarget::Object(object), deadline_ticks)
    }

    fn cancel_timer(&self, timer: u64) {
        self.wheel.unregister(timer);
    }
}

/// The host façade.
pub struct Runtime {
    shared: Arc<Shared>,
    config: RuntimeConfig,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let shared = Arc::new(Shared {
            clock: Arc::new(Clock::new(config.tick_width)),
            registry: Registry::new(),
            pipeline: CommandPipeline::new(),
            bus: EventBus::new(),
            wheel: TimerWheel::new(config.tick_width),
            host_completion: Mutex::new(None),
        });
        Self {
            shared,
            config,
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a klass factory (idempotent).
    pub fn register_klass(&self, klass: Klass, factory: ObjectFactory) {
        self.shared.registry.register_klass(klass, factory);
    }

    /// The object-side handle, mainly for tests and embedders.
    pub fn core_handle(&self) -> Arc<dyn CoreHandle> {
        Arc::clone(&self.shared) as Arc<dyn CoreHandle>
    }

    // ── Object management ──────────────────────────────────────────

    pub fn create_object(&self, klass: Klass, name: &str, config: &[u8]) -> CoreResult<ObjectId> {
        self.shared.registry.create(klass, name, config)
    }

    /// Raw-façade creation: validates the klass discriminant and maps
    /// every failure to [`OBJECT_ID_INVALID`].
    pub fn create_object_raw(&self, klass: u8, name: &str, config: &[u8]) -> u64 {
        let Some(klass) = Klass::from_u8(klass) else {
            warn!(target: "emu.core.runtime", "create_object: invalid klass {klass}");
            return OBJECT_ID_INVALID;
        };
        match self.create_object(klass, name, config) {
            Ok(id) => id.raw(),
            Err(e) => {
                warn!(target: "emu.core.runtime", "create_object {klass}/{name}: {e}");
                OBJECT_ID_INVALID
            }
        }
    }

    pub fn register_virtual_object(&self, klass: Klass, name: &str) -> CoreResult<ObjectId> {
        self.shared.registry.register_virtual(klass, name)
    }

    /// Run `init` on every object in registry order. The first failure
    /// fails the whole initialization; earlier inits are not rolled back.
    pub fn init_objects(&self) -> CoreResult<()> {
        let core: &dyn CoreHandle = self.shared.as_ref();
        for slot in self.shared.registry.all_slots() {
            if !slot.capabilities.contains(Capabilities::INIT) {
                continue;
            }
            let Some(mutex) = &slot.object else { continue };
            let mut object = mutex.lock();
            if let Err(e) = object.init(slot.id, core) {
                error!(target: "emu.core.runtime", "init of {}/{} failed: {e}", slot.klass, slot.name);
                return Err(CoreError::InitFailure {
                    object: format!("{}/{}", slot.klass, slot.name),
                    reason: e.to_string(),
                });
            }
            slot.publish(object.as_ref());
        }
        info!(target: "emu.core.runtime", "objects initialized");
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start the emulator at `tick_hz` controller ticks per second.
    /// `completion` fires once per completed host-submitted command.
    pub fn start(
        &self,
        tick_hz: u64,
        completion: impl Fn(CommandId, i32) + Send + Sync + 'static,
    ) -> CoreResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::Busy("runtime already started".into()));
        }
        if tick_hz == 0 {
            self.started.store(false, Ordering::SeqCst);
            return Err(CoreError::InvalidArgument("tick frequency must be non-zero".into()));
        }

        self.shared.clock.configure(tick_hz, self.config.pacing_hz);
        *self.shared.host_completion.lock() = Some(Arc::new(completion));
        self.shared.clock.set_run_state(RunState::Run);

        let result = self.spawn_threads();
        if let Err(e) = result {
            error!(target: "emu.core.runtime", "start failed: {e}, tearing down");
            self.shared.clock.set_run_state(RunState::Stop);
            self.shared.clock.trigger.pulse();
            for handle in self.threads.lock().drain(..) {
                let _ = handle.join();
            }
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(target: "emu.core.runtime", "started at {tick_hz} Hz");
        Ok(())
    }

    fn spawn_threads(&self) -> CoreResult<()> {
        let spawn_err =
            |e: std::io::Error| CoreError::Transient(format!("thread spawn failed: {e}"));
        let mut threads = self.threads.lock();

        let clock = Arc::clone(&self.shared.clock);
        let (cpu, prio) = (self.config.time_cpu, self.config.rt_priority);
        threads.push(
            std::thread::Builder::new()
                .name("emu-time".into())
                .spawn(move || time_control_loop(clock, cpu, prio))
                .map_err(spawn_err)?,
        );

        let shared = Arc::clone(&self.shared);
        threads.push(
            std::thread::Builder::new()
                .name("emu-timers".into())
                .spawn(move || timer_loop(shared))
                .map_err(spawn_err)?,
        );

        let shared = Arc::clone(&self.shared);
        threads.push(
            std::thread::Builder::new()
                .name("emu-worker".into())
                .spawn(move || worker_loop(shared))
                .map_err(spawn_err)?,
        );

        // One updater per updatable object, spread over CPUs >= 2 when
        // the machine has them.
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut nth = 0usize;
        for slot in self.shared.registry.all_slots() {
            if slot.object.is_none() || !slot.capabilities.contains(Capabilities::UPDATE) {
                continue;
            }
            let cpu = if cpus > 2 { Some(2 + nth % (cpus - 2)) } else { None };
            nth += 1;
            let shared = Arc::clone(&self.shared);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("emu-upd-{}", slot.name))
                    .spawn(move || update_loop(shared, slot, cpu))
                    .map_err(spawn_err)?,
            );
        }
        Ok(())
    }

    /// Cooperative shutdown; blocks until every thread has exited.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.clock.set_run_state(RunState::Stop);
        self.shared.clock.trigger.pulse();
        for handle in self.threads.lock().drain(..) {
            if let Err(e) = handle.join() {
                error!(target: "emu.core.runtime", "thread panicked: {e:?}");
            }
        }
        // Release auxiliary resources (pin monitors and friends).
        for slot in self.shared.registry.all_slots() {
            if slot.capabilities.contains(Capabilities::DESTROY) {
                self.shared.with_object(&slot, |object, _| object.destroy());
            }
        }
        info!(target: "emu.core.runtime", "stopped");
    }

    /// Freeze or resume tick publication.
    pub fn pause(&self, paused: bool) {
        match (paused, self.shared.clock.run_state()) {
            (true, RunState::Running) => self.shared.clock.set_run_state(RunState::Paused),
            (false, RunState::Paused) => self.shared.clock.set_run_state(RunState::Running),
            _ => {}
        }
    }

    /// Reset the given objects (all when `None`) under a paused clock.
    pub fn reset(&self, ids: Option<&[ObjectId]>) {
        let was_running = self.shared.clock.run_state() == RunState::Running;
        if was_running {
            self.pause(true);
        }
        let selected: Vec<Arc<ObjectSlot>> = match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.shared.registry.get(*id))
                .collect(),
            None => self.shared.registry.all_slots(),
        };
        for slot in selected {
            if slot.capabilities.contains(Capabilities::RESET) {
                self.shared.with_object(&slot, |object, core| object.reset(core));
            }
        }
        if was_running {
            self.pause(false);
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Typed submission with host completion.
    pub fn submit(&self, target: ObjectId, args: CommandArgs) -> CoreResult<CommandId> {
        self.shared.pipeline.submit(target, args, CompletionSink::Host)
    }

    /// Raw-façade submission: `(object id, subcommand, packed arg)`.
    /// Failures return the `0xDEADBEEF`-prefixed error id.
    pub fn exec_command(&self, object_id: u64, subcommand: u16, arg: u64) -> u64 {
        let id = ObjectId::new(object_id);
        let Some(slot) = self.shared.registry.get(id) else {
            return error_id(-libc::ENOENT);
        };
        let Some(args) = CommandArgs::decode(slot.klass, subcommand, arg) else {
            return error_id(-libc::EINVAL);
        };
        match self.submit(id, args) {
            Ok(cmd) => cmd.raw(),
            Err(e) => error_id(e.errno()),
        }
    }

    // ── Introspection ──────────────────────────────────────────────

    /// Published snapshots for the given ids; `None` per unknown or
    /// virtual object.
    pub fn get_status(&self, ids: &[ObjectId]) -> Vec<Option<ObjectState>> {
        ids.iter().map(|id| self.shared.registry.snapshot(*id)).collect()
    }

    pub fn get_clock_ticks(&self) -> u64 {
        self.shared.clock.ticks()
    }

    pub fn get_runtime(&self) -> u64 {
        self.shared.clock.runtime_ns()
    }

    /// Pacing statistics of the time-control thread.
    pub fn tick_stats(&self) -> TickStats {
        self.shared.clock.tick_stats()
    }

    pub fn lookup(&self, klass: Klass, name: &str) -> Option<ObjectId> {
        self.shared.registry.lookup(klass, name)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Subscribe a host callback to `kind` events from `klass` objects,
    /// optionally restricted to the object called `name`.
    pub fn event_register(
        &self,
        klass: Klass,
        kind: EventKind,
        name: Option<&str>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> CoreResult<()> {
        let source = self.resolve_source(klass, name)?;
        self.shared.bus.register(
            kind,
            Subscription {
                klass,
                source,
                handler: EventHandler::Host(Box::new(handler)),
            },
        );
        Ok(())
    }

    /// Subscribe an object's `on_event` entry point.
    pub fn event_register_object(
        &self,
        klass: Klass,
        kind: EventKind,
        name: Option<&str>,
        object: ObjectId,
    ) -> CoreResult<()> {
        let source = self.resolve_source(klass, name)?;
        self.shared.bus.register(
            kind,
            Subscription {
                klass,
                source,
                handler: EventHandler::Object(object),
            },
        );
        Ok(())
    }

    /// Remove subscriptions matching `(klass, kind, name)`.
    pub fn event_unregister(
        &self,
        klass: Klass,
        kind: EventKind,
        name: Option<&str>,
    ) -> CoreResult<()> {
        let source = self.resolve_source(klass, name)?;
        self.shared.bus.unregister(kind, klass, source);
        Ok(())
    }

    /// Host-produced event submission.
    pub fn event_submit(&self, kind: EventKind, origin: ObjectId, payload: EventPayload) {
        self.shared.submit_event(kind, origin, payload);
    }

    fn resolve_source(&self, klass: Klass, name: Option<&str>) -> CoreResult<Option<ObjectId>> {
        match name {
            None => Ok(None),
            Some(name) => self
                .shared
                .registry
                .lookup(klass, name)
                .map(Some)
                .ok_or_else(|| CoreError::NotFound(format!("{klass}/{name}"))),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut generation = shared.clock.trigger.generation();
    debug!(target: "emu.core.runtime", "worker running");
    loop {
        if shared.clock.run_state() == RunState::Stop {
            // Final drain flushes in-flight completions.
            shared.drain();
            break;
        }
        generation = shared.clock.trigger.wait_timeout(generation, WAIT_SLICE);
        shared.drain();
    }
    debug!(target: "emu.core.runtime", "worker exiting");
}

fn timer_loop(shared: Arc<Shared>) {
    let mut generation = shared.clock.trigger.generation();
    loop {
        match shared.clock.run_state() {
            RunState::Stop => break,
            RunState::Running => {
                let now = shared.clock.ticks();
                shared.wheel.run_due(now, &mut |id, tick| {
                    let Some(slot) = shared.registry.get(id) else {
                        return 0;
                    };
                    shared
                        .with_object(&slot, |object, core| object.on_timer(tick, core))
                        .unwrap_or(0)
                });
            }
            _ => {}
        }
        generation = shared.clock.trigger.wait_timeout(generation, WAIT_SLICE);
    }
}

fn update_loop(shared: Arc<Shared>, slot: Arc<ObjectSlot>, cpu: Option<usize>) {
    if let Some(cpu) = cpu {
        pin_to_cpu(cpu);
    }
    let period = Duration::from_nanos((1e9 / slot.update_hz.max(1.0)) as u64);
    let mut generation = shared.clock.trigger.generation();
    debug!(target: "emu.core.runtime", "updater for {}/{} running", slot.klass, slot.name);
    loop {
        match shared.clock.run_state() {
            RunState::Stop => break,
            RunState::Run | RunState::Paused => {
                generation = shared.clock.trigger.wait_timeout(generation, WAIT_SLICE);
                continue;
            }
            RunState::Running => {}
        }
        generation = shared.clock.trigger.wait_timeout(generation, WAIT_SLICE);
        if shared.clock.run_state() != RunState::Running {
            continue;
        }
        let ticks = shared.clock.ticks();
        let runtime_ns = shared.clock.runtime_ns();
        shared.with_object(&slot, |object, core| object.update(ticks, runtime_ns, core));
        std::thread::sleep(period);
    }
}
