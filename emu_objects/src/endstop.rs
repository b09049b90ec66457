//! Endstop: level inferred from the guarded axis position, edge events.
//!
//! The first observation primes the level without emitting, so a machine
//! that wakes up parked on a switch does not produce a spurious trigger.

use emu_common::config::{self, EndstopConfig};
use emu_common::consts::DEFAULT_UPDATE_HZ;
use emu_common::error::{CoreError, CoreResult};
use emu_common::events::{EventKind, EventPayload};
use emu_common::klass::{Capabilities, EndstopKind, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{EndstopSnapshot, ObjectState};
use tracing::trace;

/// The endstop object.
pub struct Endstop {
    name: String,
    id: ObjectId,
    config: EndstopConfig,
    axis: ObjectId,
    /// `None` until the first sample primes the level.
    level: Option<bool>,
    update_hz: f64,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: EndstopConfig = config::decode(blob)?;
    let update_hz = cfg.update_frequency.unwrap_or(DEFAULT_UPDATE_HZ);
    Ok(Box::new(Endstop {
        name: name.to_string(),
        id: ObjectId::INVALID,
        config: cfg,
        axis: ObjectId::INVALID,
        level: None,
        update_hz,
    }))
}

impl Endstop {
    fn level_for(&self, position: f64, length: f64) -> bool {
        match self.config.kind {
            EndstopKind::Min => position <= 0.0,
            EndstopKind::Max => position >= length,
        }
    }
}

impl SimObject for Endstop {
    fn klass(&self) -> Klass {
        Klass::Endstop
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BASE
    }

    fn update_frequency(&self) -> f64 {
        self.update_hz
    }

    fn init(&mut self, id: ObjectId, core: &dyn CoreHandle) -> CoreResult<()> {
        self.id = id;
        self.axis = core
            .lookup(Klass::Axis, &self.config.axis)
            .ok_or_else(|| CoreError::NotFound(format!("axis/{}", self.config.axis)))?;
        Ok(())
    }

    fn reset(&mut self, _core: &dyn CoreHandle) {
        self.level = None;
    }

    fn update(&mut self, _ticks: u64, _runtime_ns: u64, core: &dyn CoreHandle) {
        let Some(ObjectState::Axis(axis)) = core.object_state(self.axis) else {
            return;
        };
        let level = self.level_for(axis.position, axis.length);
        match self.level.replace(level) {
            None => {} // primed, no edge
            Some(prev) if prev != level => {
                trace!(target: "emu.objects.endstop", "{}: {prev} -> {level}", self.name);
                core.submit_event(
                    EventKind::EndstopTrigger,
                    self.id,
                    EventPayload::Level(level),
                );
            }
            Some(_) => {}
        }
    }

    fn state(&self) -> ObjectState {
        ObjectState::Endstop(EndstopSnapshot {
            kind: self.config.kind,
            triggered: self.level.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingCore;
    use emu_common::klass::AxisType;
    use emu_common::state::AxisSnapshot;

    fn axis_state(position: f64) -> ObjectState {
        ObjectState::Axis(AxisSnapshot {
            axis_type: AxisType::X,
            position,
            length: 200.0,
            homed: false,
        })
    }

    fn min_endstop(core: &RecordingCore) -> Box<dyn SimObject> {
        core.insert_object(1, Klass::Axis, "x", axis_state(100.0));
        let mut es = factory("es_x", br#"{"axis": "x"}"#).unwrap();
        es.init(ObjectId::new(2), core).unwrap();
        es
    }

    #[test]
    fn first_sample_primes_without_event() {
        let core = RecordingCore::new();
        core.insert_object(1, Klass::Axis, "x", axis_state(0.0));
        let mut es = factory("es_x", br#"{"axis": "x"}"#).unwrap();
        es.init(ObjectId::new(2), &core).unwrap();
        es.update(0, 0, &core);
        // Parked on the switch at boot: level true, no event.
        let ObjectState::Endstop(snap) = es.state() else { unreachable!() };
        assert!(snap.triggered);
        assert!(core.events.lock().is_empty());
    }

    #[test]
    fn edge_emits_exactly_once() {
        let core = RecordingCore::new();
        let mut es = min_endstop(&core);
        let axis = ObjectId::new(1);

        es.update(0, 0, &core); // primes at 100 mm, not triggered
        core.set_state(axis, axis_state(50.0));
        es.update(0, 1, &core);
        assert!(core.events.lock().is_empty());

        core.set_state(axis, axis_state(0.0));
        es.update(0, 2, &core);
        es.update(0, 3, &core); // still at 0: no re-trigger
        let events = core.events_of(EventKind::EndstopTrigger);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, EventPayload::Level(true));

        // Leaving the switch emits the falling edge.
        core.set_state(axis, axis_state(10.0));
        es.update(0, 4, &core);
        let events = core.events_of(EventKind::EndstopTrigger);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload, EventPayload::Level(false));
    }

    #[test]
    fn max_endstop_triggers_at_length() {
        let core = RecordingCore::new();
        core.insert_object(1, Klass::Axis, "x", axis_state(100.0));
        let mut es = factory("es_x", br#"{"axis": "x", "kind": "max"}"#).unwrap();
        es.init(ObjectId::new(2), &core).unwrap();
        es.update(0, 0, &core);
        core.set_state(ObjectId::new(1), axis_state(200.0));
        es.update(0, 1, &core);
        let ObjectState::Endstop(snap) = es.state() else { unreachable!() };
        assert!(snap.triggered);
        assert_eq!(core.events_of(EventKind::EndstopTrigger).len(), 1);
    }

    #[test]
    fn missing_axis_fails_init() {
        let core = RecordingCore::new();
        let mut es = factory("es_x", br#"{"axis": "ghost"}"#).unwrap();
        assert!(matches!(
            es.init(ObjectId::new(2), &core),
            Err(CoreError::NotFound(_))
        ));
    }
}
