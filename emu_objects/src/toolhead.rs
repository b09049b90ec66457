//! Toolhead: composes the kinematics map over the machine's axes and
//! reports the cartesian position.
//!
//! Binds every AXIS object at init by matching axis types. The origin
//! event is one-shot per transit: it fires when all bound axes reach 0
//! and re-arms only after one of them leaves.

use emu_common::config::{self, ToolheadConfig};
use emu_common::consts::{DEFAULT_UPDATE_HZ, MAX_TOOLHEAD_AXES, PRECISION};
use emu_common::error::{CoreError, CoreResult};
use emu_common::events::{EventKind, EventPayload};
use emu_common::klass::{AxisType, Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{ObjectState, Position, ToolheadSnapshot};
use tracing::debug;

use crate::kinematics::Kinematics;

#[derive(Debug, Clone, Copy)]
struct AxisBinding {
    axis_type: AxisType,
    id: ObjectId,
}

/// The toolhead object.
pub struct Toolhead {
    name: String,
    id: ObjectId,
    kinematics: Kinematics,
    bindings: heapless::Vec<AxisBinding, MAX_TOOLHEAD_AXES>,
    position: Position,
    at_origin: bool,
    origin_emitted: bool,
    update_hz: f64,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: ToolheadConfig = config::decode(blob)?;
    Ok(Box::new(Toolhead {
        name: name.to_string(),
        id: ObjectId::INVALID,
        kinematics: Kinematics::from_config(&cfg.kinematics),
        bindings: heapless::Vec::new(),
        position: Position::default(),
        at_origin: false,
        origin_emitted: false,
        update_hz: cfg.update_frequency.unwrap_or(DEFAULT_UPDATE_HZ),
    }))
}

impl Toolhead {
    /// Tracked position of the axis bound to `axis_type`, if any.
    fn axis_position(&self, core: &dyn CoreHandle, axis_type: AxisType) -> Option<f64> {
        let binding = self.bindings.iter().find(|b| b.axis_type == axis_type)?;
        match core.object_state(binding.id)? {
            ObjectState::Axis(a) => Some(a.position),
            _ => None,
        }
    }
}

impl SimObject for Toolhead {
    fn klass(&self) -> Klass {
        Klass::Toolhead
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
        self.bindings.clear();
        for axis_id in core.list_objects(Klass::Axis) {
            let Some(ObjectState::Axis(axis)) = core.object_state(axis_id) else {
                continue;
            };
            self.bindings
                .push(AxisBinding {
                    axis_type: axis.axis_type,
                    id: axis_id,
                })
                .map_err(|_| {
                    CoreError::InvalidArgument(format!(
                        "toolhead {} exceeds {MAX_TOOLHEAD_AXES} axes",
                        self.name
                    ))
                })?;
        }
        if self.bindings.is_empty() {
            return Err(CoreError::NotFound(format!(
                "toolhead {} found no axes",
                self.name
            )));
        }
        debug!(
            target: "emu.objects.toolhead",
            "{}: bound {} axes",
            self.name,
            self.bindings.len()
        );
        Ok(())
    }

    fn reset(&mut self, _core: &dyn CoreHandle) {
        self.position = Position::default();
        self.at_origin = false;
        self.origin_emitted = false;
    }

    fn update(&mut self, _ticks: u64, _runtime_ns: u64, core: &dyn CoreHandle) {
        let x = self.axis_position(core, AxisType::X).unwrap_or(0.0);
        let y = self.axis_position(core, AxisType::Y).unwrap_or(0.0);
        let z = self.axis_position(core, AxisType::Z).unwrap_or(0.0);
        self.position = self.kinematics.toolhead_position([x, y, z]).rounded(PRECISION);

        // Origin detection runs on the axes' own positions.
        let band = 10f64.powi(-PRECISION);
        let mut all_at_zero = true;
        for binding in &self.bindings {
            if let Some(ObjectState::Axis(axis)) = core.object_state(binding.id) {
                if axis.position.abs() >= band {
                    all_at_zero = false;
                }
            }
        }
        self.at_origin = all_at_zero;

        if all_at_zero && !self.origin_emitted {
            self.origin_emitted = true;
            debug!(target: "emu.objects.toolhead", "{}: at origin", self.name);
            core.submit_event(
                EventKind::ToolheadOrigin,
                self.id,
                EventPayload::Position(self.position),
            );
        } else if !all_at_zero {
            self.origin_emitted = false;
        }
    }

    fn state(&self) -> ObjectState {
        ObjectState::Toolhead(ToolheadSnapshot {
            position: self.position,
            at_origin: self.at_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingCore;
    use emu_common::state::AxisSnapshot;

    fn axis_state(axis_type: AxisType, position: f64) -> ObjectState {
        ObjectState::Axis(AxisSnapshot {
            axis_type,
            position,
            length: 200.0,
            homed: false,
        })
    }

    fn world(core: &RecordingCore) -> (ObjectId, ObjectId, ObjectId) {
        let x = core.insert_object(1, Klass::Axis, "x", axis_state(AxisType::X, 10.0));
        let y = core.insert_object(2, Klass::Axis, "y", axis_state(AxisType::Y, 20.0));
        let z = core.insert_object(3, Klass::Axis, "z", axis_state(AxisType::Z, 5.0));
        (x, y, z)
    }

    #[test]
    fn cartesian_position_mirrors_axes() {
        let core = RecordingCore::new();
        world(&core);
        let mut th = factory("th", b"{}").unwrap();
        th.init(ObjectId::new(9), &core).unwrap();
        th.update(0, 0, &core);
        let ObjectState::Toolhead(snap) = th.state() else { unreachable!() };
        assert_eq!(snap.position, Position::new(10.0, 20.0, 5.0));
        assert!(!snap.at_origin);
    }

    #[test]
    fn corexy_position_maps_motor_space() {
        let core = RecordingCore::new();
        // Motor-space axis positions after a pure +10 mm X move.
        core.insert_object(1, Klass::Axis, "x", axis_state(AxisType::X, 10.0));
        core.insert_object(2, Klass::Axis, "y", axis_state(AxisType::Y, 10.0));
        core.insert_object(3, Klass::Axis, "z", axis_state(AxisType::Z, 0.0));
        let mut th = factory("th", br#"{"kinematics": {"type": "core_xy"}}"#).unwrap();
        th.init(ObjectId::new(9), &core).unwrap();
        th.update(0, 0, &core);
        let ObjectState::Toolhead(snap) = th.state() else { unreachable!() };
        assert_eq!(snap.position, Position::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn origin_event_is_one_shot_per_transit() {
        let core = RecordingCore::new();
        let (x, y, z) = world(&core);
        let mut th = factory("th", b"{}").unwrap();
        th.init(ObjectId::new(9), &core).unwrap();

        // Drive everything home.
        core.set_state(x, axis_state(AxisType::X, 0.0));
        core.set_state(y, axis_state(AxisType::Y, 0.0));
        core.set_state(z, axis_state(AxisType::Z, 0.0));
        th.update(0, 0, &core);
        th.update(0, 1, &core);
        assert_eq!(core.events_of(EventKind::ToolheadOrigin).len(), 1);

        // Leave and return: exactly one more event.
        core.set_state(x, axis_state(AxisType::X, 50.0));
        th.update(0, 2, &core);
        core.set_state(x, axis_state(AxisType::X, 0.0));
        th.update(0, 3, &core);
        let events = core.events_of(EventKind::ToolheadOrigin);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload, EventPayload::Position(Position::default()));
    }

    #[test]
    fn init_without_axes_fails() {
        let core = RecordingCore::new();
        let mut th = factory("th", b"{}").unwrap();
        assert!(matches!(
            th.init(ObjectId::new(9), &core),
            Err(CoreError::NotFound(_))
        ));
    }
}
