//! Motion axis: integrates its motors' step counters into a position,
//! clamps at a configured endstop, and reports homed state.
//!
//! The position advances by the mean of the per-motor travel deltas since
//! the previous update, so multi-motor gantries stay consistent even
//! when the motors are commanded separately.

use emu_common::config::{self, AxisConfig};
use emu_common::consts::{DEFAULT_UPDATE_HZ, MAX_AXIS_MOTORS};
use emu_common::error::{CoreError, CoreResult};
use emu_common::events::{EventKind, EventPayload};
use emu_common::klass::{Capabilities, EndstopKind, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{AxisSnapshot, ObjectState};
use tracing::debug;

/// One bound motor and its last observed travel.
#[derive(Debug, Clone, Copy)]
struct MotorRef {
    id: ObjectId,
    /// `current_step · travel_per_step` at the previous update [mm].
    cached: f64,
}

/// The axis object.
pub struct Axis {
    name: String,
    id: ObjectId,
    config: AxisConfig,
    motors: heapless::Vec<MotorRef, MAX_AXIS_MOTORS>,
    endstop: Option<ObjectId>,
    position: f64,
    homed: bool,
    update_hz: f64,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: AxisConfig = config::decode(blob)?;
    if cfg.steppers.is_empty() {
        return Err(CoreError::InvalidArgument(format!(
            "axis {name} has no steppers"
        )));
    }
    if cfg.steppers.len() > MAX_AXIS_MOTORS {
        return Err(CoreError::InvalidArgument(format!(
            "axis {name} exceeds {MAX_AXIS_MOTORS} motors"
        )));
    }
    let update_hz = cfg.update_frequency.unwrap_or(DEFAULT_UPDATE_HZ);
    let position = cfg.start_position;
    Ok(Box::new(Axis {
        name: name.to_string(),
        id: ObjectId::INVALID,
        config: cfg,
        motors: heapless::Vec::new(),
        endstop: None,
        position,
        homed: false,
        update_hz,
    }))
}

impl Axis {
    /// Travel of one motor according to its snapshot [mm].
    fn motor_travel(&self, core: &dyn CoreHandle, id: ObjectId) -> Option<f64> {
        match core.object_state(id)? {
            ObjectState::Stepper(s) => Some(s.current_step as f64 * self.config.travel_per_step),
            _ => None,
        }
    }

    /// Re-read every motor and reset the delta baseline.
    fn cache_motor_positions(&mut self, core: &dyn CoreHandle) {
        for i in 0..self.motors.len() {
            if let Some(travel) = self.motor_travel(core, self.motors[i].id) {
                self.motors[i].cached = travel;
            }
        }
    }

    fn clamp(&mut self, kind: EndstopKind) {
        match kind {
            EndstopKind::Min => {
                if self.position < 0.0 {
                    self.position = 0.0;
                }
            }
            EndstopKind::Max => {
                if self.position > self.config.length {
                    self.position = self.config.length;
                }
            }
        }
    }
}

impl SimObject for Axis {
    fn klass(&self) -> Klass {
        Klass::Axis
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
        self.motors.clear();
        for stepper in &self.config.steppers {
            let motor = core
                .lookup(Klass::Stepper, stepper)
                .ok_or_else(|| CoreError::NotFound(format!("stepper/{stepper}")))?;
            self.motors
                .push(MotorRef {
                    id: motor,
                    cached: 0.0,
                })
                .map_err(|_| CoreError::InvalidArgument("too many motors".into()))?;
        }
        if let Some(endstop) = &self.config.endstop {
            self.endstop = Some(
                core.lookup(Klass::Endstop, endstop)
                    .ok_or_else(|| CoreError::NotFound(format!("endstop/{endstop}")))?,
            );
        }
        self.cache_motor_positions(core);
        debug!(
            target: "emu.objects.axis",
            "{}: {} motors, endstop {:?}",
            self.name,
            self.motors.len(),
            self.endstop
        );
        Ok(())
    }

    fn reset(&mut self, core: &dyn CoreHandle) {
        self.position = self.config.start_position;
        self.homed = false;
        self.cache_motor_positions(core);
    }

    fn update(&mut self, _ticks: u64, _runtime_ns: u64, core: &dyn CoreHandle) {
        // Mean travel delta over the motors.
        let mut delta_sum = 0.0;
        let mut seen = 0usize;
        for i in 0..self.motors.len() {
            if let Some(travel) = self.motor_travel(core, self.motors[i].id) {
                delta_sum += travel - self.motors[i].cached;
                self.motors[i].cached = travel;
                seen += 1;
            }
        }
        if seen > 0 {
            self.position += delta_sum / seen as f64;
        }

        // Clamp only at the guarded end; detect homing off the endstop.
        if let Some(endstop) = self.endstop {
            if let Some(ObjectState::Endstop(es)) = core.object_state(endstop) {
                self.clamp(es.kind);
                let at_limit = match es.kind {
                    EndstopKind::Min => self.position <= 0.0,
                    EndstopKind::Max => self.position >= self.config.length,
                };
                if es.triggered && at_limit && !self.homed {
                    self.homed = true;
                    debug!(target: "emu.objects.axis", "{}: homed", self.name);
                    core.submit_event(EventKind::AxisHomed, self.id, EventPayload::None);
                }
            }
        }
    }

    fn state(&self) -> ObjectState {
        ObjectState::Axis(AxisSnapshot {
            axis_type: self.config.axis_type,
            position: self.position,
            length: self.config.length,
            homed: self.homed,
        })
    }
}
