//! Stepper motor model: trapezoidal motion profiles and pin-driven mode.
//!
//! A MOVE runs through up to three phases: acceleration until the
//! computed accel distance is covered, cruise at the configured speed,
//! deceleration once the remaining steps fit the decel distance. Profiles
//! shorter than accel + decel become triangular. In pin-driven mode a
//! 1 µs monitor thread consumes step counts from the shared pin word and
//! the normal update path goes quiescent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use emu_common::command::{Command, CommandArgs, CommandId, Direction, Disposition, StepperCommand};
use emu_common::config::{self, StepperConfig};
use emu_common::consts::{DEFAULT_UPDATE_HZ, PIN_POLL_PERIOD_NS};
use emu_common::error::CoreResult;
use emu_common::events::{EventKind, EventPayload};
use emu_common::klass::{Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{ObjectState, StepperSnapshot};
use static_assertions::const_assert_eq;
use tracing::{debug, trace};

/// Pin word: enable gate.
pub const PIN_ENABLE: u32 = 1 << 17;
/// Pin word: direction (set = backward).
pub const PIN_DIR: u32 = 1 << 16;
/// Pin word: pending step count.
pub const PIN_COUNT_MASK: u32 = 0xFFFF;

const_assert_eq!(PIN_ENABLE & PIN_COUNT_MASK, 0);
const_assert_eq!(PIN_DIR & PIN_COUNT_MASK, 0);
const_assert_eq!(PIN_ENABLE & PIN_DIR, 0);

/// Floor for the deceleration phase so the tail of a move cannot stall.
const MIN_SPEED_SPS: f64 = 1.0;

/// An in-flight MOVE.
struct ActiveMove {
    cmd: CommandId,
    direction: Direction,
    /// Total steps requested.
    steps: f64,
    /// Fractional steps covered so far.
    done: f64,
    /// Whole steps already applied to the counter.
    applied: i64,
    accel_distance: f64,
    decel_distance: f64,
    started_ns: Option<u64>,
    decel_started_ns: Option<u64>,
}

struct PinMonitor {
    run: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The stepper object.
pub struct Stepper {
    name: String,
    id: ObjectId,
    enabled: bool,
    /// Absolute step counter; shared with the pin monitor.
    current_step: Arc<AtomicI64>,
    /// Cruise speed [steps/s].
    speed_sps: f64,
    /// Acceleration [steps/s²]; 0 = pure cruise.
    accel: f64,
    /// Deceleration [steps/s²].
    decel: f64,
    active: Option<ActiveMove>,
    last_update_ns: Option<u64>,
    pin_mode: bool,
    pins: Arc<AtomicU32>,
    monitor: Option<PinMonitor>,
    update_hz: f64,
    start_speed: f64,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: StepperConfig = config::decode(blob)?;
    Ok(Box::new(Stepper::new(name, &cfg)))
}

impl Stepper {
    pub fn new(name: &str, cfg: &StepperConfig) -> Self {
        Self {
            name: name.to_string(),
            id: ObjectId::INVALID,
            enabled: false,
            current_step: Arc::new(AtomicI64::new(0)),
            speed_sps: cfg.start_speed,
            accel: 0.0,
            decel: 0.0,
            active: None,
            last_update_ns: None,
            pin_mode: false,
            pins: Arc::new(AtomicU32::new(0)),
            monitor: None,
            update_hz: cfg.update_frequency.unwrap_or(DEFAULT_UPDATE_HZ),
            start_speed: cfg.start_speed,
        }
    }

    /// Abort the active move, completing its command with `result`.
    fn abort_move(&mut self, result: i32, core: &dyn CoreHandle) {
        if let Some(mv) = self.active.take() {
            core.complete_command(mv.cmd, result);
        }
    }

    fn begin_move(&mut self, cmd: CommandId, direction: Direction, steps: u32) -> Disposition {
        let steps = steps as f64;
        // v²/2a on each side, capped for triangular profiles.
        let mut accel_distance = if self.accel > 0.0 {
            self.speed_sps * self.speed_sps / (2.0 * self.accel)
        } else {
            0.0
        };
        let mut decel_distance = if self.decel > 0.0 {
            self.speed_sps * self.speed_sps / (2.0 * self.decel)
        } else {
            0.0
        };
        let ramp = accel_distance + decel_distance;
        if ramp > steps && ramp > 0.0 {
            let scale = steps / ramp;
            accel_distance *= scale;
            decel_distance *= scale;
        }
        self.active = Some(ActiveMove {
            cmd,
            direction,
            steps,
            done: 0.0,
            applied: 0,
            accel_distance,
            decel_distance,
            started_ns: None,
            decel_started_ns: None,
        });
        Disposition::Pending
    }

    /// Current commanded speed [steps/s] for the active move at `now`.
    fn move_speed(mv: &mut ActiveMove, cruise: f64, accel: f64, decel: f64, now_ns: u64) -> f64 {
        let started = *mv.started_ns.get_or_insert(now_ns);
        let remaining = mv.steps - mv.done;

        if remaining <= mv.decel_distance && decel > 0.0 {
            let decel_started = *mv.decel_started_ns.get_or_insert(now_ns);
            let dt = (now_ns - decel_started) as f64 / 1e9;
            (cruise - decel * dt).max(MIN_SPEED_SPS)
        } else if mv.done < mv.accel_distance && accel > 0.0 {
            let dt = (now_ns - started) as f64 / 1e9;
            (accel * dt).clamp(MIN_SPEED_SPS, cruise)
        } else {
            cruise
        }
    }

    fn advance_move(&mut self, now_ns: u64, delta_s: f64, core: &dyn CoreHandle) {
        let Some(mv) = self.active.as_mut() else { return };
        let speed = Self::move_speed(mv, self.speed_sps, self.accel, self.decel, now_ns);
        let increment = (speed * delta_s).min(mv.steps - mv.done);
        mv.done += increment;

        let target_whole = mv.done.floor() as i64;
        let sign = mv.direction.sign();
        if target_whole > mv.applied {
            self.current_step
                .fetch_add(sign * (target_whole - mv.applied), Ordering::AcqRel);
            mv.applied = target_whole;
        }

        if mv.steps - mv.done < 1e-9 {
            // Settle the residual so the counter moves by exactly the
            // requested amount.
            let residual = mv.steps as i64 - mv.applied;
            if residual != 0 {
                self.current_step.fetch_add(sign * residual, Ordering::AcqRel);
            }
            let cmd = mv.cmd;
            self.active = None;
            let position = self.current_step.load(Ordering::Acquire);
            trace!(target: "emu.objects.stepper", "{}: move {cmd} complete at {position}", self.name);
            core.complete_command(cmd, 0);
            core.submit_event(
                EventKind::StepperMoveComplete,
                self.id,
                EventPayload::Steps(position),
            );
        }
    }

    fn enter_pin_mode(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        let run = Arc::new(AtomicBool::new(true));
        let pins = Arc::clone(&self.pins);
        let counter = Arc::clone(&self.current_step);
        let flag = Arc::clone(&run);
        let handle = std::thread::Builder::new()
            .name(format!("emu-pins-{}", self.name))
            .spawn(move || pin_monitor_loop(flag, pins, counter))
            .expect("spawn pin monitor");
        self.monitor = Some(PinMonitor { run, handle });
        self.pin_mode = true;
        debug!(target: "emu.objects.stepper", "{}: pin mode on", self.name);
    }

    fn leave_pin_mode(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.run.store(false, Ordering::Release);
            let _ = monitor.handle.join();
        }
        self.pin_mode = false;
        self.last_update_ns = None;
        debug!(target: "emu.objects.stepper", "{}: pin mode off", self.name);
    }

    /// Shared pin word (exposed for hosts driving pin mode).
    pub fn pin_word(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.pins)
    }
}

/// Poll the pin word, consuming the step count atomically: the AND with
/// `ENABLE|DIR` clears the count while preserving the control bits, so a
/// producer can keep accumulating between polls without loss.
fn pin_monitor_loop(run: Arc<AtomicBool>, pins: Arc<AtomicU32>, counter: Arc<AtomicI64>) {
    while run.load(Ordering::Acquire) {
        let word = pins.fetch_and(PIN_ENABLE | PIN_DIR, Ordering::AcqRel);
        let count = (word & PIN_COUNT_MASK) as i64;
        if count != 0 && word & PIN_ENABLE != 0 {
            let sign = if word & PIN_DIR != 0 { -1 } else { 1 };
            counter.fetch_add(sign * count, Ordering::AcqRel);
        }
        std::thread::sleep(Duration::from_nanos(PIN_POLL_PERIOD_NS));
    }
}

impl SimObject for Stepper {
    fn klass(&self) -> Klass {
        Klass::Stepper
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BASE | Capabilities::EXEC_COMMAND | Capabilities::DESTROY
    }

    fn update_frequency(&self) -> f64 {
        self.update_hz
    }

    fn init(&mut self, id: ObjectId, _core: &dyn CoreHandle) -> CoreResult<()> {
        self.id = id;
        Ok(())
    }

    fn reset(&mut self, core: &dyn CoreHandle) {
        self.abort_move(-libc::ECANCELED, core);
        self.leave_pin_mode();
        self.enabled = false;
        self.current_step.store(0, Ordering::Release);
        self.speed_sps = self.start_speed;
        self.accel = 0.0;
        self.decel = 0.0;
        self.pins.store(0, Ordering::Release);
        self.last_update_ns = None;
    }

    fn exec_command(&mut self, cmd: &Command, core: &dyn CoreHandle) -> Result<Disposition, i32> {
        let CommandArgs::Stepper(args) = cmd.args else {
            return Err(-libc::EINVAL);
        };
        match args {
            StepperCommand::Enable(on) => {
                if !on {
                    self.abort_move(-libc::ECANCELED, core);
                }
                self.enabled = on;
                Ok(Disposition::Complete(0))
            }
            StepperCommand::SetSpeed(sps) => {
                if !sps.is_finite() || sps < 0.0 {
                    return Err(-libc::EINVAL);
                }
                self.speed_sps = sps;
                Ok(Disposition::Complete(0))
            }
            StepperCommand::SetAccel { accel, decel } => {
                let decel = decel.unwrap_or(accel);
                if accel < 0.0 || decel < 0.0 {
                    return Err(-libc::EINVAL);
                }
                self.accel = accel;
                self.decel = decel;
                Ok(Disposition::Complete(0))
            }
            StepperCommand::Move { direction, steps } => {
                if !self.enabled || self.pin_mode {
                    return Err(-libc::EBUSY);
                }
                if self.active.is_some() {
                    return Err(-libc::EBUSY);
                }
                if steps == 0 {
                    return Ok(Disposition::Complete(0));
                }
                Ok(self.begin_move(cmd.id, direction, steps))
            }
            StepperCommand::UsePins(on) => {
                if on {
                    self.abort_move(-libc::ECANCELED, core);
                    self.enter_pin_mode();
                } else {
                    self.leave_pin_mode();
                }
                Ok(Disposition::Complete(0))
            }
        }
    }

    fn update(&mut self, _ticks: u64, runtime_ns: u64, core: &dyn CoreHandle) {
        if self.pin_mode {
            return;
        }
        let Some(last) = self.last_update_ns.replace(runtime_ns) else {
            return;
        };
        if runtime_ns <= last {
            return;
        }
        let delta_s = (runtime_ns - last) as f64 / 1e9;
        if self.enabled && self.active.is_some() {
            self.advance_move(runtime_ns, delta_s, core);
        }
    }

    fn state(&self) -> ObjectState {
        ObjectState::Stepper(StepperSnapshot {
            enabled: self.enabled,
            current_step: self.current_step.load(Ordering::Acquire),
            steps_per_sec: self.speed_sps,
            moving: self.active.is_some(),
            pin_mode: self.pin_mode,
        })
    }

    fn pins(&self) -> Option<Arc<AtomicU32>> {
        Some(Arc::clone(&self.pins))
    }

    fn destroy(&mut self) {
        self.leave_pin_mode();
    }
}
