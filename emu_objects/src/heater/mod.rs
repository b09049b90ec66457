//! Heater object: thermal stack, PID regulation and pin-driven mode.
//!
//! SET_TEMP installs a target the PID chases; the command completes once
//! the sensor is inside the reporting-precision band and the object emits
//! `HEATER_TEMP_REACHED`. In pin-driven mode a 1 µs monitor samples the
//! pin byte and the drive duty follows bit 0 at full rated power.

pub mod model;
pub mod pid;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use emu_common::command::{Command, CommandArgs, CommandId, Disposition, HeaterCommand};
use emu_common::config::{self, HeaterConfig, PidConfig};
use emu_common::consts::{PIN_POLL_PERIOD_NS, PRECISION};
use emu_common::error::CoreResult;
use emu_common::events::{EventKind, EventPayload};
use emu_common::klass::{Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{HeaterSnapshot, ObjectState};
use tracing::{debug, trace};

use model::ThermalModel;
use pid::{OUTPUT_MAX, PidState, pid_update};

/// Pin byte: heat request.
pub const PIN_HEAT: u32 = 1 << 0;

/// Default heater update rate [Hz]; the thermal mesh is too heavy for
/// the kilohertz pacing steppers use.
const HEATER_UPDATE_HZ: f64 = 100.0;

/// Active SET_TEMP bookkeeping.
struct TargetState {
    temp: f64,
    /// Completion still owed, until the band is first reached.
    cmd: Option<CommandId>,
}

struct PinMonitor {
    run: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The heater object.
pub struct Heater {
    name: String,
    id: ObjectId,
    model: ThermalModel,
    gains: PidConfig,
    pid: PidState,
    max_temp: f64,
    rated_power: f64,
    target: Option<TargetState>,
    duty: f64,
    last_update_ns: Option<u64>,
    pin_mode: bool,
    pins: Arc<AtomicU32>,
    heat_on: Arc<AtomicBool>,
    monitor: Option<PinMonitor>,
    update_hz: f64,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: HeaterConfig = config::decode(blob)?;
    Ok(Box::new(Heater::new(name, &cfg)?))
}

impl Heater {
    pub fn new(name: &str, cfg: &HeaterConfig) -> CoreResult<Self> {
        let model = ThermalModel::new(cfg)?;
        Ok(Self {
            name: name.to_string(),
            id: ObjectId::INVALID,
            model,
            gains: cfg.pid,
            pid: PidState::default(),
            max_temp: cfg.max_temp,
            rated_power: cfg.rated_power(),
            target: None,
            duty: 0.0,
            last_update_ns: None,
            pin_mode: false,
            pins: Arc::new(AtomicU32::new(0)),
            heat_on: Arc::new(AtomicBool::new(false)),
            monitor: None,
            update_hz: cfg.update_frequency.unwrap_or(HEATER_UPDATE_HZ),
        })
    }

    /// The completion band around the target: `10^-PRECISION`.
    #[inline]
    fn band() -> f64 {
        10f64.powi(-PRECISION)
    }

    fn enter_pin_mode(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        let run = Arc::new(AtomicBool::new(true));
        let pins = Arc::clone(&self.pins);
        let heat_on = Arc::clone(&self.heat_on);
        let flag = Arc::clone(&run);
        let handle = std::thread::Builder::new()
            .name(format!("emu-pins-{}", self.name))
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    let byte = pins.load(Ordering::Acquire);
                    heat_on.store(byte & PIN_HEAT != 0, Ordering::Release);
                    std::thread::sleep(Duration::from_nanos(PIN_POLL_PERIOD_NS));
                }
            })
            .expect("spawn pin monitor");
        self.monitor = Some(PinMonitor { run, handle });
        self.pin_mode = true;
        debug!(target: "emu.objects.heater", "{}: pin mode on", self.name);
    }

    fn leave_pin_mode(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.run.store(false, Ordering::Release);
            let _ = monitor.handle.join();
        }
        self.pin_mode = false;
        self.heat_on.store(false, Ordering::Release);
    }

    fn abort_target(&mut self, result: i32, core: &dyn CoreHandle) {
        if let Some(target) = self.target.take() {
            if let Some(cmd) = target.cmd {
                core.complete_command(cmd, result);
            }
        }
    }

    /// Shared pin word (exposed for hosts driving pin mode).
    pub fn pin_word(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.pins)
    }
}

impl SimObject for Heater {
    fn klass(&self) -> Klass {
        Klass::Heater
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
        self.abort_target(-libc::ECANCELED, core);
        self.leave_pin_mode();
        self.model.reset();
        self.pid.reset();
        self.duty = 0.0;
        self.last_update_ns = None;
        self.pins.store(0, Ordering::Release);
    }

    fn exec_command(&mut self, cmd: &Command, core: &dyn CoreHandle) -> Result<Disposition, i32> {
        let CommandArgs::Heater(args) = cmd.args else {
            return Err(-libc::EINVAL);
        };
        match args {
            HeaterCommand::SetTemp(temp) => {
                if !temp.is_finite() || temp < 0.0 || temp > self.max_temp {
                    return Err(-libc::EINVAL);
                }
                if self
                    .target
                    .as_ref()
                    .is_some_and(|t| t.cmd.is_some())
                {
                    return Err(-libc::EBUSY);
                }
                trace!(target: "emu.objects.heater", "{}: target {temp} °C", self.name);
                self.pid.reset();
                self.target = Some(TargetState {
                    temp,
                    cmd: Some(cmd.id),
                });
                Ok(Disposition::Pending)
            }
            HeaterCommand::UsePins(on) => {
                if on {
                    self.abort_target(-libc::ECANCELED, core);
                    self.enter_pin_mode();
                } else {
                    self.leave_pin_mode();
                }
                Ok(Disposition::Complete(0))
            }
        }
    }

    fn update(&mut self, _ticks: u64, runtime_ns: u64, core: &dyn CoreHandle) {
        let Some(last) = self.last_update_ns.replace(runtime_ns) else {
            return;
        };
        if runtime_ns <= last {
            return;
        }
        let dt = (runtime_ns - last) as f64 / 1e9;

        self.duty = if self.pin_mode {
            if self.heat_on.load(Ordering::Acquire) { 1.0 } else { 0.0 }
        } else if let Some(target) = &self.target {
            let error = target.temp - self.model.sensor_temp();
            pid_update(&mut self.pid, &self.gains, error, dt) / OUTPUT_MAX
        } else {
            0.0
        };

        self.model.step(self.duty, dt);

        if let Some(target) = self.target.as_mut() {
            let sensor = self.model.sensor_temp();
            if let Some(cmd) = target.cmd {
                if (sensor - target.temp).abs() < Self::band() {
                    target.cmd = None;
                    core.complete_command(cmd, 0);
                    core.submit_event(
                        EventKind::HeaterTempReached,
                        self.id,
                        EventPayload::Temperature(target.temp),
                    );
                }
            }
        }
    }

    fn state(&self) -> ObjectState {
        ObjectState::Heater(HeaterSnapshot {
            temperature: self.model.sensor_temp(),
            target: self.target.as_ref().map(|t| t.temp).unwrap_or(0.0),
            power: self.rated_power,
            duty: self.duty,
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
