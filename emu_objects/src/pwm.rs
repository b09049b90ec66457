//! PWM output: the instantaneous level follows the phase of the virtual
//! runtime within each switching period.

use emu_common::command::{Command, CommandArgs, Disposition, PwmCommand};
use emu_common::config::{self, PwmConfig};
use emu_common::consts::DEFAULT_UPDATE_HZ;
use emu_common::error::CoreResult;
use emu_common::klass::{Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{ObjectState, PwmSnapshot};

/// The PWM object.
pub struct Pwm {
    name: String,
    config: PwmConfig,
    enabled: bool,
    frequency: f64,
    duty: f64,
    level: bool,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: PwmConfig = config::decode(blob)?;
    Ok(Box::new(Pwm {
        name: name.to_string(),
        enabled: cfg.enabled,
        frequency: cfg.frequency,
        duty: cfg.duty.clamp(0.0, 1.0),
        level: false,
        config: cfg,
    }))
}

impl Pwm {
    /// Output level at `runtime_ns` for the current settings.
    fn level_at(&self, runtime_ns: u64) -> bool {
        if !self.enabled || self.duty <= 0.0 || self.frequency <= 0.0 {
            return false;
        }
        if self.duty >= 1.0 {
            return true;
        }
        let period_ns = 1e9 / self.frequency;
        let phase = (runtime_ns as f64 % period_ns) / period_ns;
        phase < self.duty
    }
}

impl SimObject for Pwm {
    fn klass(&self) -> Klass {
        Klass::Pwm
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BASE | Capabilities::EXEC_COMMAND
    }

    fn update_frequency(&self) -> f64 {
        // Sample well above the switching frequency so duty edges land.
        (self.frequency * 10.0).max(DEFAULT_UPDATE_HZ)
    }

    fn reset(&mut self, _core: &dyn CoreHandle) {
        self.enabled = self.config.enabled;
        self.frequency = self.config.frequency;
        self.duty = self.config.duty.clamp(0.0, 1.0);
        self.level = false;
    }

    fn exec_command(&mut self, cmd: &Command, _core: &dyn CoreHandle) -> Result<Disposition, i32> {
        let CommandArgs::Pwm(args) = cmd.args else {
            return Err(-libc::EINVAL);
        };
        match args {
            PwmCommand::SetDuty(duty) => {
                if !duty.is_finite() || !(0.0..=1.0).contains(&duty) {
                    return Err(-libc::EINVAL);
                }
                self.duty = duty;
            }
            PwmCommand::SetFrequency(frequency) => {
                if !frequency.is_finite() || frequency <= 0.0 {
                    return Err(-libc::EINVAL);
                }
                self.frequency = frequency;
            }
            PwmCommand::Enable(on) => {
                self.enabled = on;
                if !on {
                    self.level = false;
                }
            }
        }
        Ok(Disposition::Complete(0))
    }

    fn update(&mut self, _ticks: u64, runtime_ns: u64, _core: &dyn CoreHandle) {
        self.level = self.level_at(runtime_ns);
    }

    fn state(&self) -> ObjectState {
        ObjectState::Pwm(PwmSnapshot {
            enabled: self.enabled,
            frequency: self.frequency,
            duty: self.duty,
            level: self.level,
        })
    }
}
