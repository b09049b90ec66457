//! Digital pin: a latched boolean output, mirrored into a shared pin
//! word so other simulated hardware can observe it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use emu_common::command::{Command, CommandArgs, Disposition, PinCommand};
use emu_common::config::{self, DigitalPinConfig};
use emu_common::error::CoreResult;
use emu_common::klass::{Capabilities, Klass};
use emu_common::object::{CoreHandle, ObjectId, SimObject};
use emu_common::state::{DigitalPinSnapshot, ObjectState};

/// The digital-pin object.
pub struct DigitalPin {
    name: String,
    level: bool,
    initial: bool,
    word: Arc<AtomicU32>,
}

/// Klass factory.
pub fn factory(name: &str, blob: &[u8]) -> CoreResult<Box<dyn SimObject>> {
    let cfg: DigitalPinConfig = config::decode(blob)?;
    let pin = DigitalPin {
        name: name.to_string(),
        level: cfg.level,
        initial: cfg.level,
        word: Arc::new(AtomicU32::new(cfg.level as u32)),
    };
    Ok(Box::new(pin))
}

impl DigitalPin {
    fn set_level(&mut self, level: bool) {
        self.level = level;
        self.word.store(level as u32, Ordering::Release);
    }
}

impl SimObject for DigitalPin {
    fn klass(&self) -> Klass {
        Klass::DigitalPin
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::INIT
            | Capabilities::RESET
            | Capabilities::GET_STATE
            | Capabilities::EXEC_COMMAND
    }

    fn reset(&mut self, _core: &dyn CoreHandle) {
        self.set_level(self.initial);
    }

    fn exec_command(&mut self, cmd: &Command, _core: &dyn CoreHandle) -> Result<Disposition, i32> {
        let CommandArgs::DigitalPin(args) = cmd.args else {
            return Err(-libc::EINVAL);
        };
        match args {
            PinCommand::Set(level) => self.set_level(level),
            PinCommand::Toggle => self.set_level(!self.level),
        }
        Ok(Disposition::Complete(0))
    }

    fn state(&self) -> ObjectState {
        ObjectState::DigitalPin(DigitalPinSnapshot { level: self.level })
    }

    fn pins(&self) -> Option<Arc<AtomicU32>> {
        Some(Arc::clone(&self.word))
    }
}
