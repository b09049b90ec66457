//! Typed command payloads and subcommand ids.
//!
//! Commands carry a tagged per-klass payload instead of an opaque argument
//! pointer; the 16-bit subcommand id of the wire contract is derived from
//! the payload variant. Subcommand ids form a closed enum per klass,
//! starting at 0. The raw façade packs arguments into a single `u64`
//! (documented per variant in [`CommandArgs::decode`]).

use serde::{Deserialize, Serialize};

use crate::klass::Klass;
use crate::object::ObjectId;

/// Globally unique, non-zero command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(u64);

impl CommandId {
    /// Wrap a raw id. Zero is reserved for "no command".
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Motion direction for stepper moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Direction {
    Forward = 0,
    Backward = 1,
}

impl Direction {
    /// Step-count sign for this direction.
    #[inline]
    pub const fn sign(&self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }
}

/// Stepper subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepperCommand {
    /// Energize or release the motor.
    Enable(bool),
    /// Cruise speed [steps/s]. Rejects negatives.
    SetSpeed(f64),
    /// Acceleration and deceleration [steps/s²]; `decel` defaults to
    /// `accel`. Zero acceleration yields a pure-cruise profile.
    SetAccel {
        accel: f64,
        decel: Option<f64>,
    },
    /// Relative move of `steps` in `direction`.
    Move {
        direction: Direction,
        steps: u32,
    },
    /// Enter or leave pin-driven mode.
    UsePins(bool),
}

impl StepperCommand {
    pub const fn subcommand(&self) -> u16 {
        match self {
            Self::Enable(_) => 0,
            Self::SetSpeed(_) => 1,
            Self::SetAccel { .. } => 2,
            Self::Move { .. } => 3,
            Self::UsePins(_) => 4,
        }
    }
}

/// Heater subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HeaterCommand {
    /// Target temperature [°C] in `[0, max_temp]`.
    SetTemp(f64),
    /// Enter or leave pin-driven mode.
    UsePins(bool),
}

impl HeaterCommand {
    pub const fn subcommand(&self) -> u16 {
        match self {
            Self::SetTemp(_) => 0,
            Self::UsePins(_) => 1,
        }
    }
}

/// PWM subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PwmCommand {
    /// Duty cycle in `[0, 1]`.
    SetDuty(f64),
    /// Switching frequency [Hz].
    SetFrequency(f64),
    /// Enable or disable the output.
    Enable(bool),
}

impl PwmCommand {
    pub const fn subcommand(&self) -> u16 {
        match self {
            Self::SetDuty(_) => 0,
            Self::SetFrequency(_) => 1,
            Self::Enable(_) => 2,
        }
    }
}

/// Digital-pin subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinCommand {
    /// Latch the output level.
    Set(bool),
    /// Invert the output level.
    Toggle,
}

impl PinCommand {
    pub const fn subcommand(&self) -> u16 {
        match self {
            Self::Set(_) => 0,
            Self::Toggle => 1,
        }
    }
}

/// Tagged command payload. The variant implies the target klass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CommandArgs {
    Stepper(StepperCommand),
    Heater(HeaterCommand),
    Pwm(PwmCommand),
    DigitalPin(PinCommand),
}

impl CommandArgs {
    /// The klass this payload targets.
    pub const fn klass(&self) -> Klass {
        match self {
            Self::Stepper(_) => Klass::Stepper,
            Self::Heater(_) => Klass::Heater,
            Self::Pwm(_) => Klass::Pwm,
            Self::DigitalPin(_) => Klass::DigitalPin,
        }
    }

    /// Klass-private subcommand id.
    pub const fn subcommand(&self) -> u16 {
        match self {
            Self::Stepper(c) => c.subcommand(),
            Self::Heater(c) => c.subcommand(),
            Self::Pwm(c) => c.subcommand(),
            Self::DigitalPin(c) => c.subcommand(),
        }
    }

    /// Decode a raw-façade `(klass, subcommand, arg)` triple.
    ///
    /// Packing per variant:
    /// - booleans: `arg != 0`
    /// - floating-point scalars: `f64::from_bits(arg)`
    /// - stepper MOVE: low 32 bits = step count, bit 32 = direction
    ///   (0 = forward, 1 = backward)
    /// - stepper SET_ACCEL: one f64, deceleration defaults to it
    pub fn decode(klass: Klass, subcommand: u16, arg: u64) -> Option<Self> {
        match (klass, subcommand) {
            (Klass::Stepper, 0) => Some(Self::Stepper(StepperCommand::Enable(arg != 0))),
            (Klass::Stepper, 1) => {
                Some(Self::Stepper(StepperCommand::SetSpeed(f64::from_bits(arg))))
            }
            (Klass::Stepper, 2) => Some(Self::Stepper(StepperCommand::SetAccel {
                accel: f64::from_bits(arg),
                decel: None,
            })),
            (Klass::Stepper, 3) => Some(Self::Stepper(StepperCommand::Move {
                direction: if arg & (1 << 32) == 0 {
                    Direction::Forward
                } else {
                    Direction::Backward
                },
                steps: (arg & 0xFFFF_FFFF) as u32,
            })),
            (Klass::Stepper, 4) => Some(Self::Stepper(StepperCommand::UsePins(arg != 0))),
            (Klass::Heater, 0) => {
                Some(Self::Heater(HeaterCommand::SetTemp(f64::from_bits(arg))))
            }
            (Klass::Heater, 1) => Some(Self::Heater(HeaterCommand::UsePins(arg != 0))),
            (Klass::Pwm, 0) => Some(Self::Pwm(PwmCommand::SetDuty(f64::from_bits(arg)))),
            (Klass::Pwm, 1) => Some(Self::Pwm(PwmCommand::SetFrequency(f64::from_bits(arg)))),
            (Klass::Pwm, 2) => Some(Self::Pwm(PwmCommand::Enable(arg != 0))),
            (Klass::DigitalPin, 0) => Some(Self::DigitalPin(PinCommand::Set(arg != 0))),
            (Klass::DigitalPin, 1) => Some(Self::DigitalPin(PinCommand::Toggle)),
            _ => None,
        }
    }
}

/// A command as seen by the target object.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    /// Globally unique id; completion is signalled against it.
    pub id: CommandId,
    /// Target object.
    pub target: ObjectId,
    /// Typed payload.
    pub args: CommandArgs,
}

/// Outcome of `exec_command` when the command is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The object took ownership; it will signal completion later.
    Pending,
    /// The command finished synchronously with this result.
    Complete(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommand_ids_are_dense() {
        assert_eq!(StepperCommand::Enable(true).subcommand(), 0);
        assert_eq!(StepperCommand::SetSpeed(1.0).subcommand(), 1);
        assert_eq!(
            StepperCommand::SetAccel {
                accel: 1.0,
                decel: None
            }
            .subcommand(),
            2
        );
        assert_eq!(
            StepperCommand::Move {
                direction: Direction::Forward,
                steps: 1
            }
            .subcommand(),
            3
        );
        assert_eq!(StepperCommand::UsePins(true).subcommand(), 4);
        assert_eq!(HeaterCommand::SetTemp(0.0).subcommand(), 0);
        assert_eq!(PwmCommand::Enable(true).subcommand(), 2);
        assert_eq!(PinCommand::Toggle.subcommand(), 1);
    }

    #[test]
    fn decode_move_packs_direction_and_steps() {
        let args = CommandArgs::decode(Klass::Stepper, 3, (1u64 << 32) | 1600).unwrap();
        match args {
            CommandArgs::Stepper(StepperCommand::Move { direction, steps }) => {
                assert_eq!(direction, Direction::Backward);
                assert_eq!(steps, 1600);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
        assert_eq!(args.klass(), Klass::Stepper);
        assert_eq!(args.subcommand(), 3);
    }

    #[test]
    fn decode_float_scalars() {
        let args = CommandArgs::decode(Klass::Heater, 0, 60.0f64.to_bits()).unwrap();
        match args {
            CommandArgs::Heater(HeaterCommand::SetTemp(t)) => assert_eq!(t, 60.0),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unknown_subcommands() {
        assert!(CommandArgs::decode(Klass::Stepper, 5, 0).is_none());
        assert!(CommandArgs::decode(Klass::Axis, 0, 0).is_none());
    }

    #[test]
    fn direction_sign() {
        assert_eq!(Direction::Forward.sign(), 1);
        assert_eq!(Direction::Backward.sign(), -1);
    }
}
