//! Object klasses and capability flags.
//!
//! Defines `Klass`, the closed enumeration of hardware object kinds, the
//! `Capabilities` set each object advertises, and the small kind enums
//! shared between axes and endstops.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The kind of a hardware object. Closed enumeration; ids start at 1 so
/// that 0 stays free as an invalid discriminant on the raw façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Klass {
    /// Stepper motor.
    Stepper = 1,
    /// Endstop switch.
    Endstop = 2,
    /// Heater with a thermal body.
    Heater = 3,
    /// Thermistor sensor.
    Thermistor = 4,
    /// Z-probe.
    Probe = 5,
    /// Motion axis.
    Axis = 6,
    /// Toolhead (kinematics composition over axes).
    Toolhead = 7,
    /// PWM output.
    Pwm = 8,
    /// Digital pin.
    DigitalPin = 9,
}

/// One past the highest valid klass discriminant.
pub const KLASS_MAX: u8 = 10;

/// All klasses in enumeration order. Registry iteration (init, reset,
/// status dumps) follows this order.
pub const ALL_KLASSES: [Klass; 9] = [
    Klass::Stepper,
    Klass::Endstop,
    Klass::Heater,
    Klass::Thermistor,
    Klass::Probe,
    Klass::Axis,
    Klass::Toolhead,
    Klass::Pwm,
    Klass::DigitalPin,
];

impl Klass {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Stepper),
            2 => Some(Self::Endstop),
            3 => Some(Self::Heater),
            4 => Some(Self::Thermistor),
            5 => Some(Self::Probe),
            6 => Some(Self::Axis),
            7 => Some(Self::Toolhead),
            8 => Some(Self::Pwm),
            9 => Some(Self::DigitalPin),
            _ => None,
        }
    }

    /// Lower-case name used in config files and log messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stepper => "stepper",
            Self::Endstop => "endstop",
            Self::Heater => "heater",
            Self::Thermistor => "thermistor",
            Self::Probe => "probe",
            Self::Axis => "axis",
            Self::Toolhead => "toolhead",
            Self::Pwm => "pwm",
            Self::DigitalPin => "digital_pin",
        }
    }
}

impl std::fmt::Display for Klass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Capability set advertised by an object. The runtime only invokes
    /// entry points the object has declared.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const INIT = 1 << 0;
        const RESET = 1 << 1;
        const EXEC_COMMAND = 1 << 2;
        const GET_STATE = 1 << 3;
        const UPDATE = 1 << 4;
        const DESTROY = 1 << 5;
    }
}

impl Capabilities {
    /// The capability set shared by every concrete object: init, reset,
    /// state publication and periodic updates.
    pub const BASE: Self = Self::INIT
        .union(Self::RESET)
        .union(Self::GET_STATE)
        .union(Self::UPDATE);
}

/// Axis designator. E is the extruder-style auxiliary axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum AxisType {
    X = 0,
    Y = 1,
    Z = 2,
    A = 3,
    B = 4,
    C = 5,
    E = 6,
}

impl AxisType {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            3 => Some(Self::A),
            4 => Some(Self::B),
            5 => Some(Self::C),
            6 => Some(Self::E),
            _ => None,
        }
    }
}

/// Which end of the travel an endstop guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EndstopKind {
    /// Triggers at position 0.
    Min = 0,
    /// Triggers at position == length.
    Max = 1,
}

impl Default for EndstopKind {
    fn default() -> Self {
        Self::Min
    }
}
