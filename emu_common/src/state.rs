//! Published state snapshots.
//!
//! Every object copies its externally visible state into one of these
//! structs at the end of each update. Snapshots are what `get_status` and
//! cross-object reads observe; they are plain copies, so a reader never
//! sees a half-written update.

use serde::{Deserialize, Serialize};

use crate::klass::{AxisType, EndstopKind, Klass};

/// Cartesian position [mm].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Round every component to `decimals` places.
    pub fn rounded(&self, decimals: i32) -> Self {
        let scale = 10f64.powi(decimals);
        Self {
            x: (self.x * scale).round() / scale,
            y: (self.y * scale).round() / scale,
            z: (self.z * scale).round() / scale,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Stepper state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepperSnapshot {
    /// Motor energized.
    pub enabled: bool,
    /// Absolute step counter.
    pub current_step: i64,
    /// Configured cruise speed [steps/s].
    pub steps_per_sec: f64,
    /// A MOVE is in progress.
    pub moving: bool,
    /// Pin-driven mode active.
    pub pin_mode: bool,
}

/// Endstop state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndstopSnapshot {
    pub kind: EndstopKind,
    pub triggered: bool,
}

/// Heater state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeaterSnapshot {
    /// Sensor temperature [°C].
    pub temperature: f64,
    /// Active SET_TEMP target [°C]; 0 when idle.
    pub target: f64,
    /// Rated heater power [W].
    pub power: f64,
    /// Current drive duty in [0, 1].
    pub duty: f64,
    /// Pin-driven mode active.
    pub pin_mode: bool,
}

/// Thermistor state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThermistorSnapshot {
    /// Sensed temperature [°C].
    pub temperature: f64,
    /// Beta-model resistance [Ω].
    pub resistance: f64,
}

/// Probe state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeSnapshot {
    pub triggered: bool,
    /// Offset-adjusted position at the last poll.
    pub position: Position,
}

/// Axis state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSnapshot {
    pub axis_type: AxisType,
    /// Position along the axis [mm].
    pub position: f64,
    /// Travel length [mm].
    pub length: f64,
    pub homed: bool,
}

/// Toolhead state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolheadSnapshot {
    /// Cartesian position, rounded to the reporting precision.
    pub position: Position,
    /// Every bound axis sits at origin.
    pub at_origin: bool,
}

/// PWM state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PwmSnapshot {
    pub enabled: bool,
    pub frequency: f64,
    pub duty: f64,
    /// Instantaneous output level.
    pub level: bool,
}

/// Digital-pin state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DigitalPinSnapshot {
    pub level: bool,
}

/// Tagged snapshot, one variant per klass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ObjectState {
    Stepper(StepperSnapshot),
    Endstop(EndstopSnapshot),
    Heater(HeaterSnapshot),
    Thermistor(ThermistorSnapshot),
    Probe(ProbeSnapshot),
    Axis(AxisSnapshot),
    Toolhead(ToolheadSnapshot),
    Pwm(PwmSnapshot),
    DigitalPin(DigitalPinSnapshot),
}

impl ObjectState {
    /// Klass of the object this snapshot belongs to.
    pub const fn klass(&self) -> Klass {
        match self {
            Self::Stepper(_) => Klass::Stepper,
            Self::Endstop(_) => Klass::Endstop,
            Self::Heater(_) => Klass::Heater,
            Self::Thermistor(_) => Klass::Thermistor,
            Self::Probe(_) => Klass::Probe,
            Self::Axis(_) => Klass::Axis,
            Self::Toolhead(_) => Klass::Toolhead,
            Self::Pwm(_) => Klass::Pwm,
            Self::DigitalPin(_) => Klass::DigitalPin,
        }
    }

    /// Convenience accessor for axis snapshots.
    pub fn as_axis(&self) -> Option<&AxisSnapshot> {
        match self {
            Self::Axis(s) => Some(s),
            _ => None,
        }
    }

    /// Convenience accessor for stepper snapshots.
    pub fn as_stepper(&self) -> Option<&StepperSnapshot> {
        match self {
            Self::Stepper(s) => Some(s),
            _ => None,
        }
    }
}
