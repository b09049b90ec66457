//! The closed event set and typed payloads.

use serde::{Deserialize, Serialize};

use crate::klass::Klass;
use crate::object::ObjectId;
use crate::state::Position;

/// Event types objects may emit. Closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventKind {
    /// A stepper finished a MOVE; payload carries the step counter.
    StepperMoveComplete = 0,
    /// A heater reached its SET_TEMP target; payload carries the target.
    HeaterTempReached = 1,
    /// An endstop level changed; payload carries the new level.
    EndstopTrigger = 2,
    /// An axis became homed.
    AxisHomed = 3,
    /// The probe trigger condition rose; payload carries the position.
    ProbeTriggered = 4,
    /// Every toolhead axis reached origin; payload carries the position.
    ToolheadOrigin = 5,
}

/// Number of event kinds, for per-kind subscription tables.
pub const EVENT_KIND_COUNT: usize = 6;

impl EventKind {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::StepperMoveComplete),
            1 => Some(Self::HeaterTempReached),
            2 => Some(Self::EndstopTrigger),
            3 => Some(Self::AxisHomed),
            4 => Some(Self::ProbeTriggered),
            5 => Some(Self::ToolheadOrigin),
            _ => None,
        }
    }
}

/// Typed event payload. Fixed-size; event records are slab-recycled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    None,
    /// Absolute step counter.
    Steps(i64),
    /// Temperature [°C].
    Temperature(f64),
    /// Digital level.
    Level(bool),
    /// Cartesian position [mm].
    Position(Position),
}

impl Default for EventPayload {
    fn default() -> Self {
        Self::None
    }
}

/// An event record as queued and delivered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Event type.
    pub kind: EventKind,
    /// Object that produced the event.
    pub origin: ObjectId,
    /// Klass of the origin object.
    pub klass: Klass,
    /// Typed payload.
    pub payload: EventPayload,
}
