//! The `SimObject` capability trait and the `CoreHandle` call interface.
//!
//! `SimObject` is the vtable every hardware object implements; the runtime
//! only calls the entry points the object's capability set declares.
//! `CoreHandle` is the object-side view of the runtime (lookup, listing,
//! snapshots, command submission, completion, events, virtual timers); it
//! is wired in at creation and keeps cross-object references as ids, never
//! borrows.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandArgs, CommandId, Disposition};
use crate::consts::DEFAULT_UPDATE_HZ;
use crate::error::CoreResult;
use crate::events::{Event, EventKind, EventPayload};
use crate::klass::{Capabilities, Klass};
use crate::state::ObjectState;

/// Opaque, stable object identity. Non-zero for live objects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The invalid id (0).
    pub const INVALID: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Runtime services available to objects.
///
/// Every method is safe to call from `update`, `exec_command`, timer and
/// completion entry points. Cross-object reads return copied snapshots;
/// submissions are queued, never executed inline.
pub trait CoreHandle: Send + Sync {
    /// Resolve `(klass, name)` to an id. Case-sensitive full compare.
    fn lookup(&self, klass: Klass, name: &str) -> Option<ObjectId>;

    /// All ids of a klass, in insertion order.
    fn list_objects(&self, klass: Klass) -> Vec<ObjectId>;

    /// Copy of the target's published snapshot. `None` for unknown ids
    /// and virtual objects.
    fn object_state(&self, id: ObjectId) -> Option<ObjectState>;

    /// Current masked tick counter.
    fn ticks(&self) -> u64;

    /// Monotonic nanoseconds since `start` (pauses excluded).
    fn runtime_ns(&self) -> u64;

    /// Queue a command to another object. Completion is routed back to
    /// `origin` through [`SimObject::on_command_complete`].
    fn submit_command(
        &self,
        origin: ObjectId,
        target: ObjectId,
        args: CommandArgs,
    ) -> CoreResult<CommandId>;

    /// Signal completion of a previously accepted command.
    fn complete_command(&self, id: CommandId, result: i32);

    /// Queue an event for delivery to subscribers.
    fn submit_event(&self, kind: EventKind, origin: ObjectId, payload: EventPayload);

    /// Arm a virtual timer that fires `object`'s `on_timer` at the given
    /// absolute tick deadline. Returns the timer id.
    fn set_timer(&self, object: ObjectId, deadline_ticks: u64) -> u64;

    /// Disarm and free a virtual timer.
    fn cancel_timer(&self, timer: u64);
}

/// Factory signature registered per klass: `(name, config blob)` to a
/// boxed object. The blob layout is klass-specific; each constructor
/// decodes its own.
pub type ObjectFactory = fn(&str, &[u8]) -> CoreResult<Box<dyn SimObject>>;

/// A simulated hardware object.
///
/// # Lifecycle
///
/// `create → init → (reset | update | exec_command | state)* → destroy`.
/// The runtime serializes all entry points of one object; `state()` must
/// be a cheap copy because it is snapshotted after every update.
pub trait SimObject: Send {
    /// Owning klass.
    fn klass(&self) -> Klass;

    /// Object name (unique within the klass).
    fn name(&self) -> &str;

    /// Capability set; the runtime only invokes declared entry points.
    fn capabilities(&self) -> Capabilities;

    /// Self-pacing rate of the object's update thread [Hz].
    fn update_frequency(&self) -> f64 {
        DEFAULT_UPDATE_HZ
    }

    /// Resolve references to other objects; called once, in registry
    /// order, before the clock starts.
    fn init(&mut self, _id: ObjectId, _core: &dyn CoreHandle) -> CoreResult<()> {
        Ok(())
    }

    /// Return to the documented post-create defaults.
    fn reset(&mut self, _core: &dyn CoreHandle) {}

    /// Accept or reject a command. Must not block: either finish
    /// synchronously, or set internal flags the next `update` acts on and
    /// return [`Disposition::Pending`]. Rejects with a negative errno.
    fn exec_command(&mut self, _cmd: &Command, _core: &dyn CoreHandle) -> Result<Disposition, i32> {
        Err(-libc::ENOTSUP)
    }

    /// Advance the model to `runtime_ns`.
    fn update(&mut self, _ticks: u64, _runtime_ns: u64, _core: &dyn CoreHandle) {}

    /// Copy of the externally visible state.
    fn state(&self) -> ObjectState;

    /// Internal event subscription callback.
    fn on_event(&mut self, _event: &Event, _core: &dyn CoreHandle) {}

    /// Completion of a command this object submitted.
    fn on_command_complete(&mut self, _id: CommandId, _result: i32, _core: &dyn CoreHandle) {}

    /// Virtual-timer callback; returns the next absolute tick deadline,
    /// 0 to disarm.
    fn on_timer(&mut self, _now_ticks: u64, _core: &dyn CoreHandle) -> u64 {
        0
    }

    /// Shared pin word for pin-driven modes, when the object has one.
    fn pins(&self) -> Option<Arc<AtomicU32>> {
        None
    }

    /// Release auxiliary resources (monitor threads). Called once at
    /// runtime teardown.
    fn destroy(&mut self) {}
}
