//! # EMU Core
//!
//! The emulator runtime: a virtual clock driven by a dedicated
//! time-control thread, per-object update threads woken by a shared
//! trigger, a worker thread draining commands, events and completions,
//! an object registry with pluggable klass factories, a slab cache for
//! queue records, and a masked-width virtual timer wheel.
//!
//! ## Thread model
//!
//! - **time-control** publishes `ticks`/`runtime_ns` and pulses the
//!   trigger at the pacing frequency.
//! - **updaters** (one per object with the UPDATE capability) wake on the
//!   trigger, advance their object, publish its snapshot, and self-pace.
//! - **worker** dispatches pending commands, delivers events, and routes
//!   completions to the host callback or the submitting object.
//! - **timers** expires due virtual-timer entries on each pulse.
//!
//! Entry points of a single object are serialized by its slot mutex;
//! cross-object reads go through published snapshots only.

pub mod bus;
pub mod cache;
pub mod clock;
pub mod pipeline;
pub mod registry;
pub mod ring;
pub mod runtime;
pub mod timers;
pub mod trigger;

pub use bus::EventHandler;
pub use clock::{RunState, TickStats};
pub use runtime::{Runtime, RuntimeConfig};
