//! EMU Common Library
//!
//! Shared types for the EMU machine-hardware emulator workspace: the klass
//! enumeration, the `SimObject` capability trait, typed command and event
//! payloads, published state snapshots, klass configuration structs, and
//! the runtime error taxonomy.
//!
//! # Module Structure
//!
//! - [`klass`] - Object klasses, capability flags, axis/endstop kinds
//! - [`object`] - `SimObject` trait, `CoreHandle` call interface, ids
//! - [`command`] - Typed per-klass commands and subcommand ids
//! - [`events`] - Closed event set and payloads
//! - [`state`] - Per-klass published state snapshots
//! - [`config`] - Klass configuration blobs and the material table
//! - [`error`] - Error taxonomy, errno mapping, error-id encoding
//! - [`consts`] - Physical and runtime constants

pub mod command;
pub mod config;
pub mod consts;
pub mod error;
pub mod events;
pub mod klass;
pub mod object;
pub mod state;

pub use command::{Command, CommandArgs, CommandId, Direction, Disposition};
pub use error::{CoreError, CoreResult};
pub use events::{Event, EventKind, EventPayload};
pub use klass::{AxisType, Capabilities, EndstopKind, Klass};
pub use object::{CoreHandle, ObjectFactory, ObjectId, SimObject};
pub use state::{ObjectState, Position};
