//! Command pipeline: pending queue, submitted set, completion ring.
//!
//! Submissions append to `pending`; the worker dispatches them and moves
//! accepted asynchronous commands to `submitted`. Objects signal
//! completion into the ring; the worker resolves each id against
//! `submitted` exactly once (later signals for the same id find nothing
//! and are ignored, keeping completion monotonic per id).

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use emu_common::command::{Command, CommandArgs, CommandId};
use emu_common::error::{CoreError, CoreResult};
use emu_common::object::ObjectId;
use parking_lot::Mutex;
use static_assertions::const_assert;
use tracing::{debug, warn};

use crate::cache::{CacheBox, ObjectCache};
use crate::ring::{Completion, CompletionRing};

/// Where a command's completion is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSink {
    /// The host completion callback installed at `start`.
    Host,
    /// `on_command_complete` of the submitting object.
    Object(ObjectId),
}

/// A queued command plus its completion routing.
pub struct CommandRecord {
    pub cmd: Command,
    pub sink: CompletionSink,
}

// Records are slab cells; keep them comfortably inside a page.
const_assert!(size_of::<CommandRecord>() <= 128);

/// Pending/submitted queues plus the completion ring.
pub struct CommandPipeline {
    pending: Mutex<VecDeque<CacheBox<CommandRecord>>>,
    submitted: Mutex<HashMap<u64, CacheBox<CommandRecord>>>,
    ring: Mutex<CompletionRing>,
    cache: ObjectCache<CommandRecord>,
    next_id: AtomicU64,
    /// High-water mark of the pending queue, for pressure logging.
    high_water: AtomicUsize,
}

impl CommandPipeline {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(HashMap::new()),
            ring: Mutex::new(CompletionRing::new()),
            cache: ObjectCache::new(),
            next_id: AtomicU64::new(1),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Queue a command for dispatch on the next worker pass.
    pub fn submit(
        &self,
        target: ObjectId,
        args: CommandArgs,
        sink: CompletionSink,
    ) -> CoreResult<CommandId> {
        if !target.is_valid() {
            return Err(CoreError::InvalidArgument("invalid target id".into()));
        }
        let id = CommandId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = self.cache.alloc(CommandRecord {
            cmd: Command { id, target, args },
            sink,
        });
        let mut pending = self.pending.lock();
        pending.push_back(record);
        let depth = pending.len();
        drop(pending);

        let prev = self.high_water.load(Ordering::Relaxed);
        if depth > prev {
            self.high_water.store(depth, Ordering::Relaxed);
            if depth > 1024 && depth > prev * 2 {
                warn!(target: "emu.core.pipeline", "pending queue depth {depth}");
            }
        }
        Ok(id)
    }

    /// Drain everything queued so far, FIFO.
    pub fn take_pending(&self) -> Vec<CacheBox<CommandRecord>> {
        self.pending.lock().drain(..).collect()
    }

    /// Park an accepted asynchronous command until its completion signal.
    pub fn mark_submitted(&self, record: CacheBox<CommandRecord>) {
        self.submitted
            .lock()
            .insert(record.cmd.id.raw(), record);
    }

    /// Produce a completion signal. Loss under ring pressure is logged by
    /// the ring itself.
    pub fn signal_completion(&self, id: CommandId, result: i32) {
        self.ring.lock().push(Completion { id, result });
    }

    /// Consume all queued completion signals.
    pub fn drain_completions(&self) -> Vec<Completion> {
        let mut ring = self.ring.lock();
        std::iter::from_fn(|| ring.pop()).collect()
    }

    /// Remove a submitted command by id; at most one caller gets it.
    pub fn resolve(&self, id: CommandId) -> Option<CacheBox<CommandRecord>> {
        let record = self.submitted.lock().remove(&id.raw());
        if record.is_none() {
            debug!(target: "emu.core.pipeline", "completion for unknown command {id} ignored");
        }
        record
    }

    /// Commands dispatched and awaiting completion.
    pub fn submitted_len(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Largest observed pending depth.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    /// Completions lost to ring pressure.
    pub fn dropped_completions(&self) -> u64 {
        self.ring.lock().dropped()
    }
}

impl Default for CommandPipeline {
    fn default() -> Self {
        Self::new()
    }
}
