//! Virtual timers on the masked tick counter.
//!
//! Deadlines live in tick space and wrap at the configured width;
//! comparisons shift the masked difference into the sign bit so ordering
//! survives the wrap. Armed entries are kept sorted (earlier-inserted
//! first on ties). A due entry stays on the armed list while its callback
//! runs with the wheel unlocked; the Idle/Executing/ToRemove state
//! machine lets the callback unregister its own timer safely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use emu_common::object::ObjectId;
use parking_lot::Mutex;
use tracing::trace;

/// Internal timer callback: receives the current tick, returns the next
/// absolute deadline (0 = disarm).
pub type TimerFn = Box<dyn FnMut(u64) -> u64 + Send>;

/// What a timer fires.
pub enum TimerTarget {
    /// An object's `on_timer` entry point, dispatched by the timer thread
    /// through the runtime.
    Object(ObjectId),
    /// A core-internal callback.
    Callback(TimerFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum EntryState {
    Idle = 0,
    Executing = 1,
    ToRemove = 2,
}

struct TimerEntry {
    id: u64,
    /// Absolute masked-tick deadline.
    deadline: AtomicU64,
    state: AtomicU8,
    /// Held only while the entry executes.
    target: Mutex<TimerTarget>,
}

impl TimerEntry {
    #[inline]
    fn deadline(&self) -> u64 {
        self.deadline.load(Ordering::Acquire)
    }

    fn cas_state(&self, from: EntryState, to: EntryState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct WheelState {
    /// Armed entries, sorted by wrap-aware deadline; ties keep insertion
    /// order.
    armed: Vec<Arc<TimerEntry>>,
    /// Disarmed entries awaiting reschedule or unregister.
    disarmed: Vec<Arc<TimerEntry>>,
}

/// The timer wheel. The expiry loop lives on the runtime's timer thread
/// and calls [`TimerWheel::run_due`] on every trigger pulse.
pub struct TimerWheel {
    state: Mutex<WheelState>,
    next_id: AtomicU64,
    mask: u64,
    width: u32,
}

impl TimerWheel {
    /// Wheel over a tick counter of `width` bits.
    pub fn new(width: u32) -> Self {
        let width = width.clamp(16, 64);
        let mask = if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        Self {
            state: Mutex::new(WheelState {
                armed: Vec::new(),
                disarmed: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
            mask,
            width,
        }
    }

    /// True when `deadline` is due at tick `now`, wrap-aware.
    #[inline]
    pub fn due(&self, deadline: u64, now: u64) -> bool {
        self.masked_diff(deadline, now) <= 0
    }

    /// Sign-extended masked difference `a − b`.
    #[inline]
    fn masked_diff(&self, a: u64, b: u64) -> i64 {
        let diff = a.wrapping_sub(b) & self.mask;
        ((diff << (64 - self.width)) as i64) >> (64 - self.width)
    }

    /// Arm a new timer at an absolute tick deadline. Returns its id.
    pub fn register(&self, target: TimerTarget, deadline: u64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(TimerEntry {
            id,
            deadline: AtomicU64::new(deadline & self.mask),
            state: AtomicU8::new(EntryState::Idle as u8),
            target: Mutex::new(target),
        });
        let mut state = self.state.lock();
        self.insert_sorted(&mut state.armed, entry);
        id
    }

    /// Move a timer (armed or disarmed) to a new deadline.
    pub fn reschedule(&self, id: u64, deadline: u64) -> bool {
        let mut state = self.state.lock();
        let entry = if let Some(pos) = state.armed.iter().position(|e| e.id == id) {
            state.armed.remove(pos)
        } else if let Some(pos) = state.disarmed.iter().position(|e| e.id == id) {
            state.disarmed.remove(pos)
        } else {
            return false;
        };
        entry.deadline.store(deadline & self.mask, Ordering::Release);
        self.insert_sorted(&mut state.armed, entry);
        true
    }

    /// Remove a timer. If it is executing right now it is marked and
    /// freed when its callback returns.
    pub fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(pos) = state.armed.iter().position(|e| e.id == id) {
            if state.armed[pos].cas_state(EntryState::Executing, EntryState::ToRemove) {
                // The expiry loop owns it and will drop it on return.
                return;
            }
            state.armed.remove(pos);
        } else if let Some(pos) = state.disarmed.iter().position(|e| e.id == id) {
            state.disarmed.remove(pos);
        }
    }

    /// Number of armed entries.
    pub fn armed_len(&self) -> usize {
        self.state.lock().armed.len()
    }

    /// Expire every due entry at tick `now`. Object targets dispatch
    /// through `exec_object`, which returns the next deadline like a
    /// callback does.
    pub fn run_due(&self, now: u64, exec_object: &mut dyn FnMut(ObjectId, u64) -> u64) {
        let mut scan_from = 0usize;
        loop {
            let entry = {
                let mut state = self.state.lock();
                // Skip entries already claimed (Executing can only be set
                // by this thread, so in practice this walks past entries
                // whose callback re-armed them at a still-due deadline).
                let candidate = state
                    .armed
                    .iter()
                    .enumerate()
                    .skip(scan_from)
                    .find(|(_, e)| self.due(e.deadline(), now));
                let Some((pos, entry)) = candidate else {
                    return;
                };
                let entry = Arc::clone(entry);
                if !entry.cas_state(EntryState::Idle, EntryState::Executing) {
                    // ToRemove raced in while idle; drop it here.
                    state.armed.remove(pos);
                    continue;
                }
                scan_from = pos;
                entry
            };

            // Run outside the wheel lock so the callback may call back
            // into register/reschedule/unregister.
            let next = {
                let mut target = entry.target.lock();
                match &mut *target {
                    TimerTarget::Callback(f) => f(now),
                    TimerTarget::Object(id) => exec_object(*id, now),
                }
            };

            let mut state = self.state.lock();
            let pos = state.armed.iter().position(|e| e.id == entry.id);
            if !entry.cas_state(EntryState::Executing, EntryState::Idle) {
                // Unregistered from inside the callback: free it now.
                trace!(target: "emu.core.timers", "timer {} removed during callback", entry.id);
                if let Some(pos) = pos {
                    state.armed.remove(pos);
                }
                continue;
            }
            let Some(pos) = pos else { continue };
            let entry = state.armed.remove(pos);
            if next == 0 {
                state.disarmed.push(entry);
            } else {
                // Guard against a callback answering an already-due
                // deadline, which would spin this pulse forever.
                let next = if self.due(next & self.mask, now) {
                    now.wrapping_add(1) & self.mask
                } else {
                    next & self.mask
                };
                entry.deadline.store(next, Ordering::Release);
                self.insert_sorted(&mut state.armed, entry);
            }
        }
    }

    /// Insert keeping wrap-aware order; equal deadlines go after existing
    /// ones (insertion-order tie-break).
    fn insert_sorted(&self, armed: &mut Vec<Arc<TimerEntry>>, entry: Arc<TimerEntry>) {
        let deadline = entry.deadline();
        let pos = armed
            .iter()
            .position(|e| self.masked_diff(deadline, e.deadline()) < 0)
            .unwrap_or(armed.len());
        armed.insert(pos, entry);
    }
}
