//! Virtual clock and the time-control thread.
//!
//! The time-control thread paces the whole emulator: each iteration it
//! sleeps one pacing period, reads `CLOCK_MONOTONIC_RAW`, publishes
//! `runtime_ns` and the masked tick counter, and pulses the trigger that
//! wakes updaters, the worker and the timer thread. Pauses freeze the
//! published runtime by accumulating the paused wall-clock span.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use nix::time::{ClockId, clock_gettime};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::trigger::Trigger;

/// Time-control state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Not running; threads exit at their next loop head.
    Stop = 0,
    /// `start` was called; the time thread has not entered its loop yet.
    Run = 1,
    /// Ticks are being published.
    Running = 2,
    /// Publication ceased; runtime frozen.
    Paused = 3,
}

impl RunState {
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Run,
            2 => Self::Running,
            3 => Self::Paused,
            _ => Self::Stop,
        }
    }
}

/// Per-pulse pacing statistics, O(1) to record.
#[derive(Debug, Clone, Copy)]
pub struct TickStats {
    /// Pulses published.
    pub pulses: u64,
    /// Smallest observed wake jitter [ns].
    pub min_jitter_ns: u64,
    /// Largest observed wake jitter [ns].
    pub max_jitter_ns: u64,
    /// Running jitter sum for averaging.
    pub sum_jitter_ns: u64,
}

impl TickStats {
    const fn new() -> Self {
        Self {
            pulses: 0,
            min_jitter_ns: u64::MAX,
            max_jitter_ns: 0,
            sum_jitter_ns: 0,
        }
    }

    #[inline]
    fn record(&mut self, jitter_ns: u64) {
        self.pulses += 1;
        if jitter_ns < self.min_jitter_ns {
            self.min_jitter_ns = jitter_ns;
        }
        if jitter_ns > self.max_jitter_ns {
            self.max_jitter_ns = jitter_ns;
        }
        self.sum_jitter_ns += jitter_ns;
    }

    /// Average wake jitter [ns]; 0 before the first pulse.
    pub fn avg_jitter_ns(&self) -> u64 {
        if self.pulses == 0 {
            0
        } else {
            self.sum_jitter_ns / self.pulses
        }
    }
}

/// Read the raw monotonic clock [ns].
pub fn monotonic_ns() -> u64 {
    // MONOTONIC_RAW is immune to NTP slewing; the emulator's notion of
    // wall-clock time must not rubber-band.
    match clock_gettime(ClockId::CLOCK_MONOTONIC_RAW) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(e) => {
            warn!(target: "emu.core.clock", "clock_gettime failed: {e}, falling back");
            let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).unwrap_or_else(|_| {
                nix::sys::time::TimeSpec::new(0, 0)
            });
            ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64
        }
    }
}

/// The published virtual clock plus the control word and trigger.
pub struct Clock {
    /// Masked tick counter.
    ticks: AtomicU64,
    /// Monotonic nanoseconds since start, pauses excluded.
    runtime_ns: AtomicU64,
    /// Nanoseconds per controller tick.
    tick_period_ns: AtomicU64,
    /// Nanoseconds per pacing pulse.
    pacing_period_ns: AtomicU64,
    /// Tick counter mask for the configured width.
    tick_mask: u64,
    /// Control word.
    state: AtomicU8,
    /// Wake source for updaters, worker and timers.
    pub trigger: Trigger,
    stats: Mutex<TickStats>,
}

impl Clock {
    /// Create a clock with a tick counter of `width` bits (16–64).
    pub fn new(width: u32) -> Self {
        let width = width.clamp(16, 64);
        let tick_mask = if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        Self {
            ticks: AtomicU64::new(0),
            runtime_ns: AtomicU64::new(0),
            tick_period_ns: AtomicU64::new(1_000_000),
            pacing_period_ns: AtomicU64::new(1_000_000),
            tick_mask,
            state: AtomicU8::new(RunState::Stop as u8),
            trigger: Trigger::new(),
            stats: Mutex::new(TickStats::new()),
        }
    }

    /// Set tick and pacing frequencies. Called by `start` before the time
    /// thread is spawned.
    pub fn configure(&self, tick_hz: u64, pacing_hz: u64) {
        let tick_period = 1_000_000_000 / tick_hz.max(1);
        let pacing_period = 1_000_000_000 / pacing_hz.max(1);
        self.tick_period_ns.store(tick_period.max(1), Ordering::Release);
        self.pacing_period_ns
            .store(pacing_period.max(1), Ordering::Release);
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    #[inline]
    pub fn runtime_ns(&self) -> u64 {
        self.runtime_ns.load(Ordering::Acquire)
    }

    #[inline]
    pub fn tick_mask(&self) -> u64 {
        self.tick_mask
    }

    #[inline]
    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_run_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Copy of the pacing statistics.
    pub fn tick_stats(&self) -> TickStats {
        *self.stats.lock()
    }

    /// Publish a runtime reading: runtime first, ticks second, both with
    /// release semantics so a reader that observes the tick also observes
    /// the runtime that produced it.
    fn publish(&self, runtime_ns: u64) {
        let period = self.tick_period_ns.load(Ordering::Acquire);
        let ticks = (runtime_ns / period) & self.tick_mask;
        self.runtime_ns.store(runtime_ns, Ordering::Release);
        self.ticks.store(ticks, Ordering::Release);
    }
}

/// Pin the calling thread to `cpu`. Missing CPUs and denied syscalls are
/// non-fatal.
pub(crate) fn pin_to_cpu(cpu: usize) {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    if set.set(cpu).is_err() {
        debug!(target: "emu.core.clock", "cpu {cpu} outside CpuSet range");
        return;
    }
    match sched_setaffinity(Pid::from_raw(0), &set) {
        Ok(()) => trace!(target: "emu.core.clock", "pinned to cpu {cpu}"),
        Err(e) => debug!(target: "emu.core.clock", "sched_setaffinity({cpu}) failed: {e}"),
    }
}

/// Opt-in SCHED_FIFO elevation; silently degrades when the process lacks
/// the capability.
pub(crate) fn elevate_priority(priority: i32) {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: sched_setscheduler only reads the param struct.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        debug!(
            target: "emu.core.clock",
            "SCHED_FIFO({priority}) unavailable: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Body of the time-control thread.
///
/// Runs until the control word turns [`RunState::Stop`]. While paused the
/// loop keeps sleeping but neither publishes nor pulses; the paused span
/// is subtracted from subsequent runtime readings.
pub fn time_control_loop(clock: Arc<Clock>, cpu: Option<usize>, rt_priority: Option<i32>) {
    if let Some(cpu) = cpu {
        pin_to_cpu(cpu);
    }
    if let Some(prio) = rt_priority {
        elevate_priority(prio);
    }

    let pacing = Duration::from_nanos(clock.pacing_period_ns.load(Ordering::Acquire));
    let start = monotonic_ns();
    let mut paused_total: u64 = 0;
    let mut pause_began: Option<u64> = None;
    let mut last_wake = start;

    if clock.run_state() == RunState::Run {
        clock.set_run_state(RunState::Running);
    }
    debug!(
        target: "emu.core.clock",
        "time-control running, pacing {} ns, tick period {} ns",
        pacing.as_nanos(),
        clock.tick_period_ns.load(Ordering::Acquire)
    );

    loop {
        std::thread::sleep(pacing);
        let now = monotonic_ns();

        match clock.run_state() {
            RunState::Stop => break,
            RunState::Paused => {
                if pause_began.is_none() {
                    pause_began = Some(now);
                    trace!(target: "emu.core.clock", "paused at runtime {}", clock.runtime_ns());
                }
                last_wake = now;
                continue;
            }
            RunState::Run | RunState::Running => {
                if let Some(began) = pause_began.take() {
                    paused_total += now - began;
                    trace!(target: "emu.core.clock", "resumed, paused span {} ns", now - began);
                }
            }
        }

        let jitter = (now - last_wake).abs_diff(pacing.as_nanos() as u64);
        last_wake = now;

        clock.publish(now - start - paused_total);
        clock.stats.lock().record(jitter);
        clock.trigger.pulse();
    }

    // Final pulse releases any waiter still parked on the trigger.
    clock.trigger.pulse();
    debug!(target: "emu.core.clock", "time-control exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_roundtrip() {
        for s in [
            RunState::Stop,
            RunState::Run,
            RunState::Running,
            RunState::Paused,
        ] {
            assert_eq!(RunState::from_u8(s as u8), s);
        }
        assert_eq!(RunState::from_u8(200), RunState::Stop);
    }

    #[test]
    fn mask_width() {
        assert_eq!(Clock::new(16).tick_mask(), 0xFFFF);
        assert_eq!(Clock::new(32).tick_mask(), 0xFFFF_FFFF);
        assert_eq!(Clock::new(64).tick_mask(), u64::MAX);
        // Widths are clamped into the supported range.
        assert_eq!(Clock::new(8).tick_mask(), 0xFFFF);
    }

    #[test]
    fn publish_masks_ticks() {
        let clock = Clock::new(16);
        clock.configure(1_000_000, 1000); // 1 µs per tick
        clock.publish(70_000_000); // 70 ms → 70000 ticks → wraps at 65536
        assert_eq!(clock.ticks(), 70_000 & 0xFFFF);
        assert_eq!(clock.runtime_ns(), 70_000_000);
    }

    #[test]
    fn stats_record() {
        let mut stats = TickStats::new();
        assert_eq!(stats.avg_jitter_ns(), 0);
        stats.record(100);
        stats.record(300);
        assert_eq!(stats.pulses, 2);
        assert_eq!(stats.min_jitter_ns, 100);
        assert_eq!(stats.max_jitter_ns, 300);
        assert_eq!(stats.avg_jitter_ns(), 200);
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = monotonic_ns();
        std::thread::sleep(Duration::from_millis(2));
        let b = monotonic_ns();
        assert!(b > a);
    }

    #[test]
    fn time_loop_publishes_and_stops() {
        let clock = Arc::new(Clock::new(32));
        clock.configure(1_000_000, 2000);
        clock.set_run_state(RunState::Run);
        let handle = {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || time_control_loop(clock, None, None))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(clock.run_state(), RunState::Running);
        assert!(clock.runtime_ns() > 0);
        assert!(clock.ticks() > 0);
        clock.set_run_state(RunState::Stop);
        handle.join().unwrap();
    }

    #[test]
    fn pause_freezes_runtime() {
        let clock = Arc::new(Clock::new(32));
        clock.configure(1_000_000, 2000);
        clock.set_run_state(RunState::Run);
        let handle = {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || time_control_loop(clock, None, None))
        };
        std::thread::sleep(Duration::from_millis(30));
        clock.set_run_state(RunState::Paused);
        std::thread::sleep(Duration::from_millis(5));
        let frozen = clock.runtime_ns();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(clock.runtime_ns(), frozen);

        clock.set_run_state(RunState::Running);
        std::thread::sleep(Duration::from_millis(30));
        let resumed = clock.runtime_ns();
        assert!(resumed > frozen);
        // The paused span is excluded: runtime advanced far less than the
        // elapsed wall clock since the pause began.
        assert!(resumed - frozen < 40_000_000);

        clock.set_run_state(RunState::Stop);
        handle.join().unwrap();
    }
}
