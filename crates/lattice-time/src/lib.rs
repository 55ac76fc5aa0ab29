//! Monotonic clock sources and interval timers.
//!
//! Three timebases are tracked: millisecond monotonic, second monotonic
//! (derived from the millisecond counter by carrying whole seconds off
//! as they accumulate) and "chrono seconds" — wall-clock seconds that
//! keep advancing across host suspend/resume, tracked independently of
//! the monotonic counters.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Copy, Clone, Debug, Default)]
struct State {
    ms: u64,
    s: u64,
    chrono_s: u64,
}

/// A shared, advanceable clock handle. Cloning a `Clock` shares the same
/// underlying counters (this subsystem is single-threaded, so `Rc` is
/// enough — no atomics or locking are needed).
#[derive(Clone)]
pub struct Clock(Rc<Cell<State>>);

impl Clock {
    /// A clock seeded from the OS. `sample` never re-reads the OS itself;
    /// call `tick` once per scheduling loop iteration to refresh it.
    pub fn system() -> Self {
        let chrono_s = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        Self(Rc::new(Cell::new(State { ms: 0, s: 0, chrono_s })))
    }

    /// A clock with all three counters pinned at zero, advanced only via
    /// `advance`/`advance_ms`/`advance_chrono`. Used by tests that need
    /// deterministic retransmission/keep-alive timing.
    pub fn mock() -> Self {
        Self(Rc::new(Cell::new(State::default())))
    }

    /// Refreshes the millisecond/second counters from the OS monotonic
    /// clock and the chrono counter from the wall clock. No-op on a
    /// mocked clock's test driver is `advance` instead.
    pub fn tick(&self, monotonic: Duration, wall_clock_secs: u64) {
        let mut st = self.0.get();
        st.ms = monotonic.as_millis() as u64;
        st.s = monotonic.as_secs();
        st.chrono_s = wall_clock_secs;
        self.0.set(st);
    }

    /// Test-mode driver: advances the millisecond clock by `delta_ms`,
    /// carrying into the second clock only when the accumulated
    /// millisecond remainder crosses a whole second — not once per call.
    pub fn advance_ms(&self, delta_ms: u64) {
        let mut st = self.0.get();
        let carry = (st.ms % 1000 + delta_ms) / 1000;
        st.ms += delta_ms;
        st.s += carry;
        self.0.set(st);
    }

    /// Test-mode driver: advances the chrono-seconds counter. Independent
    /// of the monotonic counters because it must track real elapsed time
    /// across a simulated suspend/resume, which the monotonic clock would
    /// not observe.
    pub fn advance_chrono(&self, delta_s: u64) {
        let mut st = self.0.get();
        st.chrono_s += delta_s;
        self.0.set(st);
    }

    /// Convenience: advances both the monotonic and chrono clocks by the
    /// same wall-clock duration.
    pub fn advance(&self, delta: Duration) {
        self.advance_ms(delta.as_millis() as u64);
        self.advance_chrono(delta.as_secs());
    }

    fn sample(&self, base: TimeBase) -> u64 {
        let st = self.0.get();
        match base {
            TimeBase::Millis => st.ms,
            TimeBase::Seconds => st.s,
            TimeBase::ChronoSeconds => st.chrono_s,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Selects which of the three clock sources a `Timer` samples.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimeBase {
    Millis,
    Seconds,
    ChronoSeconds,
}

/// An interval timer: `(start, interval, timebase)`. `running` iff the
/// interval is non-zero; `expired` iff running and the elapsed time since
/// `start` is at least the interval.
#[derive(Copy, Clone, Debug)]
pub struct Timer {
    start: u64,
    interval: u64,
    base: TimeBase,
}

impl Timer {
    pub fn new(base: TimeBase) -> Self {
        Self { start: 0, interval: 0, base }
    }

    /// Arms the timer: samples `clock` as the new start and sets the
    /// interval.
    pub fn start(&mut self, clock: &Clock, interval: Duration) {
        self.start = clock.sample(self.base);
        self.interval = self.to_base_units(interval);
    }

    /// Disarms the timer entirely.
    pub fn stop(&mut self) {
        self.start = 0;
        self.interval = 0;
    }

    /// Resets the start sample without changing the interval.
    pub fn restart(&mut self, clock: &Clock) {
        self.start = clock.sample(self.base);
    }

    pub fn running(&self) -> bool {
        self.interval != 0
    }

    pub fn value(&self, clock: &Clock) -> u64 {
        clock.sample(self.base).saturating_sub(self.start)
    }

    pub fn remaining(&self, clock: &Clock) -> u64 {
        self.interval.saturating_sub(self.value(clock))
    }

    pub fn expired(&self, clock: &Clock) -> bool {
        self.interval > 0 && self.value(clock) >= self.interval
    }

    fn to_base_units(&self, interval: Duration) -> u64 {
        match self.base {
            TimeBase::Millis => interval.as_millis() as u64,
            TimeBase::Seconds | TimeBase::ChronoSeconds => interval.as_secs(),
        }
    }
}
