//! Time sources for the queues and rate limiters.
//!
//! Everything that needs "now" or a timer reads it through [`Clock`], so tests can
//! swap the wall clock for a [`FakeClock`] and step time deterministically.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A source of time and timers
pub trait Clock: Send + Sync {
    /// Current instant on this clock
    fn now(&self) -> Instant;

    /// One-shot timer that delivers a single instant once `duration` has passed
    fn after(&self, duration: Duration) -> Receiver<Instant>;

    /// Periodic timer that delivers an instant every `period`
    fn ticker(&self, period: Duration) -> Receiver<Instant>;

    /// Time elapsed on this clock since `earlier`
    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Wall clock backed by the OS monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn after(&self, duration: Duration) -> Receiver<Instant> {
        crossbeam_channel::after(duration)
    }

    fn ticker(&self, period: Duration) -> Receiver<Instant> {
        crossbeam_channel::tick(period)
    }
}

struct FakeTimer {
    deadline: Instant,
    period: Option<Duration>,
    sender: Sender<Instant>,
}

struct FakeClockState {
    now: Instant,
    timers: Vec<FakeTimer>,
}

/// Manually driven clock for tests.
///
/// Time only moves on [`FakeClock::step`] or [`FakeClock::set_time`]; every timer whose
/// deadline has been reached fires at that moment. Tickers deliver at most one pending
/// tick, like the real ones.
pub struct FakeClock {
    state: Mutex<FakeClockState>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::at(Instant::now())
    }

    pub fn at(start: Instant) -> Self {
        Self {
            state: Mutex::new(FakeClockState {
                now: start,
                timers: Vec::new(),
            }),
        }
    }

    /// Advance the clock by `duration` and fire any due timers
    pub fn step(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.now += duration;
        Self::fire_due(&mut state);
    }

    /// Move the clock to `instant` (never backwards) and fire any due timers
    pub fn set_time(&self, instant: Instant) {
        let mut state = self.state.lock();
        if instant > state.now {
            state.now = instant;
        }
        Self::fire_due(&mut state);
    }

    /// Number of armed one-shot timers. Timers whose receiver was dropped still count
    /// until their deadline passes.
    pub fn pending_timers(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|timer| timer.period.is_none())
            .count()
    }

    pub fn has_waiters(&self) -> bool {
        self.pending_timers() > 0
    }

    fn register(&self, duration: Duration, period: Option<Duration>) -> Receiver<Instant> {
        let (sender, receiver) = bounded(1);
        let mut state = self.state.lock();
        let deadline = state.now + duration;
        state.timers.push(FakeTimer {
            deadline,
            period,
            sender,
        });
        Self::fire_due(&mut state);
        receiver
    }

    fn fire_due(state: &mut FakeClockState) {
        let now = state.now;
        state.timers.retain_mut(|timer| {
            if timer.deadline > now {
                return true;
            }
            // A full channel means an earlier tick is still unread; drop this one.
            let delivered = !matches!(
                timer.sender.try_send(now),
                Err(crossbeam_channel::TrySendError::Disconnected(_))
            );
            match timer.period {
                Some(period) if delivered && !period.is_zero() => {
                    while timer.deadline <= now {
                        timer.deadline += period;
                    }
                    true
                }
                _ => false,
            }
        });
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn after(&self, duration: Duration) -> Receiver<Instant> {
        self.register(duration, None)
    }

    fn ticker(&self, period: Duration) -> Receiver<Instant> {
        self.register(period, Some(period))
    }
}

impl std::fmt::Debug for FakeClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeClock")
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .finish()
    }
}
