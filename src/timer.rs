//! Timer service: coarse wall-clock timers fired on the periodic tick.
//! Registration is append-only before `run`, at list head (LIFO fire order).

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait TimerHandler: std::fmt::Debug + Send + Sync {
    fn fire(&self);
}

struct TimerEntry {
    interval: Duration,
    last: Mutex<Instant>,
    handler: Box<dyn TimerHandler>,
}

impl std::fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEntry").field("interval", &self.interval).finish_non_exhaustive()
    }
}

/// No ordering guarantee is required between distinct timers; all eligible
/// timers fire once per tick, in registration (LIFO) order.
#[derive(Debug, Default)]
pub struct TimerService {
    timers: Mutex<Vec<TimerEntry>>,
}

impl TimerService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, interval: Duration, handler: Box<dyn TimerHandler>, now: Instant) {
        let mut timers = self.timers.lock().unwrap();
        timers.insert(0, TimerEntry { interval, last: Mutex::new(now), handler });
    }

    /// Called on TIMER-TICK. Strict-less-than comparison is intentional and
    /// preserved as specified: a zero-interval timer fires every tick, and a
    /// timer whose interval equals `diff` exactly waits one more tick.
    pub fn on_tick(&self, now: Instant) {
        let timers = self.timers.lock().unwrap();
        for entry in timers.iter() {
            let mut last = entry.last.lock().unwrap();
            let diff = now.saturating_duration_since(*last);
            if entry.interval < diff {
                *last = now;
                drop(last);
                entry.handler.fire();
            }
        }
    }
}
