use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub trait Clock: Send + Sync + 'static {
    /// Returns the current time of the clock
    fn now(&self) -> Timestamp;
    /// Block and wait until the clock reaches the target time.
    fn wait_until(&self, target: Timestamp);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn wait_until(&self, target: Timestamp) {
        // Re-check after every sleep so a coarse OS timer cannot leave us short.
        loop {
            let now = Timestamp::now();
            if now >= target {
                return;
            }
            let remaining = target.duration_since(now);
            let millis = remaining.as_millis().max(1) as u64;
            std::thread::sleep(Duration::from_millis(millis));
        }
    }
}

/// A clock that only moves when told to.
///
/// `wait_until` jumps straight to the target instead of blocking, which keeps
/// tests that exercise sequence exhaustion instantaneous.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward; saturates at the maximum timestamp.
    pub fn advance(&self, by: SignedDuration) {
        let mut now = self.now.lock();
        *now = now.checked_add(by).unwrap_or(Timestamp::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }

    fn wait_until(&self, target: Timestamp) {
        let mut now = self.now.lock();
        if target > *now {
            *now = target;
        }
    }
}
