use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A clock that provides the current time.
///
/// Injected wherever the crate records or compares timestamps (queue
/// ordering, lock staleness) so that tests control time explicitly.
pub trait Clock: Send + Sync {
    fn unix_seconds(&self) -> i64;
}

/// Real system clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

/// Controllable clock for tests.
#[derive(Clone)]
pub struct FakeClock {
    seconds: Arc<Mutex<i64>>,
}

impl FakeClock {
    pub fn new(start: i64) -> Self {
        Self {
            seconds: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, seconds: i64) {
        *self.seconds.lock().unwrap() += seconds;
    }

    pub fn set(&self, seconds: i64) {
        *self.seconds.lock().unwrap() = seconds;
    }
}

impl Clock for FakeClock {
    fn unix_seconds(&self) -> i64 {
        *self.seconds.lock().unwrap()
    }
}
