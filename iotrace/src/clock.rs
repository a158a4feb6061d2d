use log::warn;
use nix::time::{clock_gettime, ClockId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of the monotonic time used for event timestamps and time zeros.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// `CLOCK_MONOTONIC`, the same origin the kernel uses for its event timestamps.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32),
            Err(err) => {
                warn!("clock_gettime(CLOCK_MONOTONIC) failed: {err}");
                Duration::ZERO
            }
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(start.as_nanos() as u64),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}
