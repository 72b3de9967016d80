//! Monotonic and wall clock access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use btaudio_core::{Usec, NSEC_PER_USEC, USEC_PER_SEC};

/// Source of monotonic time in microseconds.
///
/// The I/O loop reads time only through this trait so tests can drive it.
pub trait TimeSource: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Usec;

    /// Convert a wall-clock timestamp to the monotonic time base.
    fn wallclock_to_monotonic(&self, wall: Usec) -> Usec;
}

/// The system monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtClock;

impl RtClock {
    pub fn new() -> Self {
        Self
    }
}

fn clock_usec(clock: libc::clockid_t) -> Usec {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // clock_gettime cannot fail for the clocks used here
    unsafe {
        libc::clock_gettime(clock, &mut ts);
    }
    ts.tv_sec as Usec * USEC_PER_SEC + ts.tv_nsec as Usec / NSEC_PER_USEC
}

impl TimeSource for RtClock {
    fn now(&self) -> Usec {
        clock_usec(libc::CLOCK_MONOTONIC)
    }

    /// Shift a `CLOCK_REALTIME` timestamp by the current realtime/monotonic gap.
    fn wallclock_to_monotonic(&self, wall: Usec) -> Usec {
        let real_now = clock_usec(libc::CLOCK_REALTIME);
        let mono_now = self.now();
        if real_now >= wall {
            mono_now.saturating_sub(real_now - wall)
        } else {
            mono_now + (wall - real_now)
        }
    }
}

/// Convert a `timeval` as delivered by `SO_TIMESTAMP` to microseconds.
pub fn timeval_to_usec(tv: &libc::timeval) -> Usec {
    tv.tv_sec as Usec * USEC_PER_SEC + tv.tv_usec as Usec
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same time. Wall-clock timestamps are interpreted as
/// monotonic ones.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Usec) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, now: Usec) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Usec) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Usec {
        self.now.load(Ordering::SeqCst)
    }

    fn wallclock_to_monotonic(&self, wall: Usec) -> Usec {
        wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod rt_clock {
        use super::*;
        use std::thread;
        use std::time::Duration;

        #[test]
        fn now_increases() {
            let clock = RtClock::new();
            let t1 = clock.now();
            thread::sleep(Duration::from_millis(10));
            let t2 = clock.now();
            assert!(t2 >= t1 + 10_000);
        }

        #[test]
        fn wallclock_now_maps_to_monotonic_now() {
            let clock = RtClock::new();
            let wall = clock_usec(libc::CLOCK_REALTIME);
            let mono = clock.wallclock_to_monotonic(wall);
            let diff = clock.now().abs_diff(mono);
            assert!(diff < 100_000);
        }

        #[test]
        fn timeval_conversion() {
            let tv = libc::timeval {
                tv_sec: 2,
                tv_usec: 500,
            };
            assert_eq!(timeval_to_usec(&tv), 2_000_500);
        }
    }

    mod manual_clock {
        use super::*;

        #[test]
        fn clones_share_time() {
            let clock = ManualClock::new(1_000);
            let other = clock.clone();
            clock.advance(500);
            assert_eq!(other.now(), 1_500);
            other.set(10);
            assert_eq!(clock.now(), 10);
        }
    }
}
