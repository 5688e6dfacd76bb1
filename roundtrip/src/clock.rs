use crate::NANOS_PER_SEC;

pub trait Clock {
    fn now_ns(&self) -> u64;
}

/// CLOCK_MONOTONIC in nanoseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        unsafe {
            let mut ts: libc::timespec = std::mem::zeroed();
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
            (ts.tv_sec as u64) * NANOS_PER_SEC + ts.tv_nsec as u64
        }
    }
}
