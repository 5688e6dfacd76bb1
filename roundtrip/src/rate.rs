// Round trips per second, reported once per >= 1 s window.

use crate::clock::Clock;
use crate::NANOS_PER_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateReport {
    /// Events counted in the window; printed as the per-second rate.
    pub roundtrips: u64,
    pub elapsed_ns: u64,
}

impl RateReport {
    /// Count normalized to the exact window length.
    pub fn per_second(&self) -> f64 {
        if self.elapsed_ns == 0 {
            return 0.0;
        }
        self.roundtrips as f64 * NANOS_PER_SEC as f64 / self.elapsed_ns as f64
    }
}

pub struct RateMeter<C: Clock> {
    clock: C,
    count: u64,
    total: u64,
    last_report_ns: u64,
}

impl<C: Clock> RateMeter<C> {
    pub fn new(clock: C) -> Self {
        let last_report_ns = clock.now_ns();
        Self {
            clock,
            count: 0,
            total: 0,
            last_report_ns,
        }
    }

    /// Count one round trip. Returns a report when the window has closed,
    /// after which the window count and timestamp start over.
    pub fn record_event(&mut self) -> Option<RateReport> {
        self.count += 1;
        self.total += 1;

        let now = self.clock.now_ns();
        let elapsed_ns = now.saturating_sub(self.last_report_ns);
        if elapsed_ns < NANOS_PER_SEC {
            return None;
        }

        let report = RateReport {
            roundtrips: self.count,
            elapsed_ns,
        };
        self.count = 0;
        self.last_report_ns = now;
        Some(report)
    }

    /// Events since construction, across all windows.
    pub fn total(&self) -> u64 {
        self.total
    }
}
