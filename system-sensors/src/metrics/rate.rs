//! Network throughput from cumulative byte counters
//!
//! Rate = Δbytes * 8 / 1024 / Δseconds (kbit/s). The previous counters and
//! their sample time are replaced together under one lock so no caller
//! ever pairs new counters with an old timestamp.

use super::NetCounters;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;

/// Throughput in kbit/s
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetRate {
    pub tx_kbps: f64,
    pub rx_kbps: f64,
}

impl NetRate {
    /// Two-decimal strings, `(tx, rx)`
    pub fn formatted(&self) -> (String, String) {
        (format!("{:.2}", self.tx_kbps), format!("{:.2}", self.rx_kbps))
    }
}

#[derive(Debug)]
struct Baseline {
    counters: NetCounters,
    at: Instant,
    last_rate: NetRate,
}

#[derive(Debug)]
pub struct RateCounter {
    baseline: Mutex<Baseline>,
}

impl RateCounter {
    /// Counters captured at process start become the first baseline
    pub fn new(counters: NetCounters, at: Instant) -> Self {
        Self {
            baseline: Mutex::new(Baseline {
                counters,
                at,
                last_rate: NetRate::default(),
            }),
        }
    }

    /// Rate since the previous sample; `current` becomes the new baseline
    ///
    /// A sample taken at the same instant as the baseline returns the
    /// previous rate and leaves the baseline untouched. Counters that went
    /// backwards (interface reset) count as zero traffic.
    pub fn sample(&self, current: NetCounters, at: Instant) -> NetRate {
        let mut baseline = self.baseline.lock();
        let elapsed = at.saturating_duration_since(baseline.at).as_secs_f64();
        if elapsed <= 0.0 {
            return baseline.last_rate;
        }

        let kbps = |now: u64, before: u64| now.saturating_sub(before) as f64 * 8.0 / 1024.0 / elapsed;
        let rate = NetRate {
            tx_kbps: kbps(current.bytes_sent, baseline.counters.bytes_sent),
            rx_kbps: kbps(current.bytes_recv, baseline.counters.bytes_recv),
        };

        *baseline = Baseline {
            counters: current,
            at,
            last_rate: rate,
        };
        rate
    }
}
