//! Process-wide scan statistics.
//!
//! Every probe task bumps these concurrently, so each field is an atomic.
//! Relaxed ordering is enough: the values are only read for reporting and
//! no other memory is published through them.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        #[derive(Debug, Default)]
        pub struct Counters {
            $($(#[$doc])* pub $name: AtomicU64,)*
        }

        /// Point-in-time copy of [`Counters`].
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct CounterSnapshot {
            $(pub $name: u64,)*
        }

        impl Counters {
            pub fn snapshot(&self) -> CounterSnapshot {
                CounterSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    /// Probe tasks that started running.
    probes,
    /// Requests written to a connected socket.
    requests,
    /// Header blocks that showed a success status or a content type.
    responses,
    /// Header blocks that showed both.
    resources,
    /// (address, spec) pairs whose body matched the pattern.
    targets,
    timeouts_connect,
    timeouts_read,
    timeouts_write,
    /// Connects that failed for any reason other than a timeout.
    connect_failures,
    /// Socket allocations retried (creation error or descriptor over the ceiling).
    socket_retries,
    slot_acquisitions,
    launch_failures,
    /// Submissions given up after exhausting launch retries.
    dropped,
    alloc_retries,
    close_errors,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl CounterSnapshot {
    /// Probes per second over `elapsed_secs`, and the seconds left to reach
    /// `total` probes at that rate.
    pub fn estimate(&self, elapsed_secs: f64, total: u64) -> Option<(f64, u64)> {
        if elapsed_secs <= 0.0 || self.probes == 0 {
            return None;
        }
        let rate = self.probes as f64 / elapsed_secs;
        let remaining = total.saturating_sub(self.probes) as f64 / rate;
        Some((rate, remaining.round() as u64))
    }
}

impl Display for CounterSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "statistics: {} timeouts on connect", self.timeouts_connect)?;
        writeln!(f, "statistics: {} timeouts on read", self.timeouts_read)?;
        writeln!(f, "statistics: {} timeouts on write", self.timeouts_write)?;
        writeln!(f, "statistics: {} probes", self.probes)?;
        writeln!(f, "statistics: {} requests", self.requests)?;
        writeln!(f, "statistics: {} responses", self.responses)?;
        writeln!(f, "statistics: {} resources", self.resources)?;
        writeln!(f, "statistics: {} targets", self.targets)?;
        write!(
            f,
            "performance: alloc={} sockettry={} socketerr={} slots={} launcherr={} dropped={} closeerr={}",
            self.alloc_retries,
            self.socket_retries,
            self.connect_failures,
            self.slot_acquisitions,
            self.launch_failures,
            self.dropped,
            self.close_errors,
        )
    }
}

/// Formats a duration in seconds the way the periodic reporter prints it.
pub fn human_duration(secs: u64) -> String {
    let d = secs / 86_400;
    let h = secs / 3_600 % 24;
    let m = secs / 60 % 60;
    let s = secs % 60;
    format!("{d} days {h} hours {m} minutes {s} seconds")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_bumps_are_not_lost() {
        let counters = Arc::new(Counters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        Counters::bump(&c.requests);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.snapshot().requests, 80_000);
    }

    #[test]
    fn estimate_needs_progress() {
        let mut snap = CounterSnapshot::default();
        assert_eq!(snap.estimate(1.0, 100), None);
        snap.probes = 10;
        assert_eq!(snap.estimate(2.0, 100), Some((5.0, 18)));
    }

    #[test]
    fn human_duration_splits_units() {
        assert_eq!(human_duration(90_061), "1 days 1 hours 1 minutes 1 seconds");
    }

    #[test]
    fn snapshot_serializes_as_flat_json() {
        let c = Counters::new();
        Counters::bump(&c.resources);
        let json = serde_json::to_value(c.snapshot()).unwrap();
        assert_eq!(json["resources"], 1);
        assert_eq!(json["targets"], 0);
    }
}
