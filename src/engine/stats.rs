use crate::types::Outcome;
use std::fmt;
use std::time::Duration;

/// Running totals for one connection, and the shape of the cross-connection
/// aggregate.
///
/// `min_latency`/`max_latency` are zero until the first outcome arrives.
/// `successful + failed == total` holds after every update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub total_latency: Duration,
    /// Wall-clock duration of this connection's run, recorded by the pump.
    pub duration: Duration,
}

impl ClientStats {
    pub fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        if outcome.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }

        if self.total == 1 {
            self.min_latency = outcome.latency;
            self.max_latency = outcome.latency;
        } else {
            if outcome.latency < self.min_latency {
                self.min_latency = outcome.latency;
            }
            if outcome.latency > self.max_latency {
                self.max_latency = outcome.latency;
            }
        }
        self.total_latency += outcome.latency;
    }

    /// Folds another connection's stats into this aggregate: sums of
    /// counters and latency, min of non-zero mins, max of maxes, and the
    /// longest duration (the slowest connection bounds the test).
    pub fn merge(&mut self, other: &ClientStats) {
        self.total += other.total;
        self.successful += other.successful;
        self.failed += other.failed;
        self.total_latency += other.total_latency;

        if self.min_latency.is_zero()
            || (!other.min_latency.is_zero() && other.min_latency < self.min_latency)
        {
            self.min_latency = other.min_latency;
        }
        if other.max_latency > self.max_latency {
            self.max_latency = other.max_latency;
        }
        if other.duration > self.duration {
            self.duration = other.duration;
        }
    }

    /// Per-connection averages of an aggregate: counts and total latency
    /// are divided, min/max/duration describe the whole test and are kept
    /// as-is.
    pub fn averaged_over(&self, connections: usize) -> ClientStats {
        if connections == 0 {
            return self.clone();
        }
        let n = connections as u64;
        ClientStats {
            total: self.total / n,
            successful: self.successful / n,
            failed: self.failed / n,
            min_latency: self.min_latency,
            max_latency: self.max_latency,
            total_latency: self.total_latency / connections as u32,
            duration: self.duration,
        }
    }

    pub fn avg_latency(&self) -> Duration {
        if self.total > 0 {
            self.total_latency / self.total as u32
        } else {
            Duration::ZERO
        }
    }

    pub fn requests_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for ClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Statistics:\n\
             Total Requests: {}\n\
             Successful Requests: {}\n\
             Failed Requests: {}\n\
             Requests/sec: {:.2}\n\
             Min Latency: {:?}\n\
             Max Latency: {:?}\n\
             Average Latency: {:?}\n\
             Total Duration: {:?}",
            self.total,
            self.successful,
            self.failed,
            self.requests_per_sec(),
            self.min_latency,
            self.max_latency,
            self.avg_latency(),
            self.duration,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::STATUS_TRANSPORT_ERROR;
    use std::time::SystemTime;

    fn outcome(status: u16, latency_ms: u64) -> Outcome {
        Outcome {
            start: SystemTime::now(),
            status,
            latency: Duration::from_millis(latency_ms),
        }
    }

    #[test]
    fn record_keeps_counts_consistent() {
        let mut stats = ClientStats::default();
        for status in [200, 301, 404, 500, STATUS_TRANSPORT_ERROR, 204] {
            stats.record(&outcome(status, 10));
            assert_eq!(stats.successful + stats.failed, stats.total);
        }
        assert_eq!(stats.total, 6);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.failed, 3);
    }

    #[test]
    fn min_max_seeded_by_first_outcome() {
        let mut stats = ClientStats::default();
        assert_eq!(stats.min_latency, Duration::ZERO);

        stats.record(&outcome(200, 20));
        assert_eq!(stats.min_latency, Duration::from_millis(20));
        assert_eq!(stats.max_latency, Duration::from_millis(20));

        stats.record(&outcome(200, 5));
        stats.record(&outcome(200, 50));
        assert_eq!(stats.min_latency, Duration::from_millis(5));
        assert_eq!(stats.max_latency, Duration::from_millis(50));
        assert_eq!(stats.total_latency, Duration::from_millis(75));
    }

    #[test]
    fn merge_takes_min_of_mins_max_of_maxes_longest_duration() {
        // The three-connection example: min=[5,3,8], max=[50,40,60],
        // total_latency=[100,90,110], total=[10,9,11], duration=[2s,3s,1s].
        let per_client = [
            (5, 50, 100, 10, 2),
            (3, 40, 90, 9, 3),
            (8, 60, 110, 11, 1),
        ];

        let mut total = ClientStats::default();
        for (min, max, sum, count, dur) in per_client {
            total.merge(&ClientStats {
                total: count,
                successful: count,
                failed: 0,
                min_latency: Duration::from_millis(min),
                max_latency: Duration::from_millis(max),
                total_latency: Duration::from_millis(sum),
                duration: Duration::from_secs(dur),
            });
        }

        assert_eq!(total.total, 30);
        assert_eq!(total.min_latency, Duration::from_millis(3));
        assert_eq!(total.max_latency, Duration::from_millis(60));
        assert_eq!(total.total_latency, Duration::from_millis(300));
        assert_eq!(total.duration, Duration::from_secs(3));
    }

    #[test]
    fn merge_ignores_zero_min_from_idle_connection() {
        let mut total = ClientStats::default();
        total.merge(&ClientStats {
            total: 5,
            successful: 5,
            min_latency: Duration::from_millis(7),
            max_latency: Duration::from_millis(9),
            ..ClientStats::default()
        });
        // A connection that recorded nothing contributes a zero min,
        // which must not clobber the real minimum.
        total.merge(&ClientStats::default());
        assert_eq!(total.min_latency, Duration::from_millis(7));
    }

    #[test]
    fn averages_divide_counts_but_not_bounds() {
        let total = ClientStats {
            total: 30,
            successful: 27,
            failed: 3,
            min_latency: Duration::from_millis(3),
            max_latency: Duration::from_millis(60),
            total_latency: Duration::from_millis(300),
            duration: Duration::from_secs(3),
        };
        let avg = total.averaged_over(3);
        assert_eq!(avg.total, 10);
        assert_eq!(avg.successful, 9);
        assert_eq!(avg.failed, 1);
        assert_eq!(avg.total_latency, Duration::from_millis(100));
        assert_eq!(avg.min_latency, Duration::from_millis(3));
        assert_eq!(avg.max_latency, Duration::from_millis(60));
        assert_eq!(avg.duration, Duration::from_secs(3));
    }

    #[test]
    fn rps_uses_recorded_duration() {
        let stats = ClientStats {
            total: 1000,
            successful: 1000,
            duration: Duration::from_secs(2),
            ..ClientStats::default()
        };
        assert!((stats.requests_per_sec() - 500.0).abs() < f64::EPSILON);

        let idle = ClientStats::default();
        assert_eq!(idle.requests_per_sec(), 0.0);
        assert_eq!(idle.avg_latency(), Duration::ZERO);
    }
}
