//! Persistence rate limiting

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Minimum-interval throttle on durable writes
///
/// Due on the very first check, then again once `interval` has elapsed since
/// the last flush. A wall clock that steps backwards past the last flush
/// (NTP correction after boot) makes the gate due immediately.
#[derive(Debug, Clone)]
pub struct PersistenceGate {
    interval: Duration,
    last_flush: Option<DateTime<Utc>>,
}

impl PersistenceGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_flush else {
            return true;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= self.interval,
            Err(_) => true,
        }
    }

    /// Record a flush attempt at `now`
    pub fn mark(&mut self, now: DateTime<Utc>) {
        self.last_flush = Some(now);
    }

    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        self.last_flush
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    #[test]
    fn test_first_check_is_due() {
        let gate = PersistenceGate::new(Duration::from_secs(29));
        assert!(gate.is_due(t(0)));
    }

    #[test]
    fn test_due_at_exact_interval() {
        let mut gate = PersistenceGate::new(Duration::from_secs(29));
        gate.mark(t(0));
        assert!(!gate.is_due(t(28_999)));
        assert!(gate.is_due(t(29_000)));
    }

    #[test]
    fn test_two_second_polls_flush_every_thirty_seconds() {
        let mut gate = PersistenceGate::new(Duration::from_secs(29));
        let mut flushes = Vec::new();
        // polls at 0, 2, ..., 58 s
        for i in 0..30 {
            let now = t(i * 2_000);
            if gate.is_due(now) {
                gate.mark(now);
                flushes.push(i * 2);
            }
        }
        assert_eq!(flushes, vec![0, 30]);

        // one more poll at 60 s
        assert!(gate.is_due(t(60_000)));
    }

    #[test]
    fn test_clock_stepping_back_is_due() {
        let mut gate = PersistenceGate::new(Duration::from_secs(29));
        gate.mark(t(100_000));
        assert!(gate.is_due(t(10_000)));
    }
}
