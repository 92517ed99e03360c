//! Per-address transaction velocity tracking.
//!
//! Sliding 1-hour window with minute-granularity circular buckets. The map
//! is sharded; updates are linearizable per address, with no lock shared
//! across addresses.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// One bucket per minute over a 60-minute window.
const BUCKET_COUNT: usize = 60;

/// Concurrency-safe per-address sliding counter.
///
/// Maintained here but conceptually owned by an external collaborator; the
/// rule engine only reads and increments it.
#[derive(Debug, Default)]
pub struct VelocityTracker {
    windows: DashMap<String, AddressWindow>,
}

#[derive(Debug)]
struct AddressWindow {
    buckets: [u32; BUCKET_COUNT],
    /// Absolute minute of the last update, for bucket rotation
    last_minute: i64,
}

impl AddressWindow {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            buckets: [0; BUCKET_COUNT],
            last_minute: at.timestamp() / 60,
        }
    }

    fn bucket_index(minute: i64) -> usize {
        (minute.rem_euclid(BUCKET_COUNT as i64)) as usize
    }

    /// Clear buckets that fell out of the window since the last update.
    fn rotate_to(&mut self, at: DateTime<Utc>) {
        let now_minute = at.timestamp() / 60;
        let elapsed = now_minute - self.last_minute;
        if elapsed <= 0 {
            return;
        }

        if elapsed >= BUCKET_COUNT as i64 {
            self.buckets = [0; BUCKET_COUNT];
        } else {
            let mut idx = Self::bucket_index(self.last_minute + 1);
            for _ in 0..elapsed {
                self.buckets[idx] = 0;
                idx = (idx + 1) % BUCKET_COUNT;
            }
        }
        self.last_minute = now_minute;
    }

    fn total(&self) -> u32 {
        self.buckets.iter().sum()
    }
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one transaction for `address` and return the trailing 1-hour
    /// count including it.
    pub fn observe(&self, address: &str, at: DateTime<Utc>) -> u32 {
        let mut window = self
            .windows
            .entry(address.to_string())
            .or_insert_with(|| AddressWindow::new(at));
        window.rotate_to(at);
        let idx = AddressWindow::bucket_index(at.timestamp() / 60);
        window.buckets[idx] = window.buckets[idx].saturating_add(1);
        window.total()
    }

    /// Trailing 1-hour count for `address` without recording anything.
    pub fn count(&self, address: &str, at: DateTime<Utc>) -> u32 {
        match self.windows.get_mut(address) {
            Some(mut window) => {
                window.rotate_to(at);
                window.total()
            }
            None => 0,
        }
    }

    pub fn tracked_addresses(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:30Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_counts_within_window() {
        let tracker = VelocityTracker::new();
        let base = t0();

        assert_eq!(tracker.observe("addr", base), 1);
        assert_eq!(tracker.observe("addr", base + Duration::minutes(10)), 2);
        assert_eq!(tracker.observe("addr", base + Duration::minutes(59)), 3);
        assert_eq!(tracker.count("addr", base + Duration::minutes(59)), 3);
    }

    #[test]
    fn test_old_buckets_expire() {
        let tracker = VelocityTracker::new();
        let base = t0();

        for i in 0..5 {
            tracker.observe("addr", base + Duration::minutes(i));
        }
        assert_eq!(tracker.count("addr", base + Duration::minutes(5)), 5);

        // 61 minutes after the first observation only the last ones remain
        let later = base + Duration::minutes(62);
        assert_eq!(tracker.count("addr", later), 2);

        // Far in the future everything has expired
        let much_later = base + Duration::hours(3);
        assert_eq!(tracker.count("addr", much_later), 0);
    }

    #[test]
    fn test_addresses_are_independent() {
        let tracker = VelocityTracker::new();
        let base = t0();

        tracker.observe("a", base);
        tracker.observe("a", base);
        tracker.observe("b", base);

        assert_eq!(tracker.count("a", base), 2);
        assert_eq!(tracker.count("b", base), 1);
        assert_eq!(tracker.tracked_addresses(), 2);
    }

    #[test]
    fn test_unknown_address_counts_zero() {
        let tracker = VelocityTracker::new();
        assert_eq!(tracker.count("nobody", t0()), 0);
    }
}
