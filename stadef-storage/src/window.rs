//! Operational window
//!
//! The single time range eligible for caching. Readers take a snapshot at the
//! start of an operation and work against it; a concurrent `set_range` swaps
//! the whole range in one step, so a snapshot is never torn.

use crate::range::TimeRange;
use stadef_core::{CacheConfig, StadefResult, Timestamp};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Atomically swappable operational time range.
#[derive(Debug)]
pub struct OperationalWindow {
    range: RwLock<Arc<TimeRange>>,
}

impl OperationalWindow {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range: RwLock::new(Arc::new(range)),
        }
    }

    /// Window `[now - start, now - end]` from the configured look-backs.
    pub fn from_config(config: &CacheConfig, now: Timestamp) -> StadefResult<Self> {
        let (start, end) = config.operational_range(now)?;
        Ok(Self::new(TimeRange::closed(start, end)))
    }

    /// Current range. The returned snapshot is unaffected by later swaps.
    pub fn snapshot(&self) -> Arc<TimeRange> {
        // A panicking writer cannot leave a half-written Arc behind.
        let guard = self.range.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn set_range(&self, range: TimeRange) {
        let mut guard = self.range.write().unwrap_or_else(PoisonError::into_inner);
        info!(window = %range, "Operational window updated");
        *guard = Arc::new(range);
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.snapshot().contains(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::thread;
    use std::time::Duration;

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let window = OperationalWindow::new(TimeRange::closed(ts(1), ts(10)));
        let before = window.snapshot();
        window.set_range(TimeRange::closed(ts(20), ts(25)));

        assert!(before.contains(ts(5)));
        assert!(!window.contains(ts(5)));
        assert!(window.contains(ts(21)));
    }

    #[test]
    fn test_from_config() {
        let now = Utc.with_ymd_and_hms(2020, 1, 10, 0, 0, 0).unwrap();
        let config = CacheConfig {
            operational_period_start: Duration::from_secs(2 * 86_400),
            operational_period_end: Duration::ZERO,
        };
        let window = OperationalWindow::from_config(&config, now).unwrap();

        assert_eq!(*window.snapshot(), TimeRange::closed(ts(8), ts(10)));
    }

    #[test]
    fn test_from_invalid_config_fails() {
        let config = CacheConfig {
            operational_period_start: Duration::ZERO,
            operational_period_end: Duration::from_secs(60),
        };
        assert!(OperationalWindow::from_config(&config, ts(1)).is_err());
    }

    #[test]
    fn test_concurrent_readers_see_whole_ranges() {
        let first = TimeRange::closed(ts(1), ts(2));
        let second = TimeRange::closed(ts(3), ts(4));
        let window = Arc::new(OperationalWindow::new(first));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let window = Arc::clone(&window);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let seen = *window.snapshot();
                        assert!(seen == first || seen == second);
                    }
                })
            })
            .collect();

        for i in 0..1_000 {
            window.set_range(if i % 2 == 0 { second } else { first });
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
