//! Capacity-bounded timestamp window

use std::collections::VecDeque;
use std::time::SystemTime;

/// Bounded FIFO of event timestamps (Unix milliseconds).
///
/// Entries are never evicted by age. Recording past capacity drops the oldest
/// entry; the in-window count is derived at query time by filtering.
#[derive(Debug, Clone)]
pub struct RateWindow {
    events: VecDeque<i64>,
    capacity: usize,
}

impl RateWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Get current time in milliseconds
    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Append an event, dropping the oldest entries beyond capacity
    pub fn record(&mut self, at_millis: i64) {
        self.events.push_back(at_millis);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    /// Number of retained events strictly newer than `cutoff_millis`
    pub fn count_since(&self, cutoff_millis: i64) -> usize {
        self.events.iter().filter(|&&ts| ts > cutoff_millis).count()
    }

    /// Number of retained events, regardless of age
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_capacity_bounded() {
        let mut window = RateWindow::new(3);
        for ts in 0..10 {
            window.record(ts);
        }

        assert_eq!(window.len(), 3);
        // Only the three newest survive
        assert_eq!(window.count_since(6), 3);
        assert_eq!(window.count_since(8), 1);
    }

    #[test]
    fn test_stale_entries_linger_until_capacity() {
        let mut window = RateWindow::new(10);
        window.record(1_000);
        window.record(2_000);

        // Far in the future nothing counts, but nothing was evicted either
        assert_eq!(window.count_since(1_000_000), 0);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_cutoff_is_exclusive() {
        let mut window = RateWindow::new(5);
        window.record(100);
        window.record(200);

        assert_eq!(window.count_since(100), 1);
        assert_eq!(window.count_since(99), 2);
    }
}
