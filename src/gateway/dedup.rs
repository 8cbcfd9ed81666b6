//! Per-user delivery dedup window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::util::lock::mutex_lock;

/// Suppresses deliveries to a user that arrive within `window` of the last
/// observed one. The timestamp is refreshed on every observation, including
/// suppressed ones, so a steady burst keeps suppressing until it quiets down.
pub struct DedupWindow {
    window: Duration,
    last_seen: Mutex<HashMap<Uuid, Instant>>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether this delivery should go out.
    pub fn observe(&self, user_id: Uuid) -> bool {
        let now = Instant::now();
        let mut last_seen = mutex_lock(&self.last_seen, "gateway::dedup", "observe");
        let deliver = match last_seen.get(&user_id) {
            Some(previous) => now.duration_since(*previous) >= self.window,
            None => true,
        };
        last_seen.insert(user_id, now);
        deliver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_within_the_window_collapses_to_one() {
        let dedup = DedupWindow::new(Duration::from_millis(100));
        let user = Uuid::new_v4();

        assert!(dedup.observe(user));
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(50)).await;
            // Each observation lands 50ms after the previous one, which also
            // refreshed the timestamp, so the whole burst is suppressed.
            assert!(!dedup.observe(user));
        }

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(dedup.observe(user));
    }

    #[tokio::test(start_paused = true)]
    async fn users_are_deduplicated_independently() {
        let dedup = DedupWindow::new(Duration::from_millis(100));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(dedup.observe(a));
        assert!(dedup.observe(b));
        assert!(!dedup.observe(a));
        assert!(!dedup.observe(b));
    }
}
