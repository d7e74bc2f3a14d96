use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::{Instant, interval};
use tracing::debug;

/// Suppression window for repeated `(phone, message)` submissions.
pub const DEDUP_TTL: Duration = Duration::from_secs(5 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// TTL set over outbound dedup keys. Expired entries count as absent on
/// probe; a background sweep reclaims them. The sweep task stops once the
/// cache is dropped.
#[derive(Debug)]
pub struct DedupCache {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new() -> Self {
        let entries = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(run_sweeper(Arc::downgrade(&entries)));
        Self { entries, ttl: DEDUP_TTL }
    }

    /// Returns true when `key` was already recorded inside the TTL window;
    /// otherwise records it now.
    pub fn check_and_insert(
        &self,
        key: &str,
    ) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(recorded_at) = entries.get(key) {
            if now.duration_since(*recorded_at) < self.ttl {
                return true;
            }
        }
        entries.insert(key.to_string(), now);
        false
    }
}

async fn run_sweeper(entries: Weak<Mutex<HashMap<String, Instant>>>) {
    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            break;
        };
        let now = Instant::now();
        let mut entries = entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, recorded_at| {
            now.duration_since(*recorded_at) < DEDUP_TTL
        });
        let swept = before - entries.len();
        if swept > 0 {
            debug!("dedup sweep: removed={}, remaining={}", swept, entries.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{DEDUP_TTL, DedupCache};

    #[tokio::test]
    async fn second_probe_within_ttl_is_duplicate() {
        let cache = DedupCache::new();
        assert!(!cache.check_and_insert("+8613800000000test"));
        assert!(cache.check_and_insert("+8613800000000test"));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let cache = DedupCache::new();
        assert!(!cache.check_and_insert("+8613800000000test"));
        assert!(!cache.check_and_insert("+8613800000000other"));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = DedupCache::new();
        assert!(!cache.check_and_insert("key"));

        tokio::time::advance(DEDUP_TTL - Duration::from_secs(1)).await;
        assert!(cache.check_and_insert("key"));

        tokio::time::advance(DEDUP_TTL).await;
        assert!(!cache.check_and_insert("key"), "expired entry readmits");
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_expired_entries() {
        let cache = DedupCache::new();
        cache.check_and_insert("key");

        tokio::time::advance(DEDUP_TTL * 2).await;
        tokio::task::yield_now().await;

        assert!(cache.entries.lock().unwrap().is_empty());
    }
}
