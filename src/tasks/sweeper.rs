//! TTL Sweeper Task
//!
//! Background task that periodically removes expired entries from a local
//! backend's map.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, StatsCounters};

/// Removes every entry that is expired at the time of the call.
///
/// Expired keys are snapshotted shard by shard, then each is removed only if
/// it is still expired, so a key rewritten in between survives. No lock is
/// held across the whole scan.
///
/// Returns the number of entries removed.
pub fn sweep_expired(entries: &DashMap<String, CacheEntry>) -> usize {
    let now = current_timestamp_ms();
    let expired_keys: Vec<String> = entries
        .iter()
        .filter(|item| item.value().is_expired_at(now))
        .map(|item| item.key().clone())
        .collect();

    expired_keys
        .into_iter()
        .filter(|key| entries.remove_if(key, |_, entry| entry.is_expired()).is_some())
        .count()
}

/// Spawns the sweeper for a local backend.
///
/// The task sleeps for `interval` between passes and exits as soon as `token`
/// is cancelled.
///
/// # Arguments
/// * `entries` - Shared map owned by the backend
/// * `stats` - Counters to record reclaimed entries on
/// * `interval` - Time between sweeps
/// * `token` - Cancelled by the backend on close
///
/// # Returns
/// A JoinHandle the backend awaits during `close()`.
pub fn spawn_sweeper(
    entries: Arc<DashMap<String, CacheEntry>>,
    stats: Arc<StatsCounters>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting TTL sweeper with interval of {:?}", interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = sweep_expired(&entries);
            stats.record_expired(removed as u64);

            if removed > 0 {
                info!("TTL sweep: removed {} expired entries", removed);
            } else {
                debug!("TTL sweep: no expired entries found");
            }
        }

        debug!("TTL sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl: Option<Duration>) -> CacheEntry {
        CacheEntry::new(b"value".to_vec(), ttl)
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let entries = DashMap::new();
        entries.insert("old".to_string(), entry(Some(Duration::from_millis(1))));
        entries.insert("fresh".to_string(), entry(Some(Duration::from_secs(3600))));
        entries.insert("forever".to_string(), entry(None));

        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(sweep_expired(&entries), 1);
        assert!(!entries.contains_key("old"));
        assert!(entries.contains_key("fresh"));
        assert!(entries.contains_key("forever"));
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let entries = Arc::new(DashMap::new());
        let stats = Arc::new(StatsCounters::new());
        entries.insert("expire_soon".to_string(), entry(Some(Duration::from_millis(5))));

        let token = CancellationToken::new();
        let handle = spawn_sweeper(
            entries.clone(),
            stats.clone(),
            Duration::from_millis(20),
            token.clone(),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(entries.is_empty(), "Expired entry should have been swept");
        assert_eq!(stats.snapshot().expired, 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_preserves_valid_entries() {
        let entries = Arc::new(DashMap::new());
        entries.insert("long_lived".to_string(), entry(Some(Duration::from_secs(3600))));

        let token = CancellationToken::new();
        let handle = spawn_sweeper(
            entries.clone(),
            Arc::new(StatsCounters::new()),
            Duration::from_millis(20),
            token.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(entries.contains_key("long_lived"));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let token = CancellationToken::new();
        let handle = spawn_sweeper(
            Arc::new(DashMap::new()),
            Arc::new(StatsCounters::new()),
            Duration::from_secs(3600),
            token.clone(),
        );

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should exit promptly")
            .unwrap();
    }
}
