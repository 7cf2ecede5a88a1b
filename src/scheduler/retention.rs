//! Retention manager for cleaning up old samples.

use crate::db::{DbError, Store};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// How often expired samples are purged.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Manager for deleting samples past the retention window.
pub struct RetentionManager {
    store: Arc<Store>,
    retention: ChronoDuration,
    interval: Duration,
    stop: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention: ChronoDuration, interval: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            store,
            retention,
            interval,
            stop,
            handle: Mutex::new(None),
        }
    }

    /// Start the retention manager background task. The first pass runs
    /// immediately.
    pub async fn start(&self) {
        let store = self.store.clone();
        let retention = self.retention;
        let mut rx = self.stop.subscribe();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = purge_expired(&store, retention, Utc::now()) {
                            tracing::error!("RetentionManager: Failed to delete old samples: {}", e);
                        }
                    }
                }
            }
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Signal the background task to stop and hand back its handle.
    pub async fn stop(&self) -> Option<JoinHandle<()>> {
        let _ = self.stop.send(());
        self.handle.lock().await.take()
    }
}

/// Delete every sample older than `now - retention`.
pub fn purge_expired(store: &Store, retention: ChronoDuration, now: DateTime<Utc>) -> Result<usize, DbError> {
    let cutoff = now - retention;
    let removed = store.delete_older_than(cutoff)?;
    if removed > 0 {
        tracing::info!("RetentionManager: Cleaned up {} samples older than {}", removed, cutoff);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PingSample, Target};
    use tempfile::NamedTempFile;

    fn seeded_store(tmp: &NamedTempFile, now: DateTime<Utc>) -> (Arc<Store>, i64) {
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let mut target = Target {
            name: "A".to_string(),
            host: "192.0.2.1".to_string(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        for days in [31, 1] {
            let sample = PingSample::failed(id, now - ChronoDuration::days(days), 10, None);
            store.append_ping(&sample).unwrap();
        }
        (store, id)
    }

    #[test]
    fn test_purge_expired() {
        let tmp = NamedTempFile::new().unwrap();
        let now = Utc::now();
        let (store, id) = seeded_store(&tmp, now);

        assert_eq!(purge_expired(&store, ChronoDuration::days(30), now).unwrap(), 1);
        assert_eq!(purge_expired(&store, ChronoDuration::days(30), now).unwrap(), 0);

        let left = store.query_ping_range(id, now - ChronoDuration::days(90), 10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].time, now - ChronoDuration::days(1));
    }

    #[tokio::test]
    async fn test_manager_runs_first_pass_on_start() {
        let tmp = NamedTempFile::new().unwrap();
        let now = Utc::now();
        let (store, id) = seeded_store(&tmp, now);

        let manager = RetentionManager::new(store.clone(), ChronoDuration::days(30), CLEANUP_INTERVAL);
        manager.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let handle = manager.stop().await.unwrap();
        handle.await.unwrap();

        let left = store.query_ping_range(id, now - ChronoDuration::days(90), 10).unwrap();
        assert_eq!(left.len(), 1);
    }
}
