//! Snapshot Metric Store
//!
//! Wraps the volatile store and makes it durable by writing the whole
//! state to a JSON file, either after every write or on an interval.

use crate::adapters::outbound::VolatileStore;
use crate::domain::entities::Metric;
use crate::domain::errors::StoreError;
use crate::domain::ports::MetricStore;
use crate::domain::value_objects::MetricKind;
use crate::infrastructure::ShutdownController;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Snapshot durability configuration.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Flush period; zero means flush synchronously after every write
    pub store_interval: Duration,
    /// Snapshot file location
    pub file_path: PathBuf,
    /// Replay the snapshot file when the store is opened
    pub restore: bool,
}

/// File-snapshot backed metric store.
pub struct SnapshotStore {
    inner: VolatileStore,
    config: SnapshotConfig,
    /// Serializes writers of the snapshot file
    write_lock: tokio::sync::Mutex<()>,
}

impl SnapshotStore {
    /// Open the store, restoring from the snapshot file when configured.
    ///
    /// A missing or unreadable snapshot is logged and treated as empty state.
    pub async fn open(config: SnapshotConfig) -> Self {
        let store = Self {
            inner: VolatileStore::new(),
            config,
            write_lock: tokio::sync::Mutex::new(()),
        };

        if store.config.restore {
            store.restore().await;
        }

        store
    }

    /// Whether every write is flushed before returning.
    pub fn is_write_through(&self) -> bool {
        self.config.store_interval.is_zero()
    }

    /// Spawn the periodic flush task. Does nothing in write-through mode.
    ///
    /// The task flushes every `store_interval` until shutdown is signalled.
    pub fn start_flush_task(
        self: &Arc<Self>,
        shutdown: &ShutdownController,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if self.is_write_through() {
            return None;
        }

        let store = Arc::clone(self);
        let shutdown = shutdown.clone();
        let period = self.config.store_interval;

        Some(tokio::spawn(async move {
            let stopped = shutdown.wait();
            tokio::pin!(stopped);
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = store.flush().await {
                            tracing::error!("periodic snapshot flush failed: {}", e);
                        }
                    }
                    _ = &mut stopped => {
                        tracing::debug!("snapshot flush task stopped");
                        break;
                    }
                }
            }
        }))
    }

    async fn restore(&self) {
        let path = &self.config.file_path;
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no snapshot at {}, starting empty", path.display());
                return;
            }
            Err(e) => {
                tracing::warn!("failed to read snapshot {}: {}", path.display(), e);
                return;
            }
        };

        let metrics: Vec<Metric> = match serde_json::from_slice(&data) {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!("failed to parse snapshot {}: {}", path.display(), e);
                return;
            }
        };

        let mut restored = 0;
        for metric in &metrics {
            match self.inner.save_sync(metric) {
                Ok(_) => restored += 1,
                Err(e) => tracing::warn!("skipping snapshot record {}: {}", metric.id, e),
            }
        }
        tracing::info!("restored {} metrics from {}", restored, path.display());
    }

    async fn write_snapshot(path: &Path, metrics: &[Metric]) -> Result<(), StoreError> {
        let data = serde_json::to_vec(metrics)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn flush_if_write_through(&self) {
        if self.is_write_through() {
            if let Err(e) = self.flush().await {
                tracing::error!("can't flush metrics to disk: {}", e);
            }
        }
    }
}

#[async_trait]
impl MetricStore for SnapshotStore {
    async fn save(&self, metric: Metric) -> Result<Metric, StoreError> {
        let saved = self.inner.save_sync(&metric)?;
        self.flush_if_write_through().await;
        Ok(saved)
    }

    async fn save_batch(&self, metrics: Vec<Metric>) -> Result<(), StoreError> {
        self.inner.save_batch_sync(&metrics)?;
        self.flush_if_write_through().await;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Metric>, StoreError> {
        Ok(self.inner.get_all_sync())
    }

    async fn get_by_key(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError> {
        self.inner.get_by_key_sync(kind, id)
    }

    /// Overwrite the snapshot file with the whole current state.
    ///
    /// An empty state is not written, so an earlier snapshot survives.
    async fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let metrics = self.inner.get_all_sync();
        if metrics.is_empty() {
            tracing::debug!("nothing to flush");
            return Ok(());
        }

        Self::write_snapshot(&self.config.file_path, &metrics).await?;
        tracing::debug!(
            "flushed {} metrics to {}",
            metrics.len(),
            self.config.file_path.display()
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn config(dir: &TempDir, interval: Duration, restore: bool) -> SnapshotConfig {
        SnapshotConfig {
            store_interval: interval,
            file_path: dir.path().join("metrics.json"),
            restore,
        }
    }

    fn sorted(mut metrics: Vec<Metric>) -> Vec<Metric> {
        metrics.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));
        metrics
    }

    async fn read_file(path: &Path) -> Vec<Metric> {
        let data = tokio::fs::read(path).await.unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    #[tokio::test]
    async fn test_flush_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(config(&dir, Duration::from_secs(300), false)).await;

        store.save(Metric::counter("PollCount", 100)).await.unwrap();
        store.save(Metric::counter("PollCount", 5)).await.unwrap();
        store.save(Metric::gauge("Alloc", 100.11)).await.unwrap();
        store.save(Metric::gauge("Alloc", 7.5)).await.unwrap();
        let before = sorted(store.get_all().await.unwrap());
        store.flush().await.unwrap();

        let restored = SnapshotStore::open(config(&dir, Duration::from_secs(300), true)).await;
        assert_eq!(sorted(restored.get_all().await.unwrap()), before);
        assert_eq!(
            restored
                .get_by_key(MetricKind::Counter, "PollCount")
                .await
                .unwrap()
                .delta,
            Some(105)
        );
    }

    #[tokio::test]
    async fn test_restore_disabled_ignores_file() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(config(&dir, Duration::from_secs(300), false)).await;
        store.save(Metric::gauge("Alloc", 1.0)).await.unwrap();
        store.flush().await.unwrap();

        let fresh = SnapshotStore::open(config(&dir, Duration::from_secs(300), false)).await;
        assert!(fresh.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(config(&dir, Duration::from_secs(300), true)).await;
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_restore_garbage_starts_empty() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::from_secs(300), true);
        tokio::fs::write(&cfg.file_path, b"not json").await.unwrap();

        let store = SnapshotStore::open(cfg).await;
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(logs_contain("failed to parse snapshot"));
    }

    #[tokio::test]
    async fn test_write_through_flushes_on_save() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::ZERO, false);
        let path = cfg.file_path.clone();
        let store = SnapshotStore::open(cfg).await;
        assert!(store.is_write_through());

        store.save(Metric::gauge("Alloc", 3.5)).await.unwrap();
        assert_eq!(read_file(&path).await, vec![Metric::gauge("Alloc", 3.5)]);

        store
            .save_batch(vec![Metric::counter("PollCount", 2), Metric::counter("PollCount", 3)])
            .await
            .unwrap();
        assert_eq!(
            sorted(read_file(&path).await),
            vec![Metric::counter("PollCount", 5), Metric::gauge("Alloc", 3.5)]
        );
    }

    #[tokio::test]
    async fn test_non_finite_gauge_never_reaches_snapshot() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::ZERO, true);
        let path = cfg.file_path.clone();
        let store = SnapshotStore::open(cfg.clone()).await;

        store.save(Metric::gauge("g", 1.5)).await.unwrap();
        for value in [f64::NAN, f64::INFINITY] {
            let result = store.save(Metric::gauge("g", value)).await;
            assert!(matches!(result, Err(StoreError::Validation(_))));
        }
        let result = store
            .save_batch(vec![Metric::counter("c", 1), Metric::gauge("g", f64::NEG_INFINITY)])
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(read_file(&path).await, vec![Metric::gauge("g", 1.5)]);

        let restored = SnapshotStore::open(cfg).await;
        assert_eq!(
            restored.get_by_key(MetricKind::Gauge, "g").await.unwrap().value,
            Some(1.5)
        );
    }

    #[tokio::test]
    async fn test_interval_mode_does_not_flush_on_save() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::from_secs(300), false);
        let path = cfg.file_path.clone();
        let store = SnapshotStore::open(cfg).await;

        store.save(Metric::gauge("Alloc", 3.5)).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_flush_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::from_secs(300), false);
        tokio::fs::write(&cfg.file_path, br#"[{"id":"a","type":"counter","delta":1}]"#)
            .await
            .unwrap();
        let path = cfg.file_path.clone();

        let store = SnapshotStore::open(cfg).await;
        store.flush().await.unwrap();

        assert_eq!(read_file(&path).await, vec![Metric::counter("a", 1)]);
    }

    #[tokio::test]
    async fn test_flush_overwrites_wholesale() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::from_secs(300), false);
        tokio::fs::write(
            &cfg.file_path,
            br#"[{"id":"old","type":"gauge","value":1.0},{"id":"older","type":"gauge","value":2.0}]"#,
        )
        .await
        .unwrap();
        let path = cfg.file_path.clone();

        let store = SnapshotStore::open(cfg).await;
        store.save(Metric::gauge("new", 9.0)).await.unwrap();
        store.flush().await.unwrap();

        assert_eq!(read_file(&path).await, vec![Metric::gauge("new", 9.0)]);
    }

    #[tokio::test]
    async fn test_invalid_batch_not_flushed() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::ZERO, false);
        let path = cfg.file_path.clone();
        let store = SnapshotStore::open(cfg).await;

        let result = store
            .save_batch(vec![Metric::gauge("Alloc", 1.0), Metric::gauge("", 2.0)])
            .await;
        assert!(result.is_err());
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_periodic_flush_task() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, Duration::from_millis(20), false);
        let path = cfg.file_path.clone();
        let store = Arc::new(SnapshotStore::open(cfg).await);
        let shutdown = ShutdownController::new();

        let handle = store.start_flush_task(&shutdown).unwrap();
        store.save(Metric::counter("PollCount", 7)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(read_file(&path).await, vec![Metric::counter("PollCount", 7)]);

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_flush_task_in_write_through_mode() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(config(&dir, Duration::ZERO, false)).await);
        assert!(store.start_flush_task(&ShutdownController::new()).is_none());
    }

    #[tokio::test]
    async fn test_ping() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(config(&dir, Duration::ZERO, false)).await;
        assert!(store.ping().await.is_ok());
    }
}
