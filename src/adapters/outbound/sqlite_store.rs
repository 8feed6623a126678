//! SQLite Metric Store
//!
//! Implements MetricStore on a relational table with transactional
//! select-then-branch upserts. Connection loss is detected before each
//! operation and repaired with a bounded reconnect schedule.

use crate::domain::entities::{validate_all, Metric};
use crate::domain::errors::StoreError;
use crate::domain::ports::MetricStore;
use crate::domain::value_objects::MetricKind;
use crate::infrastructure::{retry_with_backoff, BackoffPolicy};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// SQL schema for the metrics table.
pub const METRICS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  VARCHAR(100) NOT NULL,
    type  VARCHAR(50)  NOT NULL,
    delta BIGINT CHECK (delta IS NULL OR typeof(delta) = 'integer'),
    value DOUBLE PRECISION,
    CONSTRAINT unique_metric UNIQUE (name, type)
);
"#;

const SELECT_METRIC: &str = "SELECT name, type, delta, value FROM metrics WHERE name = ?1 AND type = ?2";
const SELECT_ALL: &str = "SELECT name, type, delta, value FROM metrics";
const INSERT_METRIC: &str = "INSERT INTO metrics (name, type, delta, value) VALUES (?1, ?2, ?3, ?4)";
const UPDATE_COUNTER: &str = "UPDATE metrics SET delta = delta + ?1 WHERE name = ?2 AND type = ?3";
const UPDATE_GAUGE: &str = "UPDATE metrics SET value = ?1 WHERE name = ?2 AND type = ?3";

/// Connection lifecycle of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Whether a driver error means the connection itself is unusable.
fn is_connection_error(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::CannotOpen | ErrorCode::SystemIoFailure)
    )
}

/// Whether a driver error is the integer check on `delta` firing.
///
/// SQLite promotes an overflowing `delta + ?` to REAL, which the schema's
/// CHECK turns into a constraint failure.
fn is_counter_overflow(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_CHECK
    )
}

fn map_err(e: rusqlite::Error) -> StoreError {
    if is_connection_error(&e) {
        StoreError::Connection(e.to_string())
    } else if is_counter_overflow(&e) {
        StoreError::Validation(format!("counter overflows: {}", e))
    } else {
        StoreError::Storage(e.to_string())
    }
}

fn row_to_metric(row: &Row) -> rusqlite::Result<Metric> {
    let kind: String = row.get(1)?;
    let kind = kind.parse::<MetricKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Metric {
        id: row.get(0)?,
        kind,
        delta: row.get(2)?,
        value: row.get(3)?,
    })
}

/// Confirm the handle still reaches the database file behind `dsn`.
fn check_alive(conn: &Connection, dsn: &str) -> Result<(), StoreError> {
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
        .map_err(map_err)?;
    // an unlinked file keeps answering through the open handle
    if dsn != ":memory:" && !Path::new(dsn).exists() {
        return Err(StoreError::Connection(format!(
            "database file {} is gone",
            dsn
        )));
    }
    Ok(())
}

fn open(dsn: &str) -> Result<Connection, StoreError> {
    let conn = Connection::open(dsn).map_err(map_err)?;
    check_alive(&conn, dsn)?;
    Ok(conn)
}

fn save_in_tx(conn: &mut Connection, metric: &Metric) -> rusqlite::Result<Metric> {
    let tx = conn.transaction()?;
    let kind = metric.kind.as_str();

    let existing = tx
        .query_row(SELECT_METRIC, params![metric.id, kind], row_to_metric)
        .optional()?;

    let saved = match existing {
        None => {
            tx.execute(
                INSERT_METRIC,
                params![metric.id, kind, metric.delta, metric.value],
            )?;
            metric.clone()
        }
        Some(_) => {
            match metric.kind {
                MetricKind::Counter => {
                    tx.execute(UPDATE_COUNTER, params![metric.delta, metric.id, kind])?
                }
                MetricKind::Gauge => {
                    tx.execute(UPDATE_GAUGE, params![metric.value, metric.id, kind])?
                }
            };
            tx.query_row(SELECT_METRIC, params![metric.id, kind], row_to_metric)?
        }
    };

    tx.commit()?;
    Ok(saved)
}

fn save_batch_in_tx(conn: &mut Connection, metrics: &[Metric]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut select = tx.prepare(SELECT_METRIC)?;
        let mut insert = tx.prepare(INSERT_METRIC)?;
        let mut update_counter = tx.prepare(UPDATE_COUNTER)?;
        let mut update_gauge = tx.prepare(UPDATE_GAUGE)?;

        for metric in metrics {
            let kind = metric.kind.as_str();
            if !select.exists(params![metric.id, kind])? {
                insert.execute(params![metric.id, kind, metric.delta, metric.value])?;
                continue;
            }
            match metric.kind {
                MetricKind::Counter => {
                    update_counter.execute(params![metric.delta, metric.id, kind])?
                }
                MetricKind::Gauge => update_gauge.execute(params![metric.value, metric.id, kind])?,
            };
        }
    }
    tx.commit()
}

/// SQLite-backed metric store.
///
/// Every write is committed before returning, so `flush` is a no-op.
pub struct SqliteStore {
    /// Live connection; replaced wholesale on reconnect
    conn: Arc<Mutex<Connection>>,
    /// Original DSN, kept for reconnecting
    dsn: String,
    state: Mutex<ConnectionState>,
    /// Set once the schema exists; a fresh connection re-applies it
    bootstrapped: AtomicBool,
    /// Serializes reconnect attempts
    reconnect_lock: tokio::sync::Mutex<()>,
    backoff: BackoffPolicy,
}

impl SqliteStore {
    /// Connect to the database at `dsn`, retrying per `backoff`.
    pub async fn connect(dsn: impl Into<String>, backoff: BackoffPolicy) -> Result<Self, StoreError> {
        let dsn = dsn.into();
        let conn = Self::connect_with_retry(&dsn, &backoff, false).await?;
        tracing::info!("connected to database {}", dsn);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dsn,
            state: Mutex::new(ConnectionState::Connected),
            bootstrapped: AtomicBool::new(false),
            reconnect_lock: tokio::sync::Mutex::new(()),
            backoff,
        })
    }

    /// Create the metrics table if it does not exist yet.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(METRICS_SCHEMA)?;
            tx.commit()
        })
        .await?;
        self.bootstrapped.store(true, Ordering::SeqCst);
        tracing::info!("metrics schema ready");
        Ok(())
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!("database connection {} -> {}", *current, state);
            *current = state;
        }
    }

    async fn connect_with_retry(
        dsn: &str,
        backoff: &BackoffPolicy,
        with_schema: bool,
    ) -> Result<Connection, StoreError> {
        retry_with_backoff(backoff, "database connect", StoreError::is_connection, || {
            let dsn = dsn.to_string();
            async move {
                tokio::task::spawn_blocking(move || {
                    let conn = open(&dsn)?;
                    if with_schema {
                        conn.execute_batch(METRICS_SCHEMA).map_err(map_err)?;
                    }
                    Ok(conn)
                })
                .await
                .map_err(|e| StoreError::Storage(format!("blocking task failed: {}", e)))?
            }
        })
        .await
    }

    async fn probe(&self) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let dsn = self.dsn.clone();
        tokio::task::spawn_blocking(move || check_alive(&conn.lock(), &dsn))
            .await
            .map_err(|e| StoreError::Storage(format!("blocking task failed: {}", e)))?
    }

    /// Make sure the connection is usable, reconnecting if it was lost.
    async fn get_connection(&self) -> Result<(), StoreError> {
        match self.probe().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) if e.is_connection() => {
                tracing::warn!("database connection lost: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.reconnect().await
            }
            Err(e) => Err(e),
        }
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        let _guard = self.reconnect_lock.lock().await;

        // another caller may have reconnected while we waited
        if self.probe().await.is_ok() {
            self.set_state(ConnectionState::Connected);
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let with_schema = self.bootstrapped.load(Ordering::SeqCst);
        match Self::connect_with_retry(&self.dsn, &self.backoff, with_schema).await {
            Ok(conn) => {
                *self.conn.lock() = conn;
                self.set_state(ConnectionState::Connected);
                tracing::info!("reconnected to database {}", self.dsn);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                tracing::error!("database reconnect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Run a blocking closure against the live connection.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.get_connection().await?;

        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard).map_err(map_err)
        })
        .await
        .map_err(|e| StoreError::Storage(format!("blocking task failed: {}", e)))?;

        if let Err(e) = &result {
            if e.is_connection() {
                self.set_state(ConnectionState::Disconnected);
            }
        }
        result
    }
}

#[async_trait]
impl MetricStore for SqliteStore {
    async fn save(&self, metric: Metric) -> Result<Metric, StoreError> {
        metric.validate()?;
        self.with_conn(move |conn| save_in_tx(conn, &metric)).await
    }

    async fn save_batch(&self, metrics: Vec<Metric>) -> Result<(), StoreError> {
        validate_all(&metrics)?;
        let count = metrics.len();
        self.with_conn(move |conn| save_batch_in_tx(conn, &metrics))
            .await?;
        tracing::debug!("saved batch of {} metrics", count);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Metric>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_ALL)?;
            let metrics = stmt
                .query_map([], row_to_metric)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(metrics)
        })
        .await
    }

    async fn get_by_key(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(SELECT_METRIC, params![id, kind.as_str()], row_to_metric)
                .optional()
        })
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.get_connection().await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy::new(vec![Duration::from_millis(1); 3])
    }

    async fn open_store(dir: &TempDir) -> SqliteStore {
        let dsn = dir.path().join("metrics.db");
        let store = SqliteStore::connect(dsn.to_string_lossy(), fast_backoff())
            .await
            .unwrap();
        store.bootstrap().await.unwrap();
        store
    }

    fn sorted(mut metrics: Vec<Metric>) -> Vec<Metric> {
        metrics.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));
        metrics
    }

    #[test]
    fn test_schema() {
        assert!(METRICS_SCHEMA.contains("CREATE TABLE IF NOT EXISTS metrics"));
        assert!(METRICS_SCHEMA.contains("UNIQUE (name, type)"));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_error_classification() {
        let cannot_open = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        assert!(is_connection_error(&cannot_open));
        assert!(map_err(cannot_open).is_connection());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(!is_connection_error(&constraint));
        assert!(matches!(map_err(constraint), StoreError::Storage(_)));

        let check = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK),
            None,
        );
        assert!(is_counter_overflow(&check));
        assert!(matches!(map_err(check), StoreError::Validation(_)));

        assert!(!is_connection_error(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert!(store.bootstrap().await.is_ok());
        assert_eq!(store.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_counter_accumulates() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let first = store.save(Metric::counter("PollCount", 100)).await.unwrap();
        assert_eq!(first.delta, Some(100));
        let second = store.save(Metric::counter("PollCount", 5)).await.unwrap();
        assert_eq!(second.delta, Some(105));

        let stored = store
            .get_by_key(MetricKind::Counter, "PollCount")
            .await
            .unwrap();
        assert_eq!(stored, Metric::counter("PollCount", 105));
    }

    #[tokio::test]
    async fn test_gauge_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.save(Metric::gauge("Alloc", 1.0)).await.unwrap();
        let saved = store.save(Metric::gauge("Alloc", 100.11)).await.unwrap();
        assert_eq!(saved, Metric::gauge("Alloc", 100.11));

        let stored = store.get_by_key(MetricKind::Gauge, "Alloc").await.unwrap();
        assert_eq!(stored.value, Some(100.11));
    }

    #[tokio::test]
    async fn test_same_name_both_kinds() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.save(Metric::counter("x", 1)).await.unwrap();
        store.save(Metric::gauge("x", 2.5)).await.unwrap();

        let all = sorted(store.get_all().await.unwrap());
        assert_eq!(all, vec![Metric::counter("x", 1), Metric::gauge("x", 2.5)]);
    }

    #[tokio::test]
    async fn test_get_by_key_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert_eq!(
            store.get_by_key(MetricKind::Gauge, "missing").await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_save_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let result = store.save(Metric::counter("", 1)).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_batch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.save(Metric::counter("PollCount", 1)).await.unwrap();

        store
            .save_batch(vec![
                Metric::counter("PollCount", 100),
                Metric::counter("PollCount", 5),
                Metric::gauge("Alloc", 1.0),
                Metric::gauge("Alloc", 100.11),
            ])
            .await
            .unwrap();

        let all = sorted(store.get_all().await.unwrap());
        assert_eq!(
            all,
            vec![Metric::counter("PollCount", 106), Metric::gauge("Alloc", 100.11)]
        );
    }

    #[tokio::test]
    async fn test_save_batch_invalid_applies_nothing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let mut bad = Metric::gauge("Alloc", 1.0);
        bad.value = None;
        let result = store
            .save_batch(vec![Metric::counter("PollCount", 1), bad])
            .await;

        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_batch_rolls_back_on_overflow() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.save(Metric::counter("c", i64::MAX)).await.unwrap();

        // the counter update overflows and violates the integer check
        let result = store
            .save_batch(vec![Metric::gauge("Alloc", 1.0), Metric::counter("c", 1)])
            .await;

        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(
            store.get_all().await.unwrap(),
            vec![Metric::counter("c", i64::MAX)]
        );
    }

    #[tokio::test]
    async fn test_counter_overflow_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.save(Metric::counter("c", i64::MAX)).await.unwrap();

        let result = store.save(Metric::counter("c", 1)).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(
            store.get_by_key(MetricKind::Counter, "c").await.unwrap().delta,
            Some(i64::MAX)
        );
    }

    #[tokio::test]
    async fn test_non_finite_gauge_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.save(Metric::gauge("g", 2.0)).await.unwrap();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = store.save(Metric::gauge("g", value)).await;
            assert!(matches!(result, Err(StoreError::Validation(_))));
        }
        let result = store
            .save_batch(vec![Metric::gauge("h", 1.0), Metric::gauge("g", f64::NAN)])
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));

        assert_eq!(store.get_all().await.unwrap(), vec![Metric::gauge("g", 2.0)]);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store.save(Metric::counter("PollCount", 7)).await.unwrap();
        }
        let store = open_store(&dir).await;
        assert_eq!(
            store
                .get_by_key(MetricKind::Counter, "PollCount")
                .await
                .unwrap()
                .delta,
            Some(7)
        );
    }

    #[tokio::test]
    async fn test_flush_and_ping() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert!(store.flush().await.is_ok());
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_schedule() {
        let dir = TempDir::new().unwrap();
        let dsn = dir.path().join("missing").join("metrics.db");

        let result = SqliteStore::connect(dsn.to_string_lossy(), fast_backoff()).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_recovers_within_schedule() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("late");
        let dsn = parent.join("metrics.db");

        let creator = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            std::fs::create_dir_all(&parent).unwrap();
        });

        let backoff = BackoffPolicy::new(vec![
            Duration::from_millis(10),
            Duration::from_millis(100),
            Duration::from_millis(300),
        ]);
        let store = SqliteStore::connect(dsn.to_string_lossy(), backoff)
            .await
            .unwrap();
        creator.await.unwrap();

        store.bootstrap().await.unwrap();
        assert_eq!(store.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_reconnects_when_database_file_lost() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.save(Metric::counter("PollCount", 3)).await.unwrap();
        assert_eq!(store.connection_state(), ConnectionState::Connected);

        std::fs::remove_file(dir.path().join("metrics.db")).unwrap();

        // the next operation notices, reopens and re-applies the schema
        store.save(Metric::counter("PollCount", 1)).await.unwrap();
        assert_eq!(store.connection_state(), ConnectionState::Connected);
        assert!(logs_contain("database connection connected -> disconnected"));
        assert!(logs_contain("database connection disconnected -> connecting"));
        assert!(logs_contain("database connection connecting -> connected"));
        assert_eq!(
            store.get_all().await.unwrap(),
            vec![Metric::counter("PollCount", 1)]
        );
    }

    #[tokio::test]
    async fn test_reconnect_exhausted_then_recovers() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let dsn = data.join("metrics.db");
        let store = SqliteStore::connect(dsn.to_string_lossy(), fast_backoff())
            .await
            .unwrap();
        store.bootstrap().await.unwrap();

        std::fs::remove_dir_all(&data).unwrap();

        assert!(matches!(store.ping().await, Err(StoreError::Connection(_))));
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(
            store.save(Metric::gauge("Alloc", 1.0)).await,
            Err(StoreError::Connection(_))
        ));
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);

        std::fs::create_dir_all(&data).unwrap();

        assert!(store.ping().await.is_ok());
        assert_eq!(store.connection_state(), ConnectionState::Connected);
        store.save(Metric::gauge("Alloc", 1.0)).await.unwrap();
        assert_eq!(
            store.get_by_key(MetricKind::Gauge, "Alloc").await.unwrap().value,
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_concurrent_saves_are_linearized() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir).await);

        let tasks = (0..20).map(|_| {
            let store = store.clone();
            async move { store.save(Metric::counter("hits", 1)).await }
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(
            store.get_by_key(MetricKind::Counter, "hits").await.unwrap().delta,
            Some(20)
        );
    }

    // ===== Aggregation Properties =====

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Counters hold the running sum and gauges the last value, for any
        /// sequence of saves.
        #[test]
        fn aggregation_matches_running_sum_and_last_value(
            deltas in prop::collection::vec(-1_000_000i64..1_000_000, 1..20),
            values in prop::collection::vec(prop::num::f64::NORMAL, 1..20),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let dir = TempDir::new().unwrap();
                let store = open_store(&dir).await;

                let mut total = 0;
                for delta in &deltas {
                    total += delta;
                    let saved = store.save(Metric::counter("c", *delta)).await.unwrap();
                    assert_eq!(saved.delta, Some(total));
                }
                for value in &values {
                    let saved = store.save(Metric::gauge("g", *value)).await.unwrap();
                    assert_eq!(saved.value, Some(*value));
                }

                let all = sorted(store.get_all().await.unwrap());
                assert_eq!(
                    all,
                    vec![Metric::counter("c", total), Metric::gauge("g", *values.last().unwrap())]
                );
            });
        }
    }
}
