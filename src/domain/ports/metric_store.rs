//! Metric Store Port
//!
//! Defines the storage capability shared by the volatile, snapshot and
//! relational backends. All three must honor identical semantics.

use crate::domain::entities::Metric;
use crate::domain::errors::StoreError;
use crate::domain::value_objects::MetricKind;
use async_trait::async_trait;

/// Storage for aggregated metrics.
///
/// This is an outbound port. The API server talks to it without knowing
/// whether state lives in memory, in a snapshot file or in a database.
///
/// Aggregation rule: counters add `delta` to the stored total, gauges
/// overwrite `value`. Every save returns the post-aggregation record.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Apply the aggregation rule for one record and return the result.
    async fn save(&self, metric: Metric) -> Result<Metric, StoreError>;

    /// Apply the aggregation rule for every record, all-or-nothing.
    ///
    /// Every record is validated before any of them is applied.
    async fn save_batch(&self, metrics: Vec<Metric>) -> Result<(), StoreError>;

    /// Get every stored record. Order is unspecified.
    async fn get_all(&self) -> Result<Vec<Metric>, StoreError>;

    /// Get a record by its storage key, or [`StoreError::NotFound`].
    async fn get_by_key(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError>;

    /// Force durability. No-op for backends where every write is durable.
    async fn flush(&self) -> Result<(), StoreError>;

    /// Liveness probe for backends with an external dependency.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
