//! Transport Port
//!
//! Defines how the reporter hands a batch to the aggregator.

use crate::domain::entities::Metric;
use async_trait::async_trait;

/// Outcome class of one delivery attempt that reached the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Batch accepted
    Delivered,
    /// Timeout or server-side failure; worth another attempt
    Retryable,
    /// Client-side rejection; resending the same batch will not help
    Rejected,
}

/// Transport-level failure (no response was received).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to encode batch: {0}")]
    Encode(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Delivers serialized batches to the aggregator's batch-ingest endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one batch as a single payload.
    async fn deliver(&self, batch: &[Metric]) -> Result<DeliveryStatus, TransportError>;
}
