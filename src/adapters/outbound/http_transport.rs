//! HTTP Transport
//!
//! Delivers metric batches to the aggregator's `/updates/` endpoint.

use crate::domain::entities::Metric;
use crate::domain::ports::{DeliveryStatus, Transport, TransportError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Map an aggregator response status to a delivery outcome.
pub fn classify_status(status: StatusCode) -> DeliveryStatus {
    if status.is_success() {
        DeliveryStatus::Delivered
    } else if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        DeliveryStatus::Retryable
    } else {
        DeliveryStatus::Rejected
    }
}

/// Prefix a bare `host:port` with `http://`.
fn normalize_base(address: &str) -> String {
    let trimmed = address.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport targeting `address` (`host:port` or a full URL).
    pub fn new(address: &str) -> Result<Self, TransportError> {
        Self::with_timeout(address, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/updates/", normalize_base(address)),
        })
    }

    /// Full URL batches are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, batch: &[Metric]) -> Result<DeliveryStatus, TransportError> {
        let body = serde_json::to_vec(batch).map_err(|e| TransportError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        let outcome = classify_status(status);
        match outcome {
            DeliveryStatus::Delivered => {
                tracing::debug!("delivered {} metrics to {}", batch.len(), self.endpoint)
            }
            DeliveryStatus::Retryable => {
                tracing::warn!("aggregator returned {} for batch", status)
            }
            DeliveryStatus::Rejected => {
                tracing::error!("aggregator rejected batch with {}", status)
            }
        }
        Ok(outcome)
    }
}
