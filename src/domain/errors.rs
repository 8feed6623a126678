//! Storage error taxonomy shared by every metric store.

/// Errors surfaced by [`MetricStore`](crate::domain::ports::MetricStore)
/// implementations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Record is malformed (empty id, missing or mismatched payload)
    #[error("validation error: {0}")]
    Validation(String),
    /// No record stored under the requested `(id, kind)`
    #[error("metric not found")]
    NotFound,
    /// Backend unreachable after the reconnect schedule was exhausted
    #[error("connection error: {0}")]
    Connection(String),
    /// Any other persistence failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether the error came from the backend connection itself.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}
