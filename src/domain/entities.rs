//! Domain Entities - Core business objects
//!
//! A [`Metric`] is both the unit of ingest and the unit of storage. The
//! record handed back by a store after a save carries the post-aggregation
//! state, never the raw increment.

use crate::domain::errors::StoreError;
use crate::domain::value_objects::MetricKind;
use serde::{Deserialize, Serialize};

/// A single named counter or gauge.
///
/// Exactly one of `delta`/`value` is populated, selected by `kind`:
/// counters carry `delta`, gauges carry `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    pub id: String,
    /// Counter or gauge
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Counter increment on ingest, cumulative total on output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    /// Create a counter record.
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Create a gauge record.
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    /// Check the record invariants before it reaches any storage.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id.is_empty() {
            return Err(StoreError::Validation("metric id is required".to_string()));
        }
        if matches!(self.value, Some(v) if !v.is_finite()) {
            return Err(StoreError::Validation(format!(
                "gauge {} value must be finite",
                self.id
            )));
        }
        match (self.kind, self.delta, self.value) {
            (MetricKind::Counter, Some(_), None) | (MetricKind::Gauge, None, Some(_)) => Ok(()),
            (MetricKind::Counter, None, _) => Err(StoreError::Validation(format!(
                "counter {} has no delta",
                self.id
            ))),
            (MetricKind::Gauge, _, None) => Err(StoreError::Validation(format!(
                "gauge {} has no value",
                self.id
            ))),
            (kind, _, _) => Err(StoreError::Validation(format!(
                "{} {} carries both delta and value",
                kind, self.id
            ))),
        }
    }

    /// Storage key of this record.
    pub fn key(&self) -> (MetricKind, &str) {
        (self.kind, self.id.as_str())
    }
}

/// Validate a whole batch, failing on the first bad record.
pub fn validate_all(metrics: &[Metric]) -> Result<(), StoreError> {
    metrics.iter().try_for_each(Metric::validate)
}
