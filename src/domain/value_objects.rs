//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.

use crate::domain::errors::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a metric, which selects its aggregation rule.
///
/// The same metric name may exist independently as both kinds, so the
/// storage key is always the `(id, kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Running sum of received increments (carries `delta`)
    Counter,
    /// Most recently received value (carries `value`)
    Gauge,
}

impl MetricKind {
    /// Convert to the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

impl FromStr for MetricKind {
    type Err = StoreError;

    /// Parse the wire representation. Matching is exact (`"counter"` or `"gauge"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            other => Err(StoreError::Validation(format!(
                "metric type should be gauge or counter, got {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
