//! Gauge Source Port
//!
//! Abstracts where the reporter's runtime gauges come from.

/// Source of named runtime gauges.
///
/// Implementations return a fixed set of names; a gauge that cannot be
/// read on the current platform is simply left out.
pub trait GaugeSource: Send + Sync {
    /// Capture the current gauge values.
    fn sample(&self) -> Vec<(&'static str, f64)>;
}
