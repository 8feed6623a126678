//! Volatile Metric Store
//!
//! Implements MetricStore with two in-process maps behind one lock.

use crate::domain::entities::{validate_all, Metric};
use crate::domain::errors::StoreError;
use crate::domain::ports::MetricStore;
use crate::domain::value_objects::MetricKind;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Maps {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
}

impl Maps {
    /// Apply one already-validated record and return the stored result.
    fn apply(&mut self, metric: &Metric) -> Result<Metric, StoreError> {
        match metric.kind {
            MetricKind::Counter => {
                let delta = metric.delta.unwrap_or_default();
                let current = self.counters.get(&metric.id).copied().unwrap_or(0);
                let total = current.checked_add(delta).ok_or_else(|| {
                    StoreError::Validation(format!("counter {} overflows", metric.id))
                })?;
                self.counters.insert(metric.id.clone(), total);
                Ok(Metric::counter(metric.id.clone(), total))
            }
            MetricKind::Gauge => {
                let value = metric.value.unwrap_or_default();
                self.gauges.insert(metric.id.clone(), value);
                Ok(Metric::gauge(metric.id.clone(), value))
            }
        }
    }

    /// Check that a batch can be applied without overflowing any counter.
    fn check_batch(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        let mut pending: HashMap<&str, i64> = HashMap::new();
        for m in metrics.iter().filter(|m| m.kind == MetricKind::Counter) {
            let base = match pending.get(m.id.as_str()) {
                Some(total) => *total,
                None => self.counters.get(&m.id).copied().unwrap_or(0),
            };
            let total = base
                .checked_add(m.delta.unwrap_or_default())
                .ok_or_else(|| StoreError::Validation(format!("counter {} overflows", m.id)))?;
            pending.insert(m.id.as_str(), total);
        }
        Ok(())
    }
}

/// In-memory metric store.
///
/// A single read/write lock guards both maps, so a save's
/// read-modify-write never interleaves with another save and a batch is
/// never partially visible to readers.
#[derive(Debug, Default)]
pub struct VolatileStore {
    maps: RwLock<Maps>,
}

impl VolatileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across both kinds.
    pub fn len(&self) -> usize {
        let maps = self.maps.read();
        maps.counters.len() + maps.gauges.len()
    }

    /// Whether nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn save_sync(&self, metric: &Metric) -> Result<Metric, StoreError> {
        metric.validate()?;
        self.maps.write().apply(metric)
    }

    pub(crate) fn save_batch_sync(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        validate_all(metrics)?;
        let mut maps = self.maps.write();
        maps.check_batch(metrics)?;
        for metric in metrics {
            maps.apply(metric)?;
        }
        Ok(())
    }

    pub(crate) fn get_all_sync(&self) -> Vec<Metric> {
        let maps = self.maps.read();
        let mut all = Vec::with_capacity(maps.counters.len() + maps.gauges.len());
        all.extend(
            maps.gauges
                .iter()
                .map(|(id, value)| Metric::gauge(id.clone(), *value)),
        );
        all.extend(
            maps.counters
                .iter()
                .map(|(id, delta)| Metric::counter(id.clone(), *delta)),
        );
        all
    }

    pub(crate) fn get_by_key_sync(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError> {
        let maps = self.maps.read();
        let found = match kind {
            MetricKind::Counter => maps.counters.get(id).map(|d| Metric::counter(id, *d)),
            MetricKind::Gauge => maps.gauges.get(id).map(|v| Metric::gauge(id, *v)),
        };
        found.ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl MetricStore for VolatileStore {
    async fn save(&self, metric: Metric) -> Result<Metric, StoreError> {
        self.save_sync(&metric)
    }

    async fn save_batch(&self, metrics: Vec<Metric>) -> Result<(), StoreError> {
        self.save_batch_sync(&metrics)
    }

    async fn get_all(&self) -> Result<Vec<Metric>, StoreError> {
        Ok(self.get_all_sync())
    }

    async fn get_by_key(&self, kind: MetricKind, id: &str) -> Result<Metric, StoreError> {
        self.get_by_key_sync(kind, id)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
