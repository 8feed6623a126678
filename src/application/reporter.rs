//! Reporter - agent-side use case
//!
//! Samples runtime gauges on one clock and ships them, together with the
//! poll counter, to the aggregator on another. The two loops share only
//! the buffered state behind a read/write lock.

use crate::domain::entities::Metric;
use crate::domain::ports::{DeliveryStatus, GaugeSource, Transport, TransportError};
use crate::infrastructure::{retry_with_backoff, BackoffPolicy, ShutdownController};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Name of the counter incremented once per sample.
pub const POLL_COUNT: &str = "PollCount";
/// Name of the extra gauge filled with a fresh random number per sample.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Reporter timing and retry settings.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Buffered samples awaiting delivery.
#[derive(Debug, Default, Clone)]
pub struct ReporterState {
    /// Latest value per gauge name
    pub gauges: HashMap<String, f64>,
    /// Samples taken since the last successful delivery
    pub poll_count: i64,
}

/// Why a report cycle failed.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("aggregator unavailable")]
    Unavailable,
    #[error("aggregator rejected the batch")]
    Rejected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReportError {
    fn is_retryable(&self) -> bool {
        match self {
            ReportError::Unavailable => true,
            ReportError::Rejected => false,
            ReportError::Transport(TransportError::Request(_)) => true,
            ReportError::Transport(TransportError::Encode(_)) => false,
        }
    }
}

/// Periodic sampler and sender.
pub struct Reporter {
    state: Arc<RwLock<ReporterState>>,
    source: Arc<dyn GaugeSource>,
    transport: Arc<dyn Transport>,
    config: ReporterConfig,
}

impl Reporter {
    pub fn new(
        source: Arc<dyn GaugeSource>,
        transport: Arc<dyn Transport>,
        config: ReporterConfig,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(ReporterState::default())),
            source,
            transport,
            config,
        }
    }

    /// Samples taken and not yet delivered.
    pub fn poll_count(&self) -> i64 {
        self.state.read().poll_count
    }

    /// Copy of the buffered gauges.
    pub fn gauges(&self) -> HashMap<String, f64> {
        self.state.read().gauges.clone()
    }

    /// Take one sample: refresh every gauge and bump the poll counter.
    pub fn sample(&self) {
        let mut readings = self.source.sample();
        readings.push((RANDOM_VALUE, rand::random::<f64>()));

        let mut state = self.state.write();
        for (name, value) in readings {
            if !value.is_finite() {
                tracing::debug!("dropping non-finite reading {}={}", name, value);
                continue;
            }
            state.gauges.insert(name.to_string(), value);
        }
        state.poll_count += 1;
    }

    /// Frozen copy of the buffer as a wire batch, plus the counter it carries.
    fn snapshot(&self) -> (Vec<Metric>, i64) {
        let state = self.state.read();
        let mut batch: Vec<Metric> = state
            .gauges
            .iter()
            .map(|(name, value)| Metric::gauge(name.clone(), *value))
            .collect();
        batch.push(Metric::counter(POLL_COUNT, state.poll_count));
        (batch, state.poll_count)
    }

    async fn deliver_once(&self, batch: &[Metric]) -> Result<(), ReportError> {
        match self.transport.deliver(batch).await? {
            DeliveryStatus::Delivered => Ok(()),
            DeliveryStatus::Retryable => Err(ReportError::Unavailable),
            DeliveryStatus::Rejected => Err(ReportError::Rejected),
        }
    }

    /// Ship the buffered state, retrying per the backoff policy.
    ///
    /// Returns the number of records delivered. On failure the buffer is
    /// left untouched so the next cycle carries the accumulated count.
    pub async fn report(&self) -> Result<usize, ReportError> {
        let (batch, delivered_count) = self.snapshot();
        if delivered_count == 0 && batch.len() == 1 {
            tracing::debug!("nothing sampled yet, skipping report");
            return Ok(0);
        }

        retry_with_backoff(
            &self.config.backoff,
            "metrics delivery",
            ReportError::is_retryable,
            || self.deliver_once(&batch),
        )
        .await?;

        // samples taken while the batch was in flight stay counted
        self.state.write().poll_count -= delivered_count;
        tracing::debug!("reported {} metrics, poll count {}", batch.len(), delivered_count);
        Ok(batch.len())
    }

    /// Drive the sampler and sender until shutdown.
    pub async fn run(&self, shutdown: &ShutdownController) {
        tracing::info!(
            "reporter started, poll every {:?}, report every {:?}",
            self.config.poll_interval,
            self.config.report_interval
        );
        tokio::join!(self.sample_loop(shutdown), self.send_loop(shutdown));
        tracing::info!("reporter stopped");
    }

    async fn sample_loop(&self, shutdown: &ShutdownController) {
        let stopped = shutdown.wait();
        tokio::pin!(stopped);
        let period = self.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => self.sample(),
            }
        }
    }

    async fn send_loop(&self, shutdown: &ShutdownController) {
        let stopped = shutdown.wait();
        tokio::pin!(stopped);
        let period = self.config.report_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.report().await {
                        tracing::error!("failed to report metrics: {}", e);
                    }
                }
            }
        }
    }
}
