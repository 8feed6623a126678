//! metrics-agent - samples process gauges and reports them to the server

use metrics_pipeline::adapters::outbound::{HttpTransport, ProcessGaugeSource};
use metrics_pipeline::application::{Reporter, ReporterConfig};
use metrics_pipeline::config::load_agent_config;
use metrics_pipeline::infrastructure::{shutdown_signal, BackoffPolicy, ShutdownController};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_agent_config()?;

    tracing_subscriber::fmt()
        .with_max_level(cfg.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!("starting metrics agent target={}", cfg.address);

    let transport = HttpTransport::new(&cfg.address)?;
    tracing::info!("reporting to {}", transport.endpoint());

    let reporter = Reporter::new(
        Arc::new(ProcessGaugeSource::new()),
        Arc::new(transport),
        ReporterConfig {
            poll_interval: cfg.poll_interval,
            report_interval: cfg.report_interval,
            backoff: BackoffPolicy::default(),
        },
    );

    let shutdown = ShutdownController::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    reporter.run(&shutdown).await;

    tracing::info!("metrics agent stopped");
    Ok(())
}
