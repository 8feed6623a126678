//! metrics-pipeline Library
//!
//! Counter/gauge aggregation server, pluggable storage backends, and the
//! reporting agent that feeds it. Exposed as a library for the two
//! binaries and for integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{Reporter, ReporterConfig};
pub use config::{load_agent_config, load_server_config, AgentConfig, ServerConfig, StorageBackend};
pub use domain::entities::Metric;
pub use domain::errors::StoreError;
pub use domain::ports::{DeliveryStatus, GaugeSource, MetricStore, Transport, TransportError};
pub use domain::value_objects::MetricKind;
