//! Application Layer
//!
//! Use cases that orchestrate domain ports.

mod reporter;

pub use reporter::{
    ReportError, Reporter, ReporterConfig, ReporterState, POLL_COUNT, RANDOM_VALUE,
};
