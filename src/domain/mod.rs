//! Domain Layer
//!
//! Metric records, their aggregation rules, and the ports the rest of the
//! system plugs into. Nothing in here knows about HTTP, files or SQL.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod value_objects;

pub use entities::Metric;
pub use errors::StoreError;
pub use value_objects::MetricKind;
