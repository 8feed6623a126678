//! Outbound Adapters
//!
//! Storage backends, the delivery transport, and the process gauge reader.

mod http_transport;
mod process_gauge_source;
mod snapshot_store;
mod sqlite_store;
mod volatile_store;

pub use http_transport::{classify_status, HttpTransport};
pub use process_gauge_source::ProcessGaugeSource;
pub use snapshot_store::{SnapshotConfig, SnapshotStore};
pub use sqlite_store::{ConnectionState, SqliteStore, METRICS_SCHEMA};
pub use volatile_store::VolatileStore;
