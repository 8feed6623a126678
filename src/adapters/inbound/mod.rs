//! Inbound Adapters
//!
//! HTTP entry point of the aggregator.

mod api_server;

pub use api_server::{router, ApiServer, ApiState, IngestError};
