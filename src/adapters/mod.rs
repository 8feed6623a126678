//! Adapters Layer
//!
//! Inbound (HTTP) and outbound (storage, transport, procfs) implementations
//! of the domain ports.

pub mod inbound;
pub mod outbound;
