//! Infrastructure Layer
//!
//! Cross-cutting concerns: retry scheduling and graceful shutdown.

pub mod backoff;
pub mod shutdown;

pub use backoff::{retry_with_backoff, BackoffPolicy};
pub use shutdown::{shutdown_signal, RequestGuard, ShutdownController};
