//! Graceful Shutdown
//!
//! One stop flag shared by the HTTP server, the reporter loops and the
//! snapshot flusher, plus the count of HTTP requests still being handled.
//! Both live in `watch` channels so a waiter that shows up late still sees
//! the current value.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Stop signal and in-flight request count.
#[derive(Clone)]
pub struct ShutdownController {
    stopped: Arc<watch::Sender<bool>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(watch::channel(false).0),
            in_flight: Arc::new(watch::channel(0).0),
        }
    }

    /// Raise the stop flag. Later calls are no-ops.
    pub fn shutdown(&self) {
        let raised = self.stopped.send_if_modified(|stopped| !std::mem::replace(stopped, true));
        if raised {
            tracing::info!("initiating graceful shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Resolve once the stop flag is raised, immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.stopped.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// HTTP requests currently being handled.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Count one request until the returned guard drops.
    pub fn track_request(&self) -> RequestGuard {
        self.in_flight.send_modify(|n| *n += 1);
        RequestGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Wait until no request is in flight or `deadline` passes.
    ///
    /// Returns whether the drain completed.
    pub async fn drain(&self, deadline: Instant) -> bool {
        let mut rx = self.in_flight.subscribe();
        let drained = match tokio::time::timeout_at(deadline, rx.wait_for(|n| *n == 0)).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!("drain deadline hit with {} requests in flight", self.in_flight());
                false
            }
        };
        drained
    }

    /// Drain requests, then join `task`, both within one `grace` budget.
    ///
    /// The task is aborted once the budget is spent. Returns its output
    /// when it stopped in time.
    pub async fn finish<T>(&self, mut task: JoinHandle<T>, grace: Duration) -> Option<T> {
        let deadline = Instant::now() + grace;
        if self.drain(deadline).await {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(output)) => return Some(output),
                Ok(Err(e)) => {
                    tracing::error!("task failed during shutdown: {}", e);
                    return None;
                }
                Err(_) => tracing::warn!("task still running after {:?}", grace),
            }
        }
        task.abort();
        None
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one request counted while alive.
pub struct RequestGuard {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Raise the stop flag on SIGINT or SIGTERM.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let name = tokio::select! {
        name = interrupt() => name,
        name = terminate() => name,
    };
    tracing::info!("received {}", name);
    controller.shutdown();
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn interrupt() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(unix)]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn terminate() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!("cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
    "SIGTERM"
}

#[cfg(not(unix))]
async fn terminate() -> &'static str {
    std::future::pending().await
}
