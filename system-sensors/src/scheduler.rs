//! Cancellable periodic job
//!
//! The first tick fires one full interval after `start`. The next wait
//! begins only when the previous action returned, so ticks never overlap
//! and overruns shift later ticks instead of being caught up.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct PeriodicJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicJob {
    /// Run `action` every `interval` on a background task
    ///
    /// An action that fails or panics is logged; the job keeps ticking.
    pub fn start<F, Fut>(name: &'static str, interval: Duration, mut action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            debug!("{} job started (interval: {:?})", name, interval);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match AssertUnwindSafe(action()).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("{} job tick failed: {:#}", name, e),
                    Err(_) => error!("{} job tick panicked", name),
                }
            }
            debug!("{} job stopped", name);
        });

        Self { cancel, handle }
    }

    /// Cancel and wait for the in-flight tick, if any
    ///
    /// No tick runs after this returns. A tick in progress is never
    /// interrupted.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Periodic job ended abnormally: {}", e);
        }
    }
}
