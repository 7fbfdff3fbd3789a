//! Process orchestration
//!
//! Startup: connect, clear legacy discovery topics, announce discovery,
//! start the sampling job. Shutdown, once SIGINT/SIGTERM arrives: publish
//! `offline`, disconnect, stop the job, flush output.

use crate::config::Settings;
use crate::error::ShutdownError;
use crate::metrics::SystemReader;
use crate::scheduler::PeriodicJob;
use crate::session::BrokerSession;
use crate::snapshot::SnapshotBuilder;
use crate::transport;
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound for each shutdown step; a step past it is logged and skipped
pub const SHUTDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Agent {
    session: Arc<BrokerSession>,
    builder: Arc<SnapshotBuilder>,
    interval: Duration,
}

impl Agent {
    pub fn new(session: Arc<BrokerSession>, builder: Arc<SnapshotBuilder>, interval: Duration) -> Self {
        Self {
            session,
            builder,
            interval,
        }
    }

    pub fn session(&self) -> &Arc<BrokerSession> {
        &self.session
    }

    /// Announce discovery and start the periodic publish job
    ///
    /// Discovery failures are logged; the state updates still start.
    pub async fn start(&self) -> PeriodicJob {
        if let Err(e) = self.session.remove_stale_discovery().await {
            warn!("Could not clear legacy discovery topics: {}", e);
        }
        if let Err(e) = self.session.publish_discovery().await {
            error!("Discovery announce failed: {}", e);
        }

        let session = self.session.clone();
        let builder = self.builder.clone();
        info!("Publishing sensors every {:?}", self.interval);
        PeriodicJob::start("sensors", self.interval, move || {
            publish_cycle(session.clone(), builder.clone())
        })
    }

    /// Run until `shutdown` is cancelled, then shut down in order
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let job = self.start().await;
        shutdown.cancelled().await;
        info!("Program killed: running cleanup code");
        self.shutdown(job).await;
        Ok(())
    }

    async fn shutdown(&self, job: PeriodicJob) {
        match timeout(SHUTDOWN_STEP_TIMEOUT, self.session.announce_offline()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{}", ShutdownError::Announce(e)),
            Err(_) => error!("{}", step_timed_out("offline announce")),
        }
        match timeout(SHUTDOWN_STEP_TIMEOUT, self.session.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{}", ShutdownError::Disconnect(e)),
            Err(_) => error!("{}", step_timed_out("disconnect")),
        }
        // a tick stuck past the limit is detached; its job is already cancelled
        if timeout(SHUTDOWN_STEP_TIMEOUT, job.stop()).await.is_err() {
            error!("{}", step_timed_out("scheduler stop"));
        }
        info!("Shutdown complete");
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
    }
}

fn step_timed_out(step: &'static str) -> ShutdownError {
    ShutdownError::TimedOut {
        step,
        limit: SHUTDOWN_STEP_TIMEOUT,
    }
}

/// Sample every reading and publish the state payload
pub async fn publish_cycle(session: Arc<BrokerSession>, builder: Arc<SnapshotBuilder>) -> Result<()> {
    // sysinfo refreshes and vcgencmd block
    let snapshot = tokio::task::spawn_blocking(move || builder.build())
        .await
        .context("snapshot task failed")?;
    session
        .publish_snapshot(&snapshot)
        .await
        .context("failed to publish sensor state")?;
    Ok(())
}

/// Termination signals turned into one awaitable event
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Install the handlers; fails only if the OS refuses them
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                interrupt: signal(SignalKind::interrupt())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Name of the signal that arrived
    pub async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.terminate.recv() => "SIGTERM",
                _ = self.interrupt.recv() => "SIGINT",
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            "Ctrl+C"
        }
    }
}

/// Run the agent until SIGINT or SIGTERM
pub async fn run(settings: Settings) -> Result<()> {
    info!(
        "Starting system-sensors {} for {}",
        env!("CARGO_PKG_VERSION"),
        settings.device.display_name
    );

    let mut signals = ShutdownSignal::install().context("cannot install signal handlers")?;

    let session = transport::connect(&settings).await.with_context(|| {
        format!(
            "cannot connect to broker {}:{}",
            settings.broker.host, settings.broker.port
        )
    })?;

    let reader = tokio::task::spawn_blocking(SystemReader::new)
        .await
        .context("metric reader setup failed")?;
    let builder = SnapshotBuilder::new(Box::new(reader), settings.timezone);
    let agent = Agent::new(session, Arc::new(builder), settings.update_interval);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        let signal = signals.recv().await;
        info!("Received {}", signal);
        trigger.cancel();
    });

    agent.run_until(shutdown).await
}
