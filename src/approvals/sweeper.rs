//! # Approval Expiry Sweeper
//!
//! Background service that periodically expires WAITING approval instances
//! whose deadline has passed.
//!
//! ## Lifecycle
//!
//! - Built from an [`ApprovalService`] and the approvals configuration
//! - `run()` ticks on `approvals.sweep_interval_ms` until the shutdown watch
//!   channel flips to `true` (or its sender is dropped)
//! - A failed sweep cycle is logged and the loop keeps going
//!
//! ```rust,ignore
//! let sweeper = ApprovalSweeper::new(service.clone());
//! let (handle, shutdown) = sweeper.spawn();
//! // ...
//! shutdown.send(true)?;
//! handle.await??;
//! ```

use super::service::{ApprovalService, SweepReport};
use crate::error::GatekeeperResult;
use crate::logging::log_error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ApprovalSweeper {
    service: Arc<ApprovalService>,
    interval: Duration,
}

impl ApprovalSweeper {
    #[must_use]
    pub fn new(service: Arc<ApprovalService>) -> Self {
        let interval = service.config().sweep_interval();
        Self { service, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One sweep at the service clock's current time
    pub async fn sweep_once(&self) -> GatekeeperResult<SweepReport> {
        self.service.sweep(self.service.now_millis()).await
    }

    /// Run the sweep loop until shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> GatekeeperResult<()> {
        let period = self.interval.max(Duration::from_millis(1));
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = period.as_millis() as u64, "Starting approval sweeper");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => debug!(
                            scanned = report.scanned,
                            expired = report.expired,
                            "Approval sweep cycle finished"
                        ),
                        Err(e) => log_error("approval_sweeper", "sweep", &e.to_string(), None),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Approval sweeper stopped");
        Ok(())
    }

    /// Spawn `run` on the current runtime. Send `true` on the returned sender
    /// to stop it.
    pub fn spawn(self) -> (JoinHandle<GatekeeperResult<()>>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { self.run(shutdown_rx).await });
        (handle, shutdown_tx)
    }
}
