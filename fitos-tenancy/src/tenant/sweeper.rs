//! Background task that closes idle handles and expires directory entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use super::directory::TenantDirectory;
use super::provider::ProviderTable;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Handles closed because they sat idle too long.
    pub handles_closed: usize,
    /// Directory cache entries past their TTL.
    pub directory_expired: usize,
}

/// Run one sweep over every provider and the directory cache.
pub async fn sweep_once<H: Send + Sync + 'static>(
    providers: &ProviderTable<H>,
    directory: &TenantDirectory,
) -> SweepReport {
    let report = SweepReport {
        handles_closed: providers.sweep_idle().await,
        directory_expired: directory.evict_expired(),
    };
    if report.handles_closed > 0 {
        info!(closed = report.handles_closed, "Closed idle tenant handles");
    } else {
        debug!(expired = report.directory_expired, "Idle sweep found nothing to close");
    }
    report
}

/// Handle to a running sweeper.
///
/// Dropping the handle leaves the task running; call [`stop`](Self::stop)
/// to end it.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Arc<Notify>,
    sweeps: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Number of sweeps completed so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Stop the sweeper and wait for the current sweep to finish.
    pub async fn stop(self) {
        self.stop.notify_one();
        if let Err(e) = self.task.await {
            debug!(error = %e, "Sweeper task ended abnormally");
        }
    }
}

/// Spawn a task that sweeps every `every`.
///
/// The first sweep runs one full interval after the call.
pub fn spawn_sweeper<H: Send + Sync + 'static>(
    providers: Arc<ProviderTable<H>>,
    directory: Arc<TenantDirectory>,
    every: Duration,
) -> SweeperHandle {
    let stop = Arc::new(Notify::new());
    let sweeps = Arc::new(AtomicU64::new(0));

    let task = {
        let stop = Arc::clone(&stop);
        let sweeps = Arc::clone(&sweeps);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(interval = ?every, "Starting idle sweeper");
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        sweep_once(&providers, &directory).await;
                        sweeps.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            info!("Idle sweeper stopped");
        })
    };

    SweeperHandle { stop, sweeps, task }
}
