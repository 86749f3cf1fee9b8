//! Scheduled artifact reclamation
//!
//! Runs [`ArtifactStore::sweep`] on its own interval, independent of request
//! handling. A failed pass is logged and the next tick tries again.

use super::{ArtifactStore, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default retention for untouched artifacts
pub const DEFAULT_ARTIFACT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default delay between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Background reclamation task
#[derive(Clone)]
pub struct Reclaimer {
    store: Arc<dyn ArtifactStore>,
    max_age: Duration,
    interval: Duration,
}

impl Reclaimer {
    pub fn new(store: Arc<dyn ArtifactStore>, max_age: Duration, interval: Duration) -> Self {
        Self {
            store,
            max_age,
            interval,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Run a single sweep, logging instead of propagating failure
    pub async fn run_once(&self) -> Option<SweepReport> {
        match self.store.sweep(self.max_age).await {
            Ok(report) => {
                if report.removed > 0 || report.failed > 0 {
                    tracing::info!(
                        scanned = report.scanned,
                        removed = report.removed,
                        failed = report.failed,
                        "Reclamation sweep finished"
                    );
                } else {
                    tracing::debug!(scanned = report.scanned, "Reclamation sweep found nothing stale");
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Reclamation sweep failed");
                None
            }
        }
    }

    /// Spawn the periodic sweep loop; stops when `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(
                ttl_secs = self.max_age.as_secs(),
                interval_secs = self.interval.as_secs(),
                "Artifact reclamation scheduled"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Artifact reclamation stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }
}
