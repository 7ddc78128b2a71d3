//! Background reconcile worker.
//!
//! Runs the association scheduler and the lifecycle reconciler on a periodic
//! interval until shutdown is signalled.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::lifecycle::LifecycleReconciler;
use crate::scheduler::AssociationScheduler;
use crate::state::AppState;
use crate::store::StoreError;

pub struct ReconcileWorker {
    scheduler: AssociationScheduler,
    lifecycle: LifecycleReconciler,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(state: &AppState, interval: Duration) -> Self {
        Self {
            scheduler: AssociationScheduler::new(
                state.hosts(),
                state.machines(),
                state.namespace(),
            ),
            lifecycle: LifecycleReconciler::new(
                state.hosts(),
                state.machines(),
                state.namespace(),
            ),
            interval,
        }
    }

    /// Run until shutdown is signalled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // No tick on startup; the first pass waits one interval.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_pass().await {
                        error!(error = %e, "Reconcile pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_pass(&self) -> Result<(), StoreError> {
        let lifecycle = self.lifecycle.reconcile().await?;
        if lifecycle.resets_requested > 0
            || lifecycle.hosts_finalized > 0
            || lifecycle.machines_finalized > 0
        {
            info!(
                resets_requested = lifecycle.resets_requested,
                hosts_finalized = lifecycle.hosts_finalized,
                machines_finalized = lifecycle.machines_finalized,
                "Lifecycle pass complete"
            );
        }

        self.scheduler.reconcile().await?;
        Ok(())
    }
}
