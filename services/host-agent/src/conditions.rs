//! Condition write discipline.
//!
//! Two policies, chosen per call site:
//!
//! - `report`: one attempt; failure is logged and swallowed. Used for
//!   transient and negative status, which the next loop tick re-reports
//!   anyway.
//! - `confirm`: retried with the fixed delay until the write lands. Used
//!   exclusively for the terminal `...Ready=True` transition of each phase;
//!   nothing else re-drives that transition if it is lost.

use std::sync::Arc;

use ferrum_api::{Condition, HostPatch};
use ferrum_reconcile::{Cancelled, RetryPolicy};
use tracing::warn;

use crate::client::Registry;

pub struct ConditionLedger {
    registry: Arc<dyn Registry>,
    retry: RetryPolicy,
}

impl ConditionLedger {
    pub fn new(registry: Arc<dyn Registry>, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    /// Best-effort single-attempt patch.
    pub async fn report_patch(&self, host: &str, patch: HostPatch) {
        if let Err(e) = self.registry.patch_host(host, &patch).await {
            warn!(host, error = %e, "Best-effort status report failed");
        }
    }

    /// Best-effort single-attempt condition write.
    pub async fn report(&self, host: &str, condition: Condition) {
        self.report_patch(
            host,
            HostPatch {
                condition: Some(condition),
                ..Default::default()
            },
        )
        .await;
    }

    /// Patch retried until it lands; only shutdown interrupts it.
    pub async fn confirm_patch(&self, host: &str, patch: HostPatch) -> Result<(), Cancelled> {
        self.retry
            .run_until_ok("confirm_status_patch", || {
                self.registry.patch_host(host, &patch)
            })
            .await?;
        Ok(())
    }

    /// Condition write retried until it lands.
    pub async fn confirm(&self, host: &str, condition: Condition) -> Result<(), Cancelled> {
        self.confirm_patch(
            host,
            HostPatch {
                condition: Some(condition),
                ..Default::default()
            },
        )
        .await
    }
}
