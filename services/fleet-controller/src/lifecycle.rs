//! Two-phase deletion and host status upkeep.
//!
//! A Host record must not disappear before the physical machine has been
//! wiped, so every host carries a finalizer guard from creation. Deletion of
//! a guarded host proceeds in two phases: the reconciler first requests a
//! reset (`needs_reset = true`) and then, once the agent confirms
//! (`reset = true`), drops the guard so the store can remove the record.
//! Machine deletion cascades the same reset request to its bound host before
//! the machine itself finalizes.

use std::sync::Arc;

use ferrum_api::{
    reason, set_condition, summarize_ready, Condition, ConditionType, Host, Machine, Severity,
    MACHINE_GUARD, RESET_GUARD,
};
use tracing::{debug, info};

use crate::store::{ResourceStore, StoreError};

/// Outcome counters for one lifecycle pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePass {
    pub resets_requested: usize,
    pub hosts_finalized: usize,
    pub machines_finalized: usize,
}

pub struct LifecycleReconciler {
    hosts: Arc<dyn ResourceStore<Host>>,
    machines: Arc<dyn ResourceStore<Machine>>,
    namespace: String,
}

impl LifecycleReconciler {
    pub fn new(
        hosts: Arc<dyn ResourceStore<Host>>,
        machines: Arc<dyn ResourceStore<Machine>>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            hosts,
            machines,
            namespace: namespace.into(),
        }
    }

    /// Run one pass over all machines and hosts in the namespace.
    pub async fn reconcile(&self) -> Result<LifecyclePass, StoreError> {
        let mut pass = LifecyclePass::default();

        // Machines first: a deleting machine must push its reset request to
        // the bound host before the host pass evaluates it.
        for machine in self.machines.list(&self.namespace).await? {
            match self.reconcile_machine(machine).await {
                Ok(finalized) => pass.machines_finalized += usize::from(finalized),
                Err(e) if e.is_conflict() => {
                    debug!(error = %e, "Concurrent write during machine finalization, will retry");
                }
                Err(e) => return Err(e),
            }
        }

        for host in self.hosts.list(&self.namespace).await? {
            match self.reconcile_host(host).await {
                Ok(HostOutcome::ResetRequested) => pass.resets_requested += 1,
                Ok(HostOutcome::Finalized) => pass.hosts_finalized += 1,
                Ok(HostOutcome::Unchanged) => {}
                Err(e) if e.is_conflict() => {
                    debug!(error = %e, "Concurrent write during host reconcile, will retry");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(pass)
    }

    async fn reconcile_host(&self, mut host: Host) -> Result<HostOutcome, StoreError> {
        if !host.meta.is_deleting() {
            return self.sync_ready(host).await;
        }

        // Unguarded hosts have nothing holding them; the store removes them
        // on the deletion mark itself, so reaching here means the guard (or
        // some foreign finalizer) is present.
        if host.markers.reset {
            host.meta.remove_finalizer(RESET_GUARD);
            info!(host = %host.meta.name, "Reset confirmed, releasing host record");
            self.hosts.update(host).await?;
            return Ok(HostOutcome::Finalized);
        }

        if !host.markers.needs_reset {
            self.request_reset(&mut host);
            self.hosts.update(host).await?;
            return Ok(HostOutcome::ResetRequested);
        }

        // Reset requested but not yet confirmed by the agent: wait.
        Ok(HostOutcome::Unchanged)
    }

    /// Keep the derived `Ready` summary condition current.
    async fn sync_ready(&self, mut host: Host) -> Result<HostOutcome, StoreError> {
        if host.conditions.is_empty() {
            return Ok(HostOutcome::Unchanged);
        }
        let summary = summarize_ready(&host.conditions);
        if ferrum_api::get_condition(&host.conditions, ConditionType::Ready) == Some(&summary) {
            return Ok(HostOutcome::Unchanged);
        }
        set_condition(&mut host.conditions, summary);
        self.hosts.update(host).await?;
        Ok(HostOutcome::Unchanged)
    }

    fn request_reset(&self, host: &mut Host) {
        host.markers.needs_reset = true;
        set_condition(
            &mut host.conditions,
            Condition::not_ready(
                ConditionType::ResetReady,
                Severity::Info,
                reason::WAITING_FOR_RESET,
                "reset requested, waiting for the agent to confirm",
            ),
        );
        info!(host = %host.meta.name, "Requested host reset");
    }

    /// Returns true when the machine's guard was released this pass.
    async fn reconcile_machine(&self, mut machine: Machine) -> Result<bool, StoreError> {
        if !machine.meta.is_deleting() || !machine.meta.has_finalizer(MACHINE_GUARD) {
            return Ok(false);
        }

        // Cascade the reset request to the bound host, then let the machine go.
        if let Some(host_ref) = machine.host_ref.clone() {
            if let Some(mut host) = self.hosts.get(&host_ref.namespace, &host_ref.name).await? {
                if !host.markers.needs_reset {
                    self.request_reset(&mut host);
                    self.hosts.update(host).await?;
                }
            }
        }

        machine.meta.remove_finalizer(MACHINE_GUARD);
        info!(machine = %machine.meta.name, "Machine deletion cascaded, releasing record");
        self.machines.update(machine).await?;
        Ok(true)
    }
}

enum HostOutcome {
    ResetRequested,
    Finalized,
    Unchanged,
}
