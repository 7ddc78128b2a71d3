//! Machine-to-host association.
//!
//! Machines declare desired capacity; hosts volunteer capacity. The scheduler
//! lazily binds each unassociated machine to the first available host whose
//! labels satisfy the machine's selector. There is no scoring, packing or
//! preemption: first match wins, and an empty candidate set is backpressure
//! (requeue silently), not an error.

use std::sync::Arc;

use ferrum_api::{provider_id, Host, Machine, ObjectRef};
use tracing::{debug, info, warn};

use crate::store::{ResourceStore, StoreError};

/// Outcome counters for one scheduling pass, used for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePass {
    pub bound: usize,
    pub waiting: usize,
    pub cleared: usize,
}

pub struct AssociationScheduler {
    hosts: Arc<dyn ResourceStore<Host>>,
    machines: Arc<dyn ResourceStore<Machine>>,
    namespace: String,
}

impl AssociationScheduler {
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

    /// Run one scheduling pass over every machine in the namespace.
    ///
    /// Stale-revision conflicts are expected under concurrent agent patches;
    /// the affected machine is simply picked up again on the next pass.
    pub async fn reconcile(&self) -> Result<SchedulePass, StoreError> {
        let machines = self.machines.list(&self.namespace).await?;
        let mut pass = SchedulePass::default();

        for machine in machines {
            if machine.meta.is_deleting() {
                continue;
            }
            let outcome = if machine.is_associated() {
                self.sync_associated(machine).await
            } else {
                self.try_bind(machine).await
            };
            match outcome {
                Ok(MachineOutcome::Bound) => pass.bound += 1,
                Ok(MachineOutcome::Waiting) => pass.waiting += 1,
                Ok(MachineOutcome::Cleared) => pass.cleared += 1,
                Ok(MachineOutcome::Unchanged) => {}
                Err(e) if e.is_conflict() => {
                    debug!(error = %e, "Concurrent write during scheduling, will retry next pass");
                }
                Err(e) => return Err(e),
            }
        }

        if pass != SchedulePass::default() {
            info!(
                bound = pass.bound,
                waiting = pass.waiting,
                cleared = pass.cleared,
                "Scheduling pass complete"
            );
        }
        Ok(pass)
    }

    /// Bind `machine` to the first matching available host, if any.
    async fn try_bind(&self, mut machine: Machine) -> Result<MachineOutcome, StoreError> {
        let hosts = self.hosts.list(&self.namespace).await?;
        let machine_ref = ObjectRef::new(&machine.meta.namespace, &machine.meta.name);

        // The host write commits the binding, so a pass interrupted between
        // the two writes leaves a host already pointing at this machine.
        // Resume that binding instead of hunting for a fresh host.
        let committed = hosts
            .iter()
            .find(|host| host.machine_ref.as_ref() == Some(&machine_ref))
            .cloned();

        let host = match committed {
            Some(host) => host,
            None => {
                let candidate = hosts.into_iter().find(|host| {
                    host.available_for_association()
                        && !host.meta.is_deleting()
                        && machine
                            .selector
                            .as_ref()
                            .map_or(true, |s| s.matches(&host.meta.labels))
                });

                let Some(mut host) = candidate else {
                    debug!(machine = %machine.meta.name, "No available host, machine stays pending");
                    return Ok(MachineOutcome::Waiting);
                };

                host.machine_ref = Some(machine_ref);
                host.bootstrap_secret_ref = machine.bootstrap_secret_ref.clone();
                // A conflict here aborts before the machine side is touched.
                self.hosts.update(host).await?
            }
        };

        machine.provider_id = Some(provider_id(&host.meta.namespace, &host.meta.name));
        machine.host_ref = Some(ObjectRef::new(&host.meta.namespace, &host.meta.name));
        machine.ready = host.markers.installed && host.markers.bootstrapped;
        let machine = self.machines.update(machine).await?;

        info!(
            machine = %machine.meta.name,
            host = %host.meta.name,
            "Associated machine with host"
        );
        Ok(MachineOutcome::Bound)
    }

    /// Keep an associated machine's derived state in line with its host.
    async fn sync_associated(&self, mut machine: Machine) -> Result<MachineOutcome, StoreError> {
        let Some(host_ref) = machine.host_ref.clone() else {
            return Ok(MachineOutcome::Unchanged);
        };
        let host = self.hosts.get(&host_ref.namespace, &host_ref.name).await?;

        let Some(host) = host else {
            warn!(
                machine = %machine.meta.name,
                host = %host_ref,
                "Bound host vanished, clearing association"
            );
            machine.clear_association();
            self.machines.update(machine).await?;
            return Ok(MachineOutcome::Cleared);
        };

        let ready = host.markers.installed && host.markers.bootstrapped;
        if machine.ready != ready {
            machine.ready = ready;
            self.machines.update(machine).await?;
        }
        Ok(MachineOutcome::Unchanged)
    }
}

enum MachineOutcome {
    Bound,
    Waiting,
    Cleared,
    Unchanged,
}
