//! The host-side phase state machine.
//!
//! One driver instance walks a machine through registration, installation,
//! bootstrap and the long-running reconcile loop, talking to the fleet
//! controller through the [`Registry`] seam and to the local OS through the
//! [`OsStrategy`] seam.
//!
//! Failure policy is uniform: a phase retries its current step with the fixed
//! delay until it succeeds or shutdown cancels it. Sub-steps that already
//! succeeded within this process are not repeated on retry; a crash restarts
//! the phase from the top, which every step tolerates.

use std::sync::Arc;

use ferrum_api::{
    reason, select_device, Condition, ConditionType, HostPatch, HostPhase, Registration, Severity,
    BOOTSTRAP_FORMAT_CLOUD_CONFIG,
};
use ferrum_reconcile::{Cancelled, RetryPolicy};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{CreateHostRequest, Registry, RegistryError};
use crate::conditions::ConditionLedger;
use crate::strategy::OsStrategy;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// A phase that needs a registered hostname was entered before
    /// registration completed (or before the persisted hostname was loaded).
    #[error("host has not completed registration")]
    NotRegistered,
}

/// How a bootstrap pass left the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Payload already applied; the bootstrapped marker is confirmed.
    Bootstrapped,
    /// Payload staged this pass; the machine must reboot to activate it.
    RebootRequired,
}

/// Why the run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A controller-requested reset was performed; the record is gone.
    ResetCompleted,
    /// A bootstrap payload was staged; the caller should reboot.
    RebootRequired,
}

/// Per-attempt failure, separating shutdown from retryable errors.
enum StepError {
    Cancelled(Cancelled),
    Failed(anyhow::Error),
}

impl From<Cancelled> for StepError {
    fn from(c: Cancelled) -> Self {
        StepError::Cancelled(c)
    }
}

impl From<RegistryError> for StepError {
    fn from(e: RegistryError) -> Self {
        StepError::Failed(e.into())
    }
}

impl From<anyhow::Error> for StepError {
    fn from(e: anyhow::Error) -> Self {
        StepError::Failed(e)
    }
}

#[derive(Debug, Error)]
#[error("unsupported bootstrap format '{0}'")]
struct UnsupportedFormat(String);

fn phase_patch(phase: HostPhase) -> HostPatch {
    HostPatch {
        phase: Some(phase),
        ..Default::default()
    }
}

pub struct HostPhaseDriver {
    registry: Arc<dyn Registry>,
    os: Arc<dyn OsStrategy>,
    ledger: ConditionLedger,
    retry: RetryPolicy,
    public_key: String,
    private_key: Vec<u8>,
    hostname: Option<String>,

    // Per-process idempotency latches. Cleared only by restarting the agent.
    cloud_init_done: bool,
    install_done: bool,
    reset_payload_applied: bool,
}

impl HostPhaseDriver {
    pub fn new(
        registry: Arc<dyn Registry>,
        os: Arc<dyn OsStrategy>,
        retry: RetryPolicy,
        public_key: String,
        private_key: Vec<u8>,
    ) -> Self {
        Self {
            ledger: ConditionLedger::new(registry.clone(), retry.clone()),
            registry,
            os,
            retry,
            public_key,
            private_key,
            hostname: None,
            cloud_init_done: false,
            install_done: false,
            reset_payload_applied: false,
        }
    }

    /// Adopt a hostname persisted by a previous registration, so the
    /// post-registration phases can run without re-registering.
    pub fn set_hostname(&mut self, hostname: impl Into<String>) {
        self.hostname = Some(hostname.into());
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    fn require_hostname(&self) -> Result<String, DriverError> {
        self.hostname.clone().ok_or(DriverError::NotRegistered)
    }

    /// Register this machine with the fleet controller and finalize the
    /// registration locally. Retries the whole attempt on any failure;
    /// returns the registered hostname.
    pub async fn register(&mut self) -> Result<String, Cancelled> {
        loop {
            match self.try_register().await {
                Ok(hostname) => {
                    info!(hostname, "Registration complete");
                    self.hostname = Some(hostname.clone());
                    return Ok(hostname);
                }
                Err(StepError::Cancelled(c)) => return Err(c),
                Err(StepError::Failed(e)) => {
                    warn!(error = %e, "Registration attempt failed, will retry");
                    self.retry.wait("register").await?;
                }
            }
        }
    }

    async fn try_register(&mut self) -> Result<String, StepError> {
        let registration = self.registry.get_registration().await?;
        let hostname = self.derive_hostname(&registration)?;

        // A no-op patch doubles as an existence probe: success means a prior
        // attempt already created this Host and we resume instead of
        // re-creating it.
        match self.registry.patch_host(&hostname, &HostPatch::noop()).await {
            Ok(_) => {
                info!(hostname, "Host record already present, resuming");
            }
            Err(RegistryError::NotFound) => {
                let request = CreateHostRequest {
                    name: hostname.clone(),
                    public_key: self.public_key.clone(),
                    labels: registration.host_labels.clone(),
                    annotations: registration.host_annotations.clone(),
                };
                self.registry.create_host(&request).await?;
                info!(hostname, "Host record created");
            }
            Err(e) => return Err(e.into()),
        }

        self.finalize(&hostname, &registration).await?;
        Ok(hostname)
    }

    fn derive_hostname(&self, registration: &Registration) -> anyhow::Result<String> {
        let config = &registration.config.agent.hostname;
        let base = if config.use_existing {
            self.os.current_hostname()?
        } else {
            format!("host-{:08x}", rand::random::<u32>())
        };
        Ok(match &config.prefix {
            Some(prefix) => format!("{prefix}{base}"),
            None => base,
        })
    }

    /// Persist the registration locally, then confirm it upstream.
    ///
    /// `RegistrationReady=True` is the hand-off that lets installation start,
    /// so it is confirmed with retry rather than reported best-effort.
    async fn finalize(
        &mut self,
        hostname: &str,
        registration: &Registration,
    ) -> Result<(), StepError> {
        self.ledger
            .report_patch(hostname, phase_patch(HostPhase::FinalizingRegistration))
            .await;

        if let Err(e) = self
            .os
            .persist_registration(hostname, &registration.config.agent, &self.private_key)
            .await
        {
            self.ledger
                .report(
                    hostname,
                    Condition::error(ConditionType::RegistrationReady, e.to_string()),
                )
                .await;
            return Err(StepError::Failed(e));
        }

        self.ledger
            .confirm(hostname, Condition::ready(ConditionType::RegistrationReady))
            .await?;
        self.ledger
            .report(
                hostname,
                Condition::not_ready(
                    ConditionType::InstallationReady,
                    Severity::Info,
                    reason::WAITING_FOR_INSTALLATION,
                    "",
                ),
            )
            .await;
        Ok(())
    }

    /// Stage cloud-init and the install payload, then confirm installation.
    pub async fn install(&mut self) -> Result<(), DriverError> {
        let hostname = self.require_hostname()?;
        self.ledger
            .report_patch(&hostname, phase_patch(HostPhase::Installing))
            .await;

        loop {
            match self.try_install().await {
                Ok(()) => break,
                Err(StepError::Cancelled(c)) => return Err(c.into()),
                Err(StepError::Failed(e)) => {
                    warn!(error = %e, "Install step failed, will retry");
                    self.ledger
                        .report(
                            &hostname,
                            Condition::error(ConditionType::InstallationReady, e.to_string()),
                        )
                        .await;
                    self.retry.wait("install").await?;
                }
            }
        }

        self.ledger
            .confirm_patch(
                &hostname,
                HostPatch {
                    installed: Some(true),
                    condition: Some(Condition::ready(ConditionType::InstallationReady)),
                    ..Default::default()
                },
            )
            .await?;
        info!(hostname, "Installation complete");
        Ok(())
    }

    async fn try_install(&mut self) -> Result<(), StepError> {
        if self.cloud_init_done && self.install_done {
            return Ok(());
        }
        let registration = self.registry.get_registration().await?;

        if !self.cloud_init_done {
            if let Some(cloud_init) = &registration.config.install.cloud_init {
                self.os.apply_cloud_init(cloud_init).await?;
            }
            self.cloud_init_done = true;
        }

        if !self.install_done {
            let device = match &registration.config.install.device {
                Some(device) => device.clone(),
                None => {
                    let disks = self.os.probe_disks()?;
                    select_device(&registration.config.install.device_selector, &disks)
                        .map_err(anyhow::Error::from)?
                }
            };
            let payload = registration
                .config
                .install
                .payload
                .clone()
                .unwrap_or(Value::Null);
            self.os.apply_install(&payload, &device).await?;
            info!(device, "Install payload applied");
            self.install_done = true;
        }
        Ok(())
    }

    /// Apply the bound workload's bootstrap payload, or confirm it if the
    /// local sentinel shows it already applied.
    pub async fn bootstrap(&mut self) -> Result<BootstrapOutcome, DriverError> {
        let hostname = self.require_hostname()?;
        self.ledger
            .report_patch(&hostname, phase_patch(HostPhase::Bootstrapping))
            .await;

        loop {
            match self.try_bootstrap(&hostname).await {
                Ok(outcome) => return Ok(outcome),
                Err(StepError::Cancelled(c)) => return Err(c.into()),
                Err(StepError::Failed(e)) => {
                    warn!(error = %e, "Bootstrap step failed, will retry");
                    // An unacceptable payload stays failed until an operator
                    // fixes the Registration; re-fetching each attempt picks
                    // the correction up.
                    let condition = if e.downcast_ref::<UnsupportedFormat>().is_some() {
                        Condition::not_ready(
                            ConditionType::BootstrapReady,
                            Severity::Error,
                            reason::UNSUPPORTED_FORMAT,
                            e.to_string(),
                        )
                    } else {
                        Condition::error(ConditionType::BootstrapReady, e.to_string())
                    };
                    self.ledger.report(&hostname, condition).await;
                    self.retry.wait("bootstrap").await?;
                }
            }
        }
    }

    async fn try_bootstrap(&mut self, hostname: &str) -> Result<BootstrapOutcome, StepError> {
        if self.os.bootstrap_applied() {
            self.ledger
                .confirm_patch(
                    hostname,
                    HostPatch {
                        bootstrapped: Some(true),
                        condition: Some(Condition::ready(ConditionType::BootstrapReady)),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(BootstrapOutcome::Bootstrapped);
        }

        let payload = self.registry.get_bootstrap(hostname).await?;
        if payload.format != BOOTSTRAP_FORMAT_CLOUD_CONFIG {
            return Err(StepError::Failed(UnsupportedFormat(payload.format).into()));
        }
        self.os.apply_bootstrap(&payload).await?;
        self.ledger
            .report(
                hostname,
                Condition::not_ready(
                    ConditionType::BootstrapReady,
                    Severity::Info,
                    reason::WAITING_FOR_BOOTSTRAP,
                    "payload staged, reboot pending",
                ),
            )
            .await;
        Ok(BootstrapOutcome::RebootRequired)
    }

    /// The steady-state loop: poll our record every tick and react.
    ///
    /// Priority per tick is reset request, then OS version drift, then an
    /// unconfirmed bootstrap. Returns only when a reset completes, a staged
    /// bootstrap needs a reboot, or shutdown cancels a wait.
    pub async fn run(&mut self) -> Result<RunExit, DriverError> {
        let hostname = self.require_hostname()?;

        loop {
            // The phase patch doubles as the poll: the response carries the
            // markers the controller wants us to act on.
            let host = match self
                .registry
                .patch_host(&hostname, &phase_patch(HostPhase::Running))
                .await
            {
                Ok(host) => host,
                Err(e) => {
                    warn!(error = %e, "Status poll failed, will retry");
                    self.retry.wait("run_poll").await?;
                    continue;
                }
            };

            if host.markers.needs_reset {
                info!(hostname, "Reset requested by controller");
                self.trigger_reset().await?;
                self.reset().await?;
                return Ok(RunExit::ResetCompleted);
            }

            let registration = match self.registry.get_registration().await {
                Ok(registration) => registration,
                Err(e) => {
                    warn!(error = %e, "Registration fetch failed, will retry");
                    self.retry.wait("run_poll").await?;
                    continue;
                }
            };

            if let Some(desired) = &registration.config.agent.os_version {
                match self.os.os_version_in_sync(desired) {
                    Ok(true) => {}
                    Ok(false) => {
                        let desired = desired.clone();
                        self.reconcile_os_version(&hostname, &desired).await?;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "OS version probe failed, will retry");
                        self.retry.wait("run_poll").await?;
                        continue;
                    }
                }
            }

            if !host.markers.bootstrapped || !self.os.bootstrap_applied() {
                if let BootstrapOutcome::RebootRequired = self.bootstrap().await? {
                    return Ok(RunExit::RebootRequired);
                }
                continue;
            }

            self.retry.wait("run_tick").await?;
        }
    }

    async fn reconcile_os_version(
        &mut self,
        hostname: &str,
        desired: &Value,
    ) -> Result<(), DriverError> {
        self.ledger
            .report_patch(hostname, phase_patch(HostPhase::OsVersionReconcile))
            .await;
        self.ledger
            .report(
                hostname,
                Condition::not_ready(
                    ConditionType::OsVersionReady,
                    Severity::Info,
                    reason::WAITING_FOR_OS_RECONCILE,
                    "",
                ),
            )
            .await;

        loop {
            match self.os.apply_os_version(desired).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "OS version apply failed, will retry");
                    self.ledger
                        .report(
                            hostname,
                            Condition::error(ConditionType::OsVersionReady, e.to_string()),
                        )
                        .await;
                    self.retry.wait("os_version").await?;
                }
            }
        }

        self.ledger
            .confirm(hostname, Condition::ready(ConditionType::OsVersionReady))
            .await?;
        info!(hostname, "OS version reconciled");
        Ok(())
    }

    /// Arm the local reset path (the escape valve out of `Running`).
    pub async fn trigger_reset(&mut self) -> Result<(), DriverError> {
        let hostname = self.require_hostname()?;
        self.ledger
            .report_patch(&hostname, phase_patch(HostPhase::TriggeringReset))
            .await;

        loop {
            match self.try_trigger_reset().await {
                Ok(()) => {
                    self.ledger
                        .report(
                            &hostname,
                            Condition::not_ready(
                                ConditionType::ResetReady,
                                Severity::Info,
                                reason::WAITING_FOR_RESET,
                                "recovery path armed",
                            ),
                        )
                        .await;
                    return Ok(());
                }
                Err(StepError::Cancelled(c)) => return Err(c.into()),
                Err(StepError::Failed(e)) => {
                    warn!(error = %e, "Reset arming failed, will retry");
                    self.ledger
                        .report(
                            &hostname,
                            Condition::error(ConditionType::ResetReady, e.to_string()),
                        )
                        .await;
                    self.retry.wait("trigger_reset").await?;
                }
            }
        }
    }

    async fn try_trigger_reset(&mut self) -> Result<(), StepError> {
        let registration = self.registry.get_registration().await?;
        self.os.arm_reset(registration.config.reset.reboot).await?;
        Ok(())
    }

    /// Wipe the machine and confirm the reset upstream.
    ///
    /// Deregistration is re-sent on every pass; the reset payload runs once
    /// per process. The final `reset=true` patch is what releases the
    /// controller's deletion guard, so it is confirmed with retry.
    pub async fn reset(&mut self) -> Result<(), DriverError> {
        let hostname = self.require_hostname()?;
        self.ledger
            .report_patch(&hostname, phase_patch(HostPhase::Resetting))
            .await;

        loop {
            if let Err(e) = self.registry.delete_host(&hostname).await {
                warn!(error = %e, "Host deregistration failed, will retry");
            }
            match self.try_reset().await {
                Ok(()) => break,
                Err(StepError::Cancelled(c)) => return Err(c.into()),
                Err(StepError::Failed(e)) => {
                    warn!(error = %e, "Reset step failed, will retry");
                    self.ledger
                        .report(
                            &hostname,
                            Condition::error(ConditionType::ResetReady, e.to_string()),
                        )
                        .await;
                    self.retry.wait("reset").await?;
                }
            }
        }

        self.ledger
            .confirm_patch(
                &hostname,
                HostPatch {
                    reset: Some(true),
                    condition: Some(Condition::ready(ConditionType::ResetReady)),
                    ..Default::default()
                },
            )
            .await?;
        info!(hostname, "Reset confirmed");
        Ok(())
    }

    async fn try_reset(&mut self) -> Result<(), StepError> {
        // The sentinel covers a restart between applying the payload and
        // getting the confirmation patch through.
        if self.reset_payload_applied || self.os.reset_performed() {
            return Ok(());
        }
        let registration = self.registry.get_registration().await?;
        self.os
            .apply_reset(registration.config.reset.payload.as_ref())
            .await?;
        self.reset_payload_applied = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockOs, MockRegistry};
    use ferrum_api::{
        get_condition, BootstrapPayload, ConditionStatus, Host, ObjectMeta, Registration,
    };
    use std::time::Duration;

    fn driver(registry: Arc<MockRegistry>, os: Arc<MockOs>) -> HostPhaseDriver {
        HostPhaseDriver::new(
            registry,
            os,
            RetryPolicy::unsignalled(Duration::ZERO),
            "pk".to_string(),
            vec![0u8; 32],
        )
    }

    fn registration_using_existing_hostname() -> Registration {
        let mut registration = Registration::new(ObjectMeta::new("default", "edge-fleet"));
        registration.config.agent.hostname.use_existing = true;
        registration
    }

    #[tokio::test]
    async fn test_register_resumes_existing_host_without_create() {
        let registry = Arc::new(
            MockRegistry::new()
                .with_registration(registration_using_existing_hostname())
                .with_existing_host("factory-box"),
        );
        let os = Arc::new(MockOs::new());

        let hostname = driver(registry.clone(), os).register().await.unwrap();

        assert_eq!(hostname, "factory-box");
        assert_eq!(registry.create_count(), 0);
        assert!(registry.host("factory-box").is_some());
    }

    #[tokio::test]
    async fn test_register_retries_whole_attempt_with_fresh_hostname() {
        let registry = Arc::new(
            MockRegistry::new()
                .fail_get_registration(1)
                .fail_creates(1),
        );
        let os = Arc::new(MockOs::new());

        let hostname = driver(registry.clone(), os).register().await.unwrap();

        // Attempt one dies fetching the registration, attempt two dies on
        // create; only the third attempt's generated name lands.
        assert_eq!(registry.create_count(), 2);
        assert_eq!(registry.created_names(), vec![hostname.clone()]);
        assert!(registry.host(&hostname).is_some());
    }

    #[tokio::test]
    async fn test_register_applies_hostname_prefix() {
        let mut registration = registration_using_existing_hostname();
        registration.config.agent.hostname.prefix = Some("edge-".to_string());
        let registry = Arc::new(
            MockRegistry::new()
                .with_registration(registration)
                .with_existing_host("edge-factory-box"),
        );

        let hostname = driver(registry.clone(), Arc::new(MockOs::new()))
            .register()
            .await
            .unwrap();
        assert_eq!(hostname, "edge-factory-box");
    }

    #[tokio::test]
    async fn test_register_survives_transient_patch_failures() {
        let registry = Arc::new(
            MockRegistry::new()
                .with_registration(registration_using_existing_hostname())
                .with_existing_host("factory-box")
                .fail_patches(3),
        );
        let os = Arc::new(MockOs::new());

        driver(registry.clone(), os.clone()).register().await.unwrap();

        let host = registry.host("factory-box").unwrap();
        let registered =
            get_condition(&host.conditions, ConditionType::RegistrationReady).unwrap();
        assert_eq!(registered.status, ConditionStatus::True);
        let installing =
            get_condition(&host.conditions, ConditionType::InstallationReady).unwrap();
        assert_eq!(installing.status, ConditionStatus::False);
        assert!(os.called("persist_registration"));
    }

    #[tokio::test]
    async fn test_register_reports_error_when_persist_fails() {
        let registry = Arc::new(
            MockRegistry::new()
                .with_registration(registration_using_existing_hostname())
                .with_existing_host("factory-box"),
        );
        let os = Arc::new(MockOs::new().fail_persists(1));

        driver(registry.clone(), os).register().await.unwrap();

        // The failed first attempt must have reported the error condition;
        // the retry then overwrote it with Succeeded.
        let host = registry.host("factory-box").unwrap();
        let registered =
            get_condition(&host.conditions, ConditionType::RegistrationReady).unwrap();
        assert_eq!(registered.status, ConditionStatus::True);
        assert!(registry.patch_log().iter().any(|p| {
            p.condition
                .as_ref()
                .is_some_and(|c| c.condition_type == ConditionType::RegistrationReady
                    && c.status == ConditionStatus::False)
        }));
    }

    #[tokio::test]
    async fn test_install_selects_device_and_confirms() {
        let registry = Arc::new(MockRegistry::new().with_existing_host("h1"));
        let os = Arc::new(MockOs::new());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        driver.install().await.unwrap();

        assert!(os.called("apply_install"));
        let host = registry.host("h1").unwrap();
        assert!(host.markers.installed);
        let condition = get_condition(&host.conditions, ConditionType::InstallationReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_bootstrap_sentinel_short_circuits() {
        let registry = Arc::new(MockRegistry::new().with_existing_host("h1"));
        let os = Arc::new(MockOs::new().with_bootstrap_applied());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        let outcome = driver.bootstrap().await.unwrap();

        assert_eq!(outcome, BootstrapOutcome::Bootstrapped);
        assert_eq!(registry.bootstrap_fetch_count(), 0);
        assert!(!os.called("apply_bootstrap"));
        let host = registry.host("h1").unwrap();
        assert!(host.markers.bootstrapped);
        let condition = get_condition(&host.conditions, ConditionType::BootstrapReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_bootstrap_stages_payload_and_requests_reboot() {
        let registry = Arc::new(
            MockRegistry::new()
                .with_existing_host("h1")
                .with_bootstrap(BootstrapPayload {
                    format: BOOTSTRAP_FORMAT_CLOUD_CONFIG.to_string(),
                    config: "#cloud-config\n".to_string(),
                }),
        );
        let os = Arc::new(MockOs::new());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        let outcome = driver.bootstrap().await.unwrap();

        assert_eq!(outcome, BootstrapOutcome::RebootRequired);
        assert!(os.called("apply_bootstrap"));
        let host = registry.host("h1").unwrap();
        assert!(!host.markers.bootstrapped);
        let condition = get_condition(&host.conditions, ConditionType::BootstrapReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, reason::WAITING_FOR_BOOTSTRAP);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_unknown_format() {
        let registry = Arc::new(
            MockRegistry::new()
                .with_existing_host("h1")
                .with_bootstrap(BootstrapPayload {
                    format: "ignition".to_string(),
                    config: "{}".to_string(),
                }),
        );
        let os = Arc::new(MockOs::new());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        let err = match driver.try_bootstrap("h1").await {
            Err(StepError::Failed(e)) => e,
            _ => panic!("expected failure"),
        };
        assert!(err.to_string().contains("ignition"));
        assert!(err.downcast_ref::<UnsupportedFormat>().is_some());
        assert!(!os.called("apply_bootstrap"));
    }

    #[tokio::test]
    async fn test_reset_deregisters_and_confirms_once() {
        let registry = Arc::new(MockRegistry::new().with_existing_host("h1"));
        let os = Arc::new(MockOs::new().with_bootstrap_applied());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        driver.reset().await.unwrap();

        assert!(registry.delete_count() >= 1);
        assert_eq!(
            os.calls().iter().filter(|c| *c == "apply_reset").count(),
            1
        );
        assert!(!os.bootstrap_applied());
        let host = registry.host("h1").unwrap();
        assert!(host.markers.reset);
        let condition = get_condition(&host.conditions, ConditionType::ResetReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_reset_sentinel_skips_payload_after_restart() {
        // Agent restarted after applying the reset payload but before the
        // confirmation patch landed: only the confirmation remains.
        let registry = Arc::new(MockRegistry::new().with_existing_host("h1"));
        let os = Arc::new(MockOs::new().with_reset_performed());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        driver.reset().await.unwrap();

        assert!(!os.called("apply_reset"));
        assert!(registry.delete_count() >= 1);
        let host = registry.host("h1").unwrap();
        assert!(host.markers.reset);
    }

    #[tokio::test]
    async fn test_run_prioritizes_reset_over_os_version() {
        let mut registration = Registration::new(ObjectMeta::new("default", "edge-fleet"));
        registration.config.agent.os_version = Some(serde_json::json!({"image": "v2"}));
        let registry = Arc::new(MockRegistry::new().with_registration(registration));

        let mut host = Host::new(ObjectMeta::new("default", "h1"), "pk");
        host.markers.needs_reset = true;
        registry.set_host(host);

        let os = Arc::new(MockOs::new().with_bootstrap_applied());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        let exit = driver.run().await.unwrap();

        assert_eq!(exit, RunExit::ResetCompleted);
        assert!(os.called("arm_reset"));
        assert!(os.called("apply_reset"));
        assert!(!os.called("apply_os_version"));
        assert!(registry.host("h1").unwrap().markers.reset);
    }

    #[tokio::test]
    async fn test_run_bootstraps_and_exits_for_reboot() {
        let registry = Arc::new(
            MockRegistry::new()
                .with_existing_host("h1")
                .with_bootstrap(BootstrapPayload {
                    format: BOOTSTRAP_FORMAT_CLOUD_CONFIG.to_string(),
                    config: "#cloud-config\n".to_string(),
                }),
        );
        let os = Arc::new(MockOs::new());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");

        let exit = driver.run().await.unwrap();

        assert_eq!(exit, RunExit::RebootRequired);
        assert!(os.called("apply_bootstrap"));
    }

    #[tokio::test]
    async fn test_os_version_reconcile_confirms_ready() {
        let registry = Arc::new(MockRegistry::new().with_existing_host("h1"));
        let os = Arc::new(MockOs::new());
        let mut driver = driver(registry.clone(), os.clone());
        driver.set_hostname("h1");
        let desired = serde_json::json!({"image": "v2"});

        driver.reconcile_os_version("h1", &desired).await.unwrap();

        assert!(os.called("apply_os_version"));
        assert!(os.os_version_in_sync(&desired).unwrap());
        let host = registry.host("h1").unwrap();
        let condition = get_condition(&host.conditions, ConditionType::OsVersionReady).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
    }
}
