//! OS strategies.
//!
//! Everything that touches the machine's operating system goes through
//! [`OsStrategy`]. The bundled strategies do not execute arbitrary commands:
//! `Unmanaged` only stages payload files under the work dir for the OS's own
//! boot tooling to pick up, and `Managed` additionally invokes the configured
//! OS toolkit binary on each staged payload. Which one runs is selected
//! statically by configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ferrum_api::{AgentRuntimeConfig, BootstrapPayload, Disk, StrategyKind};
use serde_json::Value;
use tracing::{debug, info};

/// Sentinel created by the OS after the bootstrap payload was applied on boot.
pub const BOOTSTRAP_SENTINEL: &str = "bootstrapped";
/// Sentinel created once the reset payload has been applied in this run.
pub const RESET_SENTINEL: &str = "reset-performed";

const HOSTNAME_FILE: &str = "hostname";
const CONFIG_MIRROR_FILE: &str = "agent.toml";
const DEFAULT_TOOLKIT: &str = "/usr/sbin/ferrum-toolkit";

#[async_trait]
pub trait OsStrategy: Send + Sync {
    /// Hostname the machine currently carries.
    fn current_hostname(&self) -> Result<String>;

    /// Hostname chosen at registration, if this host already registered.
    fn persisted_hostname(&self) -> Result<Option<String>>;

    /// Persist the registration outcome: chosen hostname, effective agent
    /// config mirror, and the identity's private key material.
    async fn persist_registration(
        &self,
        hostname: &str,
        config: &AgentRuntimeConfig,
        private_key: &[u8],
    ) -> Result<()>;

    async fn apply_cloud_init(&self, payload: &Value) -> Result<()>;

    async fn apply_install(&self, payload: &Value, device: &str) -> Result<()>;

    /// True once the OS reports the bootstrap payload applied (sentinel).
    fn bootstrap_applied(&self) -> bool;

    async fn apply_bootstrap(&self, payload: &BootstrapPayload) -> Result<()>;

    /// Arm the recovery path for an upcoming reset.
    async fn arm_reset(&self, reboot: bool) -> Result<()>;

    /// True once the reset payload was applied (sentinel), surviving agent
    /// restarts mid-reset.
    fn reset_performed(&self) -> bool;

    async fn apply_reset(&self, payload: Option<&Value>) -> Result<()>;

    /// Candidate installation disks.
    fn probe_disks(&self) -> Result<Vec<Disk>>;

    fn os_version_in_sync(&self, desired: &Value) -> Result<bool>;

    async fn apply_os_version(&self, desired: &Value) -> Result<()>;
}

pub fn strategy_for(kind: StrategyKind, work_dir: impl Into<PathBuf>) -> Arc<dyn OsStrategy> {
    match kind {
        StrategyKind::Unmanaged => Arc::new(UnmanagedOs::new(work_dir)),
        StrategyKind::Managed => Arc::new(ManagedOs::new(work_dir)),
    }
}

/// Strategy for hosts without an OS toolkit: stage payloads on the plain
/// filesystem and let the OS's boot tooling consume them.
pub struct UnmanagedOs {
    work_dir: PathBuf,
}

impl UnmanagedOs {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.work_dir.join(file)
    }

    fn write_file(&self, file: &str, contents: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("creating work dir {}", self.work_dir.display()))?;
        let path = self.path(file);
        std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn stage_json(&self, file: &str, value: &Value) -> Result<()> {
        let rendered = serde_json::to_vec_pretty(value)?;
        self.write_file(file, &rendered)?;
        debug!(file, "Staged payload");
        Ok(())
    }
}

#[async_trait]
impl OsStrategy for UnmanagedOs {
    fn current_hostname(&self) -> Result<String> {
        let raw = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .context("reading kernel hostname")?;
        Ok(raw.trim().to_string())
    }

    fn persisted_hostname(&self) -> Result<Option<String>> {
        let path = self.path(HOSTNAME_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(raw.trim().to_string()))
    }

    async fn persist_registration(
        &self,
        hostname: &str,
        config: &AgentRuntimeConfig,
        private_key: &[u8],
    ) -> Result<()> {
        self.write_file(HOSTNAME_FILE, hostname.as_bytes())?;
        let mirror = toml::to_string_pretty(config).context("rendering agent config mirror")?;
        self.write_file(CONFIG_MIRROR_FILE, mirror.as_bytes())?;
        self.write_file(crate::identity::KEY_FILE, private_key)?;
        info!(hostname, "Registration state persisted");
        Ok(())
    }

    async fn apply_cloud_init(&self, payload: &Value) -> Result<()> {
        self.stage_json("cloud-init.json", payload)
    }

    async fn apply_install(&self, payload: &Value, device: &str) -> Result<()> {
        let staged = serde_json::json!({ "device": device, "payload": payload });
        self.stage_json("install.json", &staged)?;
        info!(device, "Install payload staged");
        Ok(())
    }

    fn bootstrap_applied(&self) -> bool {
        self.path(BOOTSTRAP_SENTINEL).exists()
    }

    async fn apply_bootstrap(&self, payload: &BootstrapPayload) -> Result<()> {
        self.write_file("bootstrap.cfg", payload.config.as_bytes())?;
        info!(format = %payload.format, "Bootstrap payload staged");
        Ok(())
    }

    async fn arm_reset(&self, reboot: bool) -> Result<()> {
        self.write_file("reset-armed", if reboot { b"reboot" } else { b"in-place" })?;
        info!(reboot, "Reset recovery path armed");
        Ok(())
    }

    fn reset_performed(&self) -> bool {
        self.path(RESET_SENTINEL).exists()
    }

    async fn apply_reset(&self, payload: Option<&Value>) -> Result<()> {
        if let Some(payload) = payload {
            self.stage_json("reset.json", payload)?;
        }
        // Bootstrap state does not survive a reset.
        let _ = std::fs::remove_file(self.path(BOOTSTRAP_SENTINEL));
        let _ = std::fs::remove_file(self.path("bootstrap.cfg"));
        self.write_file(RESET_SENTINEL, b"")?;
        info!("Reset payload applied");
        Ok(())
    }

    fn probe_disks(&self) -> Result<Vec<Disk>> {
        let mut disks = Vec::new();
        for entry in std::fs::read_dir("/sys/block").context("listing block devices")? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("loop")
                || name.starts_with("ram")
                || name.starts_with("zram")
                || name.starts_with("dm-")
            {
                continue;
            }
            let sectors: u64 = std::fs::read_to_string(entry.path().join("size"))
                .with_context(|| format!("reading size of {name}"))?
                .trim()
                .parse()
                .with_context(|| format!("parsing size of {name}"))?;
            disks.push(Disk {
                name,
                size_bytes: sectors * 512,
            });
        }
        disks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(disks)
    }

    fn os_version_in_sync(&self, desired: &Value) -> Result<bool> {
        let path = self.path("os-version.json");
        if !path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let staged: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(&staged == desired)
    }

    async fn apply_os_version(&self, desired: &Value) -> Result<()> {
        self.stage_json("os-version.json", desired)?;
        info!("OS version payload staged");
        Ok(())
    }
}

/// Strategy for hosts carrying the managed OS toolkit: stages payloads like
/// [`UnmanagedOs`], then invokes the toolkit on each.
pub struct ManagedOs {
    staging: UnmanagedOs,
    toolkit: PathBuf,
}

impl ManagedOs {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            staging: UnmanagedOs::new(&work_dir),
            toolkit: PathBuf::from(DEFAULT_TOOLKIT),
        }
    }

    pub fn with_toolkit(mut self, toolkit: impl Into<PathBuf>) -> Self {
        self.toolkit = toolkit.into();
        self
    }

    async fn invoke(&self, subcommand: &str, file: &Path) -> Result<()> {
        debug!(toolkit = %self.toolkit.display(), subcommand, "Invoking OS toolkit");
        let status = tokio::process::Command::new(&self.toolkit)
            .arg(subcommand)
            .arg(file)
            .status()
            .await
            .with_context(|| format!("spawning {}", self.toolkit.display()))?;
        if !status.success() {
            bail!("toolkit {subcommand} exited with {status}");
        }
        Ok(())
    }
}

#[async_trait]
impl OsStrategy for ManagedOs {
    fn current_hostname(&self) -> Result<String> {
        self.staging.current_hostname()
    }

    fn persisted_hostname(&self) -> Result<Option<String>> {
        self.staging.persisted_hostname()
    }

    async fn persist_registration(
        &self,
        hostname: &str,
        config: &AgentRuntimeConfig,
        private_key: &[u8],
    ) -> Result<()> {
        self.staging
            .persist_registration(hostname, config, private_key)
            .await
    }

    async fn apply_cloud_init(&self, payload: &Value) -> Result<()> {
        self.staging.apply_cloud_init(payload).await?;
        self.invoke("cloud-init", &self.staging.path("cloud-init.json"))
            .await
    }

    async fn apply_install(&self, payload: &Value, device: &str) -> Result<()> {
        self.staging.apply_install(payload, device).await?;
        self.invoke("install", &self.staging.path("install.json"))
            .await
    }

    fn bootstrap_applied(&self) -> bool {
        self.staging.bootstrap_applied()
    }

    async fn apply_bootstrap(&self, payload: &BootstrapPayload) -> Result<()> {
        self.staging.apply_bootstrap(payload).await?;
        self.invoke("bootstrap", &self.staging.path("bootstrap.cfg"))
            .await
    }

    async fn arm_reset(&self, reboot: bool) -> Result<()> {
        self.staging.arm_reset(reboot).await?;
        self.invoke("arm-reset", &self.staging.path("reset-armed"))
            .await
    }

    fn reset_performed(&self) -> bool {
        self.staging.reset_performed()
    }

    async fn apply_reset(&self, payload: Option<&Value>) -> Result<()> {
        self.staging.apply_reset(payload).await?;
        self.invoke("reset", &self.staging.path(RESET_SENTINEL)).await
    }

    fn probe_disks(&self) -> Result<Vec<Disk>> {
        self.staging.probe_disks()
    }

    fn os_version_in_sync(&self, desired: &Value) -> Result<bool> {
        self.staging.os_version_in_sync(desired)
    }

    async fn apply_os_version(&self, desired: &Value) -> Result<()> {
        self.staging.apply_os_version(desired).await?;
        self.invoke("os-version", &self.staging.path("os-version.json"))
            .await
    }
}
