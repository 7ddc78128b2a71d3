//! Registration resource: a named template for new Hosts.
//!
//! Agents fetch the Registration repeatedly rather than caching it, since an
//! operator may correct it between polls (the only way out of some terminal
//! validation failures).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};
use crate::selector::DeviceSelectorRequirement;

/// The bootstrap format every bundled strategy understands.
pub const BOOTSTRAP_FORMAT_CLOUD_CONFIG: &str = "cloud-config";

/// Named template: propagated metadata plus install/reset/agent parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(flatten)]
    pub meta: ObjectMeta,

    /// Labels stamped onto Hosts created under this registration.
    #[serde(default)]
    pub host_labels: BTreeMap<String, String>,

    /// Annotations stamped onto Hosts created under this registration.
    #[serde(default)]
    pub host_annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub config: RegistrationConfig,
}

impl Registration {
    pub fn new(meta: ObjectMeta) -> Self {
        Self {
            meta,
            host_labels: BTreeMap::new(),
            host_annotations: BTreeMap::new(),
            config: RegistrationConfig::default(),
        }
    }
}

impl Resource for Registration {
    const KIND: &'static str = "Registration";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub reset: ResetConfig,

    #[serde(default)]
    pub agent: AgentRuntimeConfig,
}

/// Install parameters applied during the `Installing` phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Cloud-init payload staged before the install payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<serde_json::Value>,

    /// Opaque install payload handed to the OS strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Explicit target device; takes precedence over `device_selector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Constraint expression choosing the install disk when `device` is unset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_selector: Vec<DeviceSelectorRequirement>,
}

/// Reset parameters applied during the `Resetting` phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Opaque reset payload handed to the OS strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Reboot into the recovery path after arming a reset.
    #[serde(default)]
    pub reboot: bool,
}

/// Agent runtime parameters, mirrored to the host filesystem at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeConfig {
    /// Directory for agent-local state (keypair, config mirror, sentinels).
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    #[serde(default)]
    pub hostname: HostnameConfig,

    /// Fixed delay between reconciliation ticks and between retries.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Which statically compiled OS strategy drives this host.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Desired OS version payload; when set, the agent reconciles it from
    /// the `Running` phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<serde_json::Value>,

    #[serde(default)]
    pub debug: bool,
}

fn default_work_dir() -> String {
    "/var/lib/ferrum/agent".to_string()
}

fn default_reconcile_interval() -> u64 {
    30
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            hostname: HostnameConfig::default(),
            reconcile_interval_secs: default_reconcile_interval(),
            strategy: StrategyKind::default(),
            os_version: None,
            debug: false,
        }
    }
}

/// How a registering agent derives its candidate hostname.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostnameConfig {
    /// Reuse the machine's existing hostname instead of generating one.
    #[serde(default)]
    pub use_existing: bool,

    /// Optional prefix applied to either source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// OS strategy selection (statically compiled, chosen by configuration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Stage payloads on the plain filesystem; no OS toolkit present.
    #[default]
    Unmanaged,
    /// Delegate to the managed OS toolkit binary.
    Managed,
}

/// Bootstrap payload served to an agent for its bound workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapPayload {
    pub format: String,
    pub config: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_config_defaults() {
        let registration: Registration = serde_json::from_str(
            r#"{"namespace":"default","name":"edge-fleet"}"#,
        )
        .unwrap();

        assert_eq!(registration.config.agent.work_dir, "/var/lib/ferrum/agent");
        assert_eq!(registration.config.agent.reconcile_interval_secs, 30);
        assert_eq!(registration.config.agent.strategy, StrategyKind::Unmanaged);
        assert!(!registration.config.agent.hostname.use_existing);
    }

    #[test]
    fn test_registration_deserialization() {
        let json = r#"{
            "namespace": "default",
            "name": "edge-fleet",
            "host_labels": {"fleet": "edge"},
            "config": {
                "install": {
                    "device_selector": [
                        {"key": "Size", "operator": "Gt", "values": ["100Gi"]}
                    ]
                },
                "agent": {
                    "hostname": {"use_existing": false, "prefix": "edge-"},
                    "strategy": "managed"
                }
            }
        }"#;

        let registration: Registration = serde_json::from_str(json).unwrap();
        assert_eq!(registration.host_labels["fleet"], "edge");
        assert_eq!(registration.config.install.device_selector.len(), 1);
        assert_eq!(
            registration.config.agent.hostname.prefix.as_deref(),
            Some("edge-")
        );
        assert_eq!(registration.config.agent.strategy, StrategyKind::Managed);
    }
}
