//! Host resource: the tracking record for one physical machine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::{set_condition, Condition};
use crate::meta::{ObjectMeta, ObjectRef, Resource};

/// Finalizer guarding Host removal until the physical reset is confirmed.
pub const RESET_GUARD: &str = "ferrum.io/reset-guard";

/// Coarse lifecycle phase reported by the agent for observability.
///
/// Advisory only: reconciliation decisions are driven by [`HostMarkers`],
/// never by the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostPhase {
    Registering,
    FinalizingRegistration,
    Installing,
    Bootstrapping,
    Running,
    OsVersionReconcile,
    TriggeringReset,
    Resetting,
}

impl std::fmt::Display for HostPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HostPhase::Registering => "Registering",
            HostPhase::FinalizingRegistration => "FinalizingRegistration",
            HostPhase::Installing => "Installing",
            HostPhase::Bootstrapping => "Bootstrapping",
            HostPhase::Running => "Running",
            HostPhase::OsVersionReconcile => "OsVersionReconcile",
            HostPhase::TriggeringReset => "TriggeringReset",
            HostPhase::Resetting => "Resetting",
        };
        write!(f, "{s}")
    }
}

/// The boolean lifecycle markers that actually drive reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMarkers {
    /// OS installation completed on the host.
    #[serde(default)]
    pub installed: bool,

    /// Bootstrap payload applied and confirmed via the local sentinel.
    #[serde(default)]
    pub bootstrapped: bool,

    /// Physical reset confirmed by the agent. Authoritative: set only via
    /// the agent's `reset` patch, never derived.
    #[serde(default)]
    pub reset: bool,

    /// Reset requested by the controller; observed by the agent's poll loop.
    #[serde(default)]
    pub needs_reset: bool,
}

/// Tracking record for one physical/edge machine under management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    #[serde(flatten)]
    pub meta: ObjectMeta,

    /// Public key authenticating subsequent requests from this host's agent.
    #[serde(default)]
    pub public_key: String,

    /// The Machine bound to this host, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_ref: Option<ObjectRef>,

    /// Opaque reference to the bootstrap payload for the bound workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret_ref: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<HostPhase>,

    #[serde(default)]
    pub markers: HostMarkers,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Host {
    pub fn new(meta: ObjectMeta, public_key: impl Into<String>) -> Self {
        Self {
            meta,
            public_key: public_key.into(),
            machine_ref: None,
            bootstrap_secret_ref: None,
            phase: None,
            markers: HostMarkers::default(),
            conditions: Vec::new(),
        }
    }

    /// True when the association scheduler may bind a Machine to this host:
    /// installed, not pending reset, and not already carrying an association.
    pub fn available_for_association(&self) -> bool {
        self.markers.installed && !self.markers.needs_reset && self.machine_ref.is_none()
    }
}

impl Resource for Host {
    const KIND: &'static str = "Host";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

/// Partial Host update, the only mutation an agent ever sends.
///
/// Absent fields are left untouched; `labels`/`annotations` merge into the
/// existing maps; `condition` upserts by condition type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrapped: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_reset: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<HostPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl HostPatch {
    /// A patch carrying no mutations. Used as an existence probe during
    /// registration recovery.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Merge this patch into `host`.
    pub fn apply(&self, host: &mut Host) {
        if let Some(labels) = &self.labels {
            host.meta.labels.extend(labels.clone());
        }
        if let Some(annotations) = &self.annotations {
            host.meta.annotations.extend(annotations.clone());
        }
        if let Some(installed) = self.installed {
            host.markers.installed = installed;
        }
        if let Some(bootstrapped) = self.bootstrapped {
            host.markers.bootstrapped = bootstrapped;
        }
        if let Some(reset) = self.reset {
            host.markers.reset = reset;
        }
        if let Some(needs_reset) = self.needs_reset {
            host.markers.needs_reset = needs_reset;
        }
        if let Some(phase) = self.phase {
            host.phase = Some(phase);
        }
        if let Some(condition) = &self.condition {
            set_condition(&mut host.conditions, condition.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionStatus, ConditionType};

    fn test_host() -> Host {
        Host::new(ObjectMeta::new("default", "host-1"), "pubkey")
    }

    #[test]
    fn test_noop_patch_changes_nothing() {
        let mut host = test_host();
        let before = host.clone();
        HostPatch::noop().apply(&mut host);
        assert_eq!(host, before);
        assert!(HostPatch::noop().is_noop());
    }

    #[test]
    fn test_patch_merges_labels_and_markers() {
        let mut host = test_host();
        host.meta.labels.insert("zone".into(), "a".into());

        let patch = HostPatch {
            labels: Some(BTreeMap::from([("rack".to_string(), "r7".to_string())])),
            installed: Some(true),
            phase: Some(HostPhase::Installing),
            ..Default::default()
        };
        patch.apply(&mut host);

        assert_eq!(host.meta.labels.len(), 2);
        assert!(host.markers.installed);
        assert!(!host.markers.bootstrapped);
        assert_eq!(host.phase, Some(HostPhase::Installing));
    }

    #[test]
    fn test_patch_upserts_condition() {
        let mut host = test_host();
        let patch = HostPatch {
            condition: Some(Condition::error(ConditionType::InstallationReady, "bad disk")),
            ..Default::default()
        };
        patch.apply(&mut host);
        patch.apply(&mut host);

        assert_eq!(host.conditions.len(), 1);
        assert_eq!(host.conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn test_availability_requires_installed_and_unbound() {
        let mut host = test_host();
        assert!(!host.available_for_association());

        host.markers.installed = true;
        assert!(host.available_for_association());

        host.markers.needs_reset = true;
        assert!(!host.available_for_association());

        host.markers.needs_reset = false;
        host.machine_ref = Some(ObjectRef::new("default", "machine-1"));
        assert!(!host.available_for_association());
    }

    #[test]
    fn test_host_wire_format() {
        let mut host = test_host();
        host.markers.installed = true;
        let json = serde_json::to_string(&host).unwrap();
        assert!(json.contains("\"name\":\"host-1\""));
        assert!(json.contains("\"installed\":true"));

        let back: Host = serde_json::from_str(&json).unwrap();
        assert_eq!(back, host);
    }
}
