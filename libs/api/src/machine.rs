//! Machine resource: desired compute capacity to be fulfilled by a Host.

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, ObjectRef, Resource};
use crate::selector::LabelSelector;

/// Finalizer ensuring a deleted Machine requests a reset on its bound Host
/// before the record finalizes.
pub const MACHINE_GUARD: &str = "ferrum.io/machine-guard";

/// Build the provider ID encoding a bound host.
pub fn provider_id(namespace: &str, host_name: &str) -> String {
    format!("ferrum://{namespace}/{host_name}")
}

/// Desired-capacity record, associated lazily to a Host by the scheduler.
///
/// Invariant: a Machine references at most one Host, and a Host is referenced
/// by at most one Machine at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(flatten)]
    pub meta: ObjectMeta,

    /// Constraint over Host labels; `None` matches any available host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Bootstrap payload reference handed to the bound Host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret_ref: Option<ObjectRef>,

    /// Set once associated; encodes the bound host (`ferrum://{ns}/{host}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ref: Option<ObjectRef>,

    /// Derived: the bound host is installed and bootstrapped.
    #[serde(default)]
    pub ready: bool,
}

impl Machine {
    pub fn new(meta: ObjectMeta) -> Self {
        Self {
            meta,
            selector: None,
            bootstrap_secret_ref: None,
            provider_id: None,
            host_ref: None,
            ready: false,
        }
    }

    pub fn is_associated(&self) -> bool {
        self.host_ref.is_some()
    }

    /// Clear every association field so the machine re-enters the matching
    /// pool on the next reconcile.
    pub fn clear_association(&mut self) {
        self.provider_id = None;
        self.host_ref = None;
        self.ready = false;
    }
}

impl Resource for Machine {
    const KIND: &'static str = "Machine";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_format() {
        assert_eq!(provider_id("edge", "host-1"), "ferrum://edge/host-1");
    }

    #[test]
    fn test_clear_association() {
        let mut machine = Machine::new(ObjectMeta::new("default", "machine-1"));
        machine.provider_id = Some(provider_id("default", "host-1"));
        machine.host_ref = Some(ObjectRef::new("default", "host-1"));
        machine.ready = true;

        machine.clear_association();
        assert!(!machine.is_associated());
        assert!(machine.provider_id.is_none());
        assert!(!machine.ready);
    }
}
