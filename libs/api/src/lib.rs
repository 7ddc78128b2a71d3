//! Resource data model for the ferrum fleet platform.
//!
//! This crate defines the wire and storage representation of the three
//! tracked resources:
//!
//! - **Host**: tracking record for one physical/edge machine.
//! - **Machine**: desired-capacity record fulfilled by binding to a Host.
//! - **Registration**: named template supplying propagated metadata and
//!   install/reset/agent configuration.
//!
//! Plus the shared pieces: object metadata with optimistic-concurrency
//! revisions and finalizer-gated deletion, typed conditions with a derived
//! `Ready` summary, partial-update patches, and the label/device selectors.

pub mod condition;
pub mod host;
pub mod machine;
pub mod meta;
pub mod registration;
pub mod selector;

pub use condition::{
    get_condition, reason, set_condition, summarize_ready, Condition, ConditionStatus,
    ConditionType, Severity,
};
pub use host::{Host, HostMarkers, HostPatch, HostPhase, RESET_GUARD};
pub use machine::{provider_id, Machine, MACHINE_GUARD};
pub use meta::{ObjectMeta, ObjectRef, Resource};
pub use registration::{
    AgentRuntimeConfig, BootstrapPayload, HostnameConfig, InstallConfig, Registration,
    RegistrationConfig, ResetConfig, StrategyKind, BOOTSTRAP_FORMAT_CLOUD_CONFIG,
};
pub use selector::{
    select_device, DeviceSelectorKey, DeviceSelectorOp, DeviceSelectorRequirement, Disk,
    LabelSelector, SelectorError,
};
