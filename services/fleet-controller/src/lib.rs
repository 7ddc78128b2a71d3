//! Fleet controller: resource API and reconcilers for host lifecycle
//! orchestration.
//!
//! The controller serves the agent-facing resource API and runs two periodic
//! reconcilers: the association scheduler (binds Machines to available Hosts)
//! and the lifecycle reconciler (two-phase deletion gated on physical reset).

pub mod api;
pub mod config;
pub mod lifecycle;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod worker;
