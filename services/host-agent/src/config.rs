//! Agent bootstrap configuration.
//!
//! The TOML file tells a factory-fresh machine where its registry is and how
//! to touch the local OS. Everything else (hostname derivation, intervals,
//! install parameters) comes from the Registration resource and is mirrored
//! to the work dir once registration finalizes.

use std::path::Path;

use anyhow::{Context, Result};
use ferrum_api::StrategyKind;
use serde::{Deserialize, Serialize};

fn default_work_dir() -> String {
    "/var/lib/ferrum/agent".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the fleet controller.
    pub registry_url: String,

    /// Name of the Registration this host enrolls under.
    pub registration: String,

    /// Directory for agent-local state (keypair, config mirror, sentinels).
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Which statically compiled OS strategy drives this host.
    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            registry_url: "http://127.0.0.1:8080".to_string(),
            registration: "default".to_string(),
            work_dir: default_work_dir(),
            strategy: StrategyKind::default(),
            debug: false,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}
