use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Namespace this controller manages.
    pub namespace: String,
    pub reconcile_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("FERRUM_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("FERRUM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let namespace =
            std::env::var("FERRUM_NAMESPACE").unwrap_or_else(|_| "default".to_string());

        let reconcile_interval = std::env::var("FERRUM_RECONCILE_INTERVAL_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(ferrum_reconcile::DEFAULT_RECONCILE_INTERVAL);

        Ok(Self {
            listen_addr,
            log_level,
            namespace,
            reconcile_interval,
        })
    }
}
