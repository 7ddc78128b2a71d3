//! Registry API client.
//!
//! The agent's only remote dependency: the fleet controller's resource API.
//! The [`Registry`] trait is the seam the phase driver is written against;
//! [`HttpRegistry`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use ferrum_api::{BootstrapPayload, Host, HostPatch, Registration};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::AgentConfig;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The addressed resource does not exist. The driver branches on this
    /// during the registration existence probe.
    #[error("resource not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("registry returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Request body for registering this host.
#[derive(Debug, Clone, Serialize)]
pub struct CreateHostRequest {
    pub name: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub labels: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub annotations: std::collections::BTreeMap<String, String>,
}

/// The resource API surface the agent drives its lifecycle through.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn get_registration(&self) -> Result<Registration, RegistryError>;
    async fn create_host(&self, req: &CreateHostRequest) -> Result<Host, RegistryError>;
    async fn patch_host(&self, host: &str, patch: &HostPatch) -> Result<Host, RegistryError>;
    async fn get_bootstrap(&self, host: &str) -> Result<BootstrapPayload, RegistryError>;
    async fn delete_host(&self, host: &str) -> Result<(), RegistryError>;
}

/// HTTP implementation of [`Registry`].
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
    registration: String,
}

impl HttpRegistry {
    pub fn new(config: &AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: config.registry_url.trim_end_matches('/').to_string(),
            registration: config.registration.clone(),
        }
    }

    fn registration_url(&self) -> String {
        format!("{}/v1/registrations/{}", self.base_url, self.registration)
    }

    fn host_url(&self, host: &str) -> String {
        format!("{}/hosts/{}", self.registration_url(), host)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            404 => Err(RegistryError::NotFound),
            409 => Err(RegistryError::Conflict(body)),
            code => Err(RegistryError::Status { status: code, body }),
        }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn get_registration(&self) -> Result<Registration, RegistryError> {
        let url = self.registration_url();
        debug!(url = %url, "Fetching registration");
        let response = self.client.get(&url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_host(&self, req: &CreateHostRequest) -> Result<Host, RegistryError> {
        let url = format!("{}/hosts", self.registration_url());
        debug!(url = %url, host = %req.name, "Creating host");
        let response = self.client.post(&url).json(req).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn patch_host(&self, host: &str, patch: &HostPatch) -> Result<Host, RegistryError> {
        let url = self.host_url(host);
        let response = self.client.patch(&url).json(patch).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_bootstrap(&self, host: &str) -> Result<BootstrapPayload, RegistryError> {
        let url = format!("{}/bootstrap", self.host_url(host));
        debug!(url = %url, "Fetching bootstrap payload");
        let response = self.client.get(&url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_host(&self, host: &str) -> Result<(), RegistryError> {
        let url = self.host_url(host);
        let response = self.client.delete(&url).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
