//! Application state shared across request handlers and workers.

use std::collections::BTreeMap;
use std::sync::Arc;

use ferrum_api::{BootstrapPayload, Host, Machine, Registration};
use tokio::sync::RwLock;

use crate::store::{MemoryStore, ResourceStore};

/// Shared application state, passed to handlers via axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    namespace: String,
    hosts: Arc<MemoryStore<Host>>,
    machines: Arc<MemoryStore<Machine>>,
    registrations: Arc<MemoryStore<Registration>>,
    /// Bootstrap payloads keyed by secret name. Stands in for the external
    /// secret store; lookups go through `bootstrap_secret_ref`.
    bootstrap_secrets: RwLock<BTreeMap<String, BootstrapPayload>>,
}

impl AppState {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                namespace: namespace.into(),
                hosts: Arc::new(MemoryStore::new()),
                machines: Arc::new(MemoryStore::new()),
                registrations: Arc::new(MemoryStore::new()),
                bootstrap_secrets: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn hosts(&self) -> Arc<dyn ResourceStore<Host>> {
        self.inner.hosts.clone()
    }

    pub fn machines(&self) -> Arc<dyn ResourceStore<Machine>> {
        self.inner.machines.clone()
    }

    pub fn registrations(&self) -> Arc<dyn ResourceStore<Registration>> {
        self.inner.registrations.clone()
    }

    pub async fn put_bootstrap_secret(&self, name: impl Into<String>, payload: BootstrapPayload) {
        self.inner
            .bootstrap_secrets
            .write()
            .await
            .insert(name.into(), payload);
    }

    pub async fn get_bootstrap_secret(&self, name: &str) -> Option<BootstrapPayload> {
        self.inner.bootstrap_secrets.read().await.get(name).cloned()
    }
}
