//! Resource store abstraction.
//!
//! The backing object store is an external collaborator; reconcilers and API
//! handlers only see [`ResourceStore`], a generic keyed store with
//! optimistic-concurrency writes. [`MemoryStore`] is the bundled
//! implementation used by the server and by tests.
//!
//! Deletion is two-step: [`ResourceStore::mark_deleted`] stamps the deletion
//! timestamp, but the record is physically dropped only once its finalizer
//! list is empty (checked again on every update).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use ferrum_api::Resource;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Stale write rejected; re-read and retry.
    #[error("conflict on {kind} {namespace}/{name}: stale revision {stale}, current {current}")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        stale: u64,
        current: u64,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Generic keyed resource store with optimistic-concurrency writes.
#[async_trait]
pub trait ResourceStore<T: Resource>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>, StoreError>;

    /// All objects in one namespace, ordered by name.
    async fn list(&self, namespace: &str) -> Result<Vec<T>, StoreError>;

    /// All objects across namespaces, ordered by (namespace, name).
    async fn list_all(&self) -> Result<Vec<T>, StoreError>;

    async fn create(&self, resource: T) -> Result<T, StoreError>;

    /// Write back a previously read object. Fails with
    /// [`StoreError::Conflict`] when the carried revision is stale.
    async fn update(&self, resource: T) -> Result<T, StoreError>;

    /// Request deletion. The record survives until its finalizers are gone.
    async fn mark_deleted(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// In-memory [`ResourceStore`] implementation.
pub struct MemoryStore<T> {
    objects: RwLock<BTreeMap<(String, String), T>>,
}

impl<T: Resource> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    fn key(namespace: &str, name: &str) -> (String, String) {
        (namespace.to_string(), name.to_string())
    }
}

impl<T: Resource> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Resource> ResourceStore<T> for MemoryStore<T> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects.get(&Self::key(namespace, name)).cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<T>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .values()
            .filter(|o| o.meta().namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<T>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects.values().cloned().collect())
    }

    async fn create(&self, mut resource: T) -> Result<T, StoreError> {
        let mut objects = self.objects.write().await;
        let key = Self::key(&resource.meta().namespace, &resource.meta().name);
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: T::KIND,
                namespace: key.0,
                name: key.1,
            });
        }

        let meta = resource.meta_mut();
        meta.revision = 1;
        meta.created_at = Some(Utc::now());
        objects.insert(key, resource.clone());
        Ok(resource)
    }

    async fn update(&self, mut resource: T) -> Result<T, StoreError> {
        let mut objects = self.objects.write().await;
        let key = Self::key(&resource.meta().namespace, &resource.meta().name);

        let current = objects.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            namespace: key.0.clone(),
            name: key.1.clone(),
        })?;

        let current_revision = current.meta().revision;
        if resource.meta().revision != current_revision {
            return Err(StoreError::Conflict {
                kind: T::KIND,
                namespace: key.0,
                name: key.1,
                stale: resource.meta().revision,
                current: current_revision,
            });
        }

        resource.meta_mut().revision = current_revision + 1;

        // Finalizer-gated physical removal.
        if resource.meta().is_deleting() && resource.meta().finalizers.is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, resource.clone());
        }
        Ok(resource)
    }

    async fn mark_deleted(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let key = Self::key(namespace, name);

        let resource = objects.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

        let meta = resource.meta_mut();
        if meta.deleted_at.is_none() {
            meta.deleted_at = Some(Utc::now());
            meta.revision += 1;
        }
        if meta.finalizers.is_empty() {
            objects.remove(&key);
        }
        Ok(())
    }
}
