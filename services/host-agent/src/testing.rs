//! Test doubles for the registry and OS strategy seams.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ferrum_api::{
    AgentRuntimeConfig, BootstrapPayload, Disk, Host, HostPatch, ObjectMeta, Registration,
};
use serde_json::Value;

use crate::client::{CreateHostRequest, Registry, RegistryError};
use crate::strategy::OsStrategy;

/// Scripted in-memory [`Registry`].
///
/// `fail_*` counters make the next N calls of a method fail with a 500-style
/// error, then behave normally.
pub struct MockRegistry {
    registration: Mutex<Registration>,
    hosts: Mutex<BTreeMap<String, Host>>,
    bootstrap: Mutex<Option<BootstrapPayload>>,

    fail_get_registration: AtomicU32,
    fail_creates: AtomicU32,
    fail_patches: AtomicU32,

    registration_fetches: AtomicU32,
    creates: AtomicU32,
    patches: AtomicU32,
    bootstrap_fetches: AtomicU32,
    deletes: AtomicU32,

    created_names: Mutex<Vec<String>>,
    patch_log: Mutex<Vec<HostPatch>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            registration: Mutex::new(Registration::new(ObjectMeta::new("default", "edge-fleet"))),
            hosts: Mutex::new(BTreeMap::new()),
            bootstrap: Mutex::new(None),
            fail_get_registration: AtomicU32::new(0),
            fail_creates: AtomicU32::new(0),
            fail_patches: AtomicU32::new(0),
            registration_fetches: AtomicU32::new(0),
            creates: AtomicU32::new(0),
            patches: AtomicU32::new(0),
            bootstrap_fetches: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
            created_names: Mutex::new(Vec::new()),
            patch_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_registration(self, registration: Registration) -> Self {
        *self.registration.lock().unwrap() = registration;
        self
    }

    pub fn with_existing_host(self, name: &str) -> Self {
        let host = Host::new(ObjectMeta::new("default", name), "pk");
        self.hosts.lock().unwrap().insert(name.to_string(), host);
        self
    }

    pub fn with_bootstrap(self, payload: BootstrapPayload) -> Self {
        *self.bootstrap.lock().unwrap() = Some(payload);
        self
    }

    pub fn fail_get_registration(self, times: u32) -> Self {
        self.fail_get_registration.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_creates(self, times: u32) -> Self {
        self.fail_creates.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_patches(self, times: u32) -> Self {
        self.fail_patches.store(times, Ordering::SeqCst);
        self
    }

    pub fn create_count(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn patch_count(&self) -> u32 {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn bootstrap_fetch_count(&self) -> u32 {
        self.bootstrap_fetches.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn created_names(&self) -> Vec<String> {
        self.created_names.lock().unwrap().clone()
    }

    pub fn patch_log(&self) -> Vec<HostPatch> {
        self.patch_log.lock().unwrap().clone()
    }

    pub fn host(&self, name: &str) -> Option<Host> {
        self.hosts.lock().unwrap().get(name).cloned()
    }

    pub fn set_host(&self, host: Host) {
        self.hosts
            .lock()
            .unwrap()
            .insert(host.meta.name.clone(), host);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn scripted_failure() -> RegistryError {
        RegistryError::Status {
            status: 500,
            body: "scripted failure".to_string(),
        }
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn get_registration(&self) -> Result<Registration, RegistryError> {
        self.registration_fetches.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_get_registration) {
            return Err(Self::scripted_failure());
        }
        Ok(self.registration.lock().unwrap().clone())
    }

    async fn create_host(&self, req: &CreateHostRequest) -> Result<Host, RegistryError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_creates) {
            return Err(Self::scripted_failure());
        }
        let mut hosts = self.hosts.lock().unwrap();
        if hosts.contains_key(&req.name) {
            return Err(RegistryError::Conflict(format!("{} exists", req.name)));
        }
        let mut meta = ObjectMeta::new("default", &req.name);
        meta.labels = req.labels.clone();
        meta.annotations = req.annotations.clone();
        let host = Host::new(meta, &req.public_key);
        hosts.insert(req.name.clone(), host.clone());
        self.created_names.lock().unwrap().push(req.name.clone());
        Ok(host)
    }

    async fn patch_host(&self, host: &str, patch: &HostPatch) -> Result<Host, RegistryError> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_patches) {
            return Err(Self::scripted_failure());
        }
        let mut hosts = self.hosts.lock().unwrap();
        let stored = hosts.get_mut(host).ok_or(RegistryError::NotFound)?;
        patch.apply(stored);
        self.patch_log.lock().unwrap().push(patch.clone());
        Ok(stored.clone())
    }

    async fn get_bootstrap(&self, _host: &str) -> Result<BootstrapPayload, RegistryError> {
        self.bootstrap_fetches.fetch_add(1, Ordering::SeqCst);
        self.bootstrap
            .lock()
            .unwrap()
            .clone()
            .ok_or(RegistryError::NotFound)
    }

    async fn delete_host(&self, _host: &str) -> Result<(), RegistryError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted [`OsStrategy`] recording which operations ran.
pub struct MockOs {
    pub machine_hostname: String,
    persisted: Mutex<Option<String>>,
    bootstrap_applied: AtomicBool,
    reset_performed: AtomicBool,
    os_version_applied: Mutex<Option<Value>>,
    fail_persists: AtomicU32,
    disks: Vec<Disk>,
    calls: Mutex<Vec<String>>,
}

impl MockOs {
    pub fn new() -> Self {
        Self {
            machine_hostname: "factory-box".to_string(),
            persisted: Mutex::new(None),
            bootstrap_applied: AtomicBool::new(false),
            reset_performed: AtomicBool::new(false),
            os_version_applied: Mutex::new(None),
            fail_persists: AtomicU32::new(0),
            disks: vec![Disk {
                name: "sda".to_string(),
                size_bytes: 256 * (1 << 30),
            }],
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bootstrap_applied(self) -> Self {
        self.bootstrap_applied.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_reset_performed(self) -> Self {
        self.reset_performed.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_persists(self, times: u32) -> Self {
        self.fail_persists.store(times, Ordering::SeqCst);
        self
    }

    pub fn with_disks(mut self, disks: Vec<Disk>) -> Self {
        self.disks = disks;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == name)
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

impl Default for MockOs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OsStrategy for MockOs {
    fn current_hostname(&self) -> anyhow::Result<String> {
        Ok(self.machine_hostname.clone())
    }

    fn persisted_hostname(&self) -> anyhow::Result<Option<String>> {
        Ok(self.persisted.lock().unwrap().clone())
    }

    async fn persist_registration(
        &self,
        hostname: &str,
        _config: &AgentRuntimeConfig,
        _private_key: &[u8],
    ) -> anyhow::Result<()> {
        self.record("persist_registration");
        if MockRegistry::take_failure(&self.fail_persists) {
            anyhow::bail!("scripted persist failure");
        }
        *self.persisted.lock().unwrap() = Some(hostname.to_string());
        Ok(())
    }

    async fn apply_cloud_init(&self, _payload: &Value) -> anyhow::Result<()> {
        self.record("apply_cloud_init");
        Ok(())
    }

    async fn apply_install(&self, _payload: &Value, _device: &str) -> anyhow::Result<()> {
        self.record("apply_install");
        Ok(())
    }

    fn bootstrap_applied(&self) -> bool {
        self.bootstrap_applied.load(Ordering::SeqCst)
    }

    async fn apply_bootstrap(&self, _payload: &BootstrapPayload) -> anyhow::Result<()> {
        self.record("apply_bootstrap");
        Ok(())
    }

    async fn arm_reset(&self, _reboot: bool) -> anyhow::Result<()> {
        self.record("arm_reset");
        Ok(())
    }

    fn reset_performed(&self) -> bool {
        self.reset_performed.load(Ordering::SeqCst)
    }

    async fn apply_reset(&self, _payload: Option<&Value>) -> anyhow::Result<()> {
        self.record("apply_reset");
        self.bootstrap_applied.store(false, Ordering::SeqCst);
        self.reset_performed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn probe_disks(&self) -> anyhow::Result<Vec<Disk>> {
        Ok(self.disks.clone())
    }

    fn os_version_in_sync(&self, desired: &Value) -> anyhow::Result<bool> {
        Ok(self.os_version_applied.lock().unwrap().as_ref() == Some(desired))
    }

    async fn apply_os_version(&self, desired: &Value) -> anyhow::Result<()> {
        self.record("apply_os_version");
        *self.os_version_applied.lock().unwrap() = Some(desired.clone());
        Ok(())
    }
}
