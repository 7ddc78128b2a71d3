//! Agent signing identity.
//!
//! One ed25519 keypair per host, generated on first start and persisted
//! under the work dir. The public key goes into the Host record at
//! registration; subsequent request authentication is external to the agent.

use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{SigningKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;

pub const KEY_FILE: &str = "private.key";

pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Load the persisted key, or generate and persist a fresh one.
    ///
    /// Key material failures are fatal: an agent that cannot prove a stable
    /// identity must not register.
    pub fn load_or_generate(work_dir: &Path) -> Result<Self> {
        let path = work_dir.join(KEY_FILE);
        if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading identity key {}", path.display()))?;
            let bytes: [u8; SECRET_KEY_LENGTH] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("identity key {} has wrong length", path.display()))?;
            return Ok(Self {
                signing_key: SigningKey::from_bytes(&bytes),
            });
        }

        std::fs::create_dir_all(work_dir)
            .with_context(|| format!("creating work dir {}", work_dir.display()))?;
        let signing_key = SigningKey::generate(&mut OsRng);
        std::fs::write(&path, signing_key.to_bytes())
            .with_context(|| format!("writing identity key {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("restricting permissions on {}", path.display()))?;
        }

        Ok(Self { signing_key })
    }

    /// Base64-encoded public key, as carried on the Host record.
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Raw private key bytes for the OS strategy to persist alongside the
    /// registration state.
    pub fn private_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}
