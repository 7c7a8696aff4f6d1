//! Secret storage for connection passwords.
//!
//! Connection profiles never contain secrets; they are kept in a
//! `CredentialStore` keyed by connection id. The OS keyring backs it in normal
//! builds, and `MemoryCredentialStore` serves tests and headless setups.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

/// Keyring service name for stored passwords.
pub const KEYRING_SERVICE: &str = "dbview";

/// Storage backend for connection secrets.
///
/// Calls may block (the OS keyring talks to a system daemon), so async callers
/// run them through a `BlockingExecutor`.
pub trait CredentialStore: Send + Sync {
    /// Write `secret` under `key`, replacing any previous value.
    fn set(&self, key: &str, secret: &str) -> Result<()>;

    /// `None` when nothing is stored.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove the secret. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Store a connection password. Empty passwords are refused and
    /// reported as `Ok(false)`.
    fn store_password(&self, connection_id: &str, password: &str) -> Result<bool> {
        if password.is_empty() {
            tracing::debug!(connection_id, "Refusing to store empty password");
            return Ok(false);
        }
        self.set(connection_id, password)?;
        tracing::debug!(connection_id, store = self.name(), "Password stored");
        Ok(true)
    }
}

/// OS keyring backed store (macOS Keychain, Windows Credential Manager,
/// Secret Service on Linux).
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        use anyhow::Context;

        keyring::Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

#[cfg(feature = "keyring")]
impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "keyring")]
impl CredentialStore for KeyringCredentialStore {
    fn set(&self, key: &str, secret: &str) -> Result<()> {
        use anyhow::Context;

        self.entry(key)?
            .set_password(secret)
            .context("Failed to store password in keyring")
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Failed to retrieve password from keyring: {e}")),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Failed to delete password from keyring: {e}")),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn set(&self, key: &str, secret: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?
            .insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .secrets
            .read()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?
            .remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// The store used when callers do not pick one: the keyring when the feature
/// is enabled, memory otherwise.
pub fn default_credential_store() -> Box<dyn CredentialStore> {
    #[cfg(feature = "keyring")]
    {
        Box::new(KeyringCredentialStore::new())
    }
    #[cfg(not(feature = "keyring"))]
    {
        tracing::warn!("Built without keyring support; passwords are kept in memory only");
        Box::new(MemoryCredentialStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "secret").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("secret"));

        store.set("a", "other").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("other"));
        assert_eq!(store.len(), 1);

        store.delete("a").unwrap();
        store.delete("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_password_refused() {
        let store = MemoryCredentialStore::new();
        assert!(!store.store_password("conn", "").unwrap());
        assert_eq!(store.get("conn").unwrap(), None);

        assert!(store.store_password("conn", "pw").unwrap());
        assert_eq!(store.get("conn").unwrap().as_deref(), Some("pw"));
    }
}
