//! Secret storage backends for credentials.

use std::collections::HashMap;
use std::sync::Mutex;

use super::Credential;
use crate::error::CredentialError;
use crate::model::Provider;

const SERVICE: &str = "synk";

/// Where credentials are kept at rest.
pub trait SecretBackend: Send + Sync {
    fn load(&self, user: &str, provider: Provider) -> Result<Option<Credential>, CredentialError>;
    fn store(&self, user: &str, provider: Provider, credential: &Credential)
        -> Result<(), CredentialError>;
    /// Removing a missing entry is not an error.
    fn delete(&self, user: &str, provider: Provider) -> Result<(), CredentialError>;
}

fn entry_key(user: &str, provider: Provider) -> String {
    format!("{user}:{}", provider.as_str())
}

/// OS keyring (Keychain, Credential Manager, Secret Service).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringBackend;

impl KeyringBackend {
    fn entry(user: &str, provider: Provider) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(SERVICE, &entry_key(user, provider))
            .map_err(|e| CredentialError::Backend(e.to_string()))
    }
}

impl SecretBackend for KeyringBackend {
    fn load(&self, user: &str, provider: Provider) -> Result<Option<Credential>, CredentialError> {
        let entry = Self::entry(user, provider)?;
        match entry.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CredentialError::Backend(format!("corrupt keyring entry: {e}"))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::Backend(e.to_string())),
        }
    }

    fn store(
        &self,
        user: &str,
        provider: Provider,
        credential: &Credential,
    ) -> Result<(), CredentialError> {
        let json = serde_json::to_string(credential)
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        Self::entry(user, provider)?
            .set_password(&json)
            .map_err(|e| CredentialError::Backend(e.to_string()))
    }

    fn delete(&self, user: &str, provider: Provider) -> Result<(), CredentialError> {
        match Self::entry(user, provider)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Backend(e.to_string())),
        }
    }
}

/// Process-local backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Credential>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Credential>>, CredentialError> {
        self.entries
            .lock()
            .map_err(|_| CredentialError::Backend("memory backend poisoned".into()))
    }
}

impl SecretBackend for MemoryBackend {
    fn load(&self, user: &str, provider: Provider) -> Result<Option<Credential>, CredentialError> {
        Ok(self.entries()?.get(&entry_key(user, provider)).cloned())
    }

    fn store(
        &self,
        user: &str,
        provider: Provider,
        credential: &Credential,
    ) -> Result<(), CredentialError> {
        self.entries()?
            .insert(entry_key(user, provider), credential.clone());
        Ok(())
    }

    fn delete(&self, user: &str, provider: Provider) -> Result<(), CredentialError> {
        self.entries()?.remove(&entry_key(user, provider));
        Ok(())
    }
}
