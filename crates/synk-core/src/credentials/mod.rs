//! Per-user, per-provider OAuth credentials.
//!
//! The store is the only component that sees refresh tokens. Adapters only
//! receive a [`BearerToken`] for the call they are about to make.

mod backend;
mod oauth;

pub use backend::{KeyringBackend, MemoryBackend, SecretBackend};
pub use oauth::{OAuthRefresher, RefreshedToken, TokenRefresher};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CredentialError;
use crate::events::{Event, EventBus};
use crate::model::Provider;

/// Tokens are refreshed this long before they expire.
pub const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` means the token does not expire (Notion internal integrations).
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            scopes,
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => now + Duration::seconds(REFRESH_MARGIN_SECS) >= exp,
            None => false,
        }
    }

    fn merge(&mut self, refreshed: RefreshedToken) {
        self.access_token = refreshed.access_token;
        if let Some(rotated) = refreshed.refresh_token {
            self.refresh_token = Some(rotated);
        }
        self.expires_at = refreshed.expires_at;
        if let Some(scopes) = refreshed.scopes {
            self.scopes = scopes;
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Access token handed to a single adapter call.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Non-secret view of a stored credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialInfo {
    pub provider: Provider,
    pub expires_at: Option<DateTime<Utc>>,
    pub refreshable: bool,
    pub scopes: Vec<String>,
}

type LockKey = (String, Provider);

pub struct CredentialStore {
    backend: Arc<dyn SecretBackend>,
    refresher: Arc<dyn TokenRefresher>,
    events: EventBus,
    locks: std::sync::Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl CredentialStore {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        refresher: Arc<dyn TokenRefresher>,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            refresher,
            events,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, user: &str, provider: Provider) -> Result<Arc<Mutex<()>>, CredentialError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| CredentialError::Backend("credential lock table poisoned".into()))?;
        Ok(locks
            .entry((user.to_string(), provider))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// A token valid for at least the refresh margin.
    ///
    /// The read-refresh-write sequence runs under a per-(user, provider)
    /// lock, so concurrent callers wait for one refresh and share its result.
    pub async fn get_valid_token(
        &self,
        user: &str,
        provider: Provider,
    ) -> Result<BearerToken, CredentialError> {
        let lock = self.lock_for(user, provider)?;
        let _guard = lock.lock().await;

        let mut credential =
            self.backend
                .load(user, provider)?
                .ok_or_else(|| CredentialError::Missing {
                    user: user.to_string(),
                    provider,
                })?;

        if !credential.needs_refresh(Utc::now()) {
            debug!(user, provider = provider.as_str(), "credential still valid");
            return Ok(BearerToken::new(credential.access_token));
        }

        let refresh_token =
            credential
                .refresh_token
                .clone()
                .ok_or_else(|| CredentialError::RefreshFailed {
                    provider,
                    reason: "token expired and no refresh token is stored".into(),
                })?;

        let refreshed = match self.refresher.refresh(provider, &refresh_token).await {
            Ok(token) => token,
            Err(err) => {
                warn!(user, provider = provider.as_str(), error = %err, "token refresh failed");
                return Err(err);
            }
        };
        credential.merge(refreshed);
        self.backend.store(user, provider, &credential)?;

        info!(user, provider = provider.as_str(), expires_at = ?credential.expires_at, "credential refreshed");
        self.events.publish(Event::CredentialRefreshed {
            user: user.to_string(),
            provider,
            expires_at: credential.expires_at,
            at: Utc::now(),
        });

        Ok(BearerToken::new(credential.access_token))
    }

    /// Store an externally issued credential.
    pub async fn put(
        &self,
        user: &str,
        provider: Provider,
        credential: Credential,
    ) -> Result<(), CredentialError> {
        let lock = self.lock_for(user, provider)?;
        let _guard = lock.lock().await;
        self.backend.store(user, provider, &credential)
    }

    /// Forget the credential so later calls fail with `Missing`.
    pub async fn invalidate(&self, user: &str, provider: Provider) -> Result<(), CredentialError> {
        let lock = self.lock_for(user, provider)?;
        let _guard = lock.lock().await;
        self.backend.delete(user, provider)?;
        info!(user, provider = provider.as_str(), "credential invalidated");
        Ok(())
    }

    pub fn info(
        &self,
        user: &str,
        provider: Provider,
    ) -> Result<Option<CredentialInfo>, CredentialError> {
        Ok(self.backend.load(user, provider)?.map(|c| CredentialInfo {
            provider,
            expires_at: c.expires_at,
            refreshable: c.refresh_token.is_some(),
            scopes: c.scopes,
        }))
    }
}
