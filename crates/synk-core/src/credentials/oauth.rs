//! OAuth2 refresh-token exchange.
//!
//! Google takes a form-encoded POST with the client secret in the body.
//! Notion takes a JSON body with the client pair as HTTP Basic auth.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use crate::error::CredentialError;
use crate::model::Provider;
use crate::storage::{OAuthClientConfig, OAuthConfig};

/// Outcome of a successful refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> Result<RefreshedToken, CredentialError>;
}

/// Refreshes against the token endpoints named in `[oauth.*]`.
pub struct OAuthRefresher {
    client: Client,
    config: OAuthConfig,
}

impl OAuthRefresher {
    pub fn new(config: OAuthConfig, timeout: Duration) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn client_for(&self, provider: Provider) -> &OAuthClientConfig {
        match provider {
            Provider::Google => &self.config.google,
            Provider::Notion => &self.config.notion,
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> Result<RefreshedToken, CredentialError> {
        let cfg = self.client_for(provider);
        let failed = |reason: String| CredentialError::RefreshFailed { provider, reason };

        if cfg.client_id.is_empty() {
            return Err(failed(format!(
                "no OAuth client configured (set oauth.{}.client_id)",
                provider.as_str()
            )));
        }

        let request = match provider {
            Provider::Google => {
                let params = [
                    ("client_id", cfg.client_id.as_str()),
                    ("client_secret", cfg.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ];
                self.client.post(&cfg.token_url).form(&params)
            }
            Provider::Notion => self
                .client
                .post(&cfg.token_url)
                .basic_auth(&cfg.client_id, Some(&cfg.client_secret))
                .json(&serde_json::json!({
                    "grant_type": "refresh_token",
                    "refresh_token": refresh_token,
                })),
        };

        let resp = request.send().await.map_err(|e| failed(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| failed(e.to_string()))?;

        if let Some(error) = body.get("error") {
            let detail = body
                .get("error_description")
                .and_then(Value::as_str)
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            return Err(failed(format!("{}{detail}", error.as_str().unwrap_or("error"))));
        }
        if !status.is_success() {
            return Err(failed(format!("token endpoint returned HTTP {status}")));
        }

        parse_token_response(&body, Utc::now()).ok_or_else(|| failed("no access_token in response".into()))
    }
}

fn parse_token_response(body: &Value, now: DateTime<Utc>) -> Option<RefreshedToken> {
    let access_token = body.get("access_token")?.as_str()?.to_string();
    if access_token.is_empty() {
        return None;
    }
    let expires_at = body
        .get("expires_in")
        .and_then(Value::as_i64)
        .map(|secs| now + chrono::Duration::seconds(secs));
    Some(RefreshedToken {
        access_token,
        refresh_token: body
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(String::from),
        expires_at,
        scopes: body
            .get("scope")
            .and_then(Value::as_str)
            .map(|s| s.split_whitespace().map(String::from).collect()),
    })
}
