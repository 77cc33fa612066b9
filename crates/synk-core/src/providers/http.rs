//! Request execution with timeout, backoff and status mapping.

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::retry::{parse_retry_after, BackoffPolicy};
use crate::error::ProviderError;
use crate::model::Provider;

const MAX_ERROR_CHARS: usize = 300;

/// HTTP client bound to one provider.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    provider: Provider,
    policy: BackoffPolicy,
}

impl HttpClient {
    pub fn new(
        provider: Provider,
        timeout: Duration,
        policy: BackoffPolicy,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::TransientNetwork {
                provider,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            provider,
            policy,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send `request`, retrying 429, 5xx and transport failures per policy.
    ///
    /// `resource` names the item for `NotFound` errors.
    pub async fn send(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<Response, ProviderError> {
        let provider = self.provider;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let req = request.try_clone().ok_or_else(|| ProviderError::Decode {
                provider,
                message: "request body cannot be replayed".into(),
            })?;

            let (retry_after, failure) = match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let hint = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| parse_retry_after(v, Utc::now()));
                    (
                        hint,
                        ProviderError::RateLimited {
                            provider,
                            attempts: attempt,
                        },
                    )
                }
                Ok(resp) if resp.status().is_server_error() => {
                    let status = resp.status();
                    (
                        None,
                        ProviderError::TransientNetwork {
                            provider,
                            message: format!("HTTP {status}"),
                        },
                    )
                }
                Ok(resp) => return Err(self.rejection(resp, resource).await),
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => (
                    None,
                    ProviderError::TransientNetwork {
                        provider,
                        message: e.to_string(),
                    },
                ),
                Err(e) => {
                    return Err(ProviderError::TransientNetwork {
                        provider,
                        message: e.to_string(),
                    })
                }
            };

            if !self.policy.has_attempts_left(attempt) {
                warn!(provider = provider.as_str(), attempt, error = %failure, "giving up after retries");
                return Err(failure);
            }

            let delay = self.policy.delay_for(attempt, retry_after);
            debug!(provider = provider.as_str(), attempt, delay_ms = delay.as_millis() as u64, error = %failure, "retrying request");
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn send_json(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<Value, ProviderError> {
        let resp = self.send(request, resource).await?;
        resp.json::<Value>().await.map_err(|e| ProviderError::Decode {
            provider: self.provider,
            message: e.to_string(),
        })
    }

    async fn rejection(&self, resp: Response, resource: &str) -> ProviderError {
        let provider = self.provider;
        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED => ProviderError::Unauthorized { provider },
            StatusCode::NOT_FOUND => ProviderError::NotFound {
                provider,
                id: resource.to_string(),
            },
            _ => {
                let body = resp.text().await.unwrap_or_default();
                ProviderError::Api {
                    provider,
                    status: status.as_u16(),
                    message: error_message(&body),
                }
            }
        }
    }
}

/// Pull a readable message out of a Notion or Google error body.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.get("message")
            .and_then(Value::as_str)
            .or_else(|| v.pointer("/error/message").and_then(Value::as_str))
    });
    let text = message.unwrap_or(body);
    text.chars().take(MAX_ERROR_CHARS).collect()
}
