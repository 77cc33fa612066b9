//! Core error types for synk-core.
//!
//! Each concern gets its own thiserror enum; `SyncError` composes them and
//! every variant maps onto an [`ErrorCategory`] that `get_status` reports.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Provider;

/// Top-level error type for synk-core.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Credential lookup or refresh failed
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// A provider call failed
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A single operation failed after all retries
    #[error("Failed to apply {operation}: {source}")]
    OperationApplyFailed {
        operation: String,
        #[source]
        source: ProviderError,
    },

    /// Programming defect detected by the reconciliation engine
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Neither provider could be fetched this cycle
    #[error("Both providers unavailable (notion: {notion}; google: {google})")]
    ProvidersUnavailable {
        notion: Box<SyncError>,
        google: Box<SyncError>,
    },

    /// No adapters registered for the user
    #[error("User '{0}' is not registered with the orchestrator")]
    UserNotRegistered(String),

    /// The account gate refused to run a cycle
    #[error("Sync is not permitted for user '{0}'")]
    SyncNotPermitted(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Credential store errors.
#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    /// Nothing stored for this user/provider pair
    #[error("No credential stored for user '{user}' on {provider}")]
    Missing { user: String, provider: Provider },

    /// Token refresh failed
    #[error("Token refresh failed for {provider}: {reason}")]
    RefreshFailed { provider: Provider, reason: String },

    /// Secret storage backend is unavailable
    #[error("Credential backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by provider adapters.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// HTTP 429 persisted through every backoff attempt
    #[error("{provider} rate limited after {attempts} attempts")]
    RateLimited { provider: Provider, attempts: u32 },

    /// The incremental change token is no longer accepted
    #[error("{provider} change cursor invalidated")]
    CursorInvalidated { provider: Provider },

    /// Connection failure, timeout or 5xx that outlasted retries
    #[error("{provider} network error: {message}")]
    TransientNetwork { provider: Provider, message: String },

    /// The bearer token was rejected
    #[error("{provider} rejected the access token")]
    Unauthorized { provider: Provider },

    /// The referenced item does not exist
    #[error("{provider} item not found: {id}")]
    NotFound { provider: Provider, id: String },

    /// Any other non-success response
    #[error("{provider} API error (HTTP {status}): {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },

    /// The response body could not be normalized into a SyncItem
    #[error("{provider} returned an unreadable payload: {message}")]
    Decode { provider: Provider, message: String },
}

impl ProviderError {
    pub fn provider(&self) -> Provider {
        match self {
            Self::RateLimited { provider, .. }
            | Self::CursorInvalidated { provider }
            | Self::TransientNetwork { provider, .. }
            | Self::Unauthorized { provider }
            | Self::NotFound { provider, .. }
            | Self::Api { provider, .. }
            | Self::Decode { provider, .. } => *provider,
        }
    }

    /// Whether a later attempt may succeed without any state change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::TransientNetwork { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Failure categories reported through `get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CredentialMissing,
    RefreshFailed,
    RateLimited,
    CursorInvalidated,
    TransientNetworkError,
    OperationApplyFailed,
    InvariantViolation,
    ProviderRejected,
    Storage,
    Config,
    NotPermitted,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialMissing => "credential_missing",
            Self::RefreshFailed => "refresh_failed",
            Self::RateLimited => "rate_limited",
            Self::CursorInvalidated => "cursor_invalidated",
            Self::TransientNetworkError => "transient_network_error",
            Self::OperationApplyFailed => "operation_apply_failed",
            Self::InvariantViolation => "invariant_violation",
            Self::ProviderRejected => "provider_rejected",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::NotPermitted => "not_permitted",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CredentialError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Missing { .. } => ErrorCategory::CredentialMissing,
            Self::RefreshFailed { .. } => ErrorCategory::RefreshFailed,
            Self::Backend(_) => ErrorCategory::Storage,
        }
    }
}

impl ProviderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::CursorInvalidated { .. } => ErrorCategory::CursorInvalidated,
            Self::TransientNetwork { .. } => ErrorCategory::TransientNetworkError,
            Self::Api { status, .. } if *status >= 500 => ErrorCategory::TransientNetworkError,
            Self::Unauthorized { .. }
            | Self::NotFound { .. }
            | Self::Api { .. }
            | Self::Decode { .. } => ErrorCategory::ProviderRejected,
        }
    }
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Credential(err) => err.category(),
            Self::Provider(err) => err.category(),
            Self::OperationApplyFailed { .. } => ErrorCategory::OperationApplyFailed,
            Self::InvariantViolation(_) => ErrorCategory::InvariantViolation,
            // Report the Google side; both are recorded in the summary.
            Self::ProvidersUnavailable { google, .. } => google.category(),
            Self::UserNotRegistered(_) | Self::Config(_) => ErrorCategory::Config,
            Self::SyncNotPermitted(_) => ErrorCategory::NotPermitted,
            Self::Database(_) => ErrorCategory::Storage,
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked
                    || inner.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Database(err.into())
    }
}

/// Result type alias for SyncError
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_status_categories() {
        let rate = ProviderError::RateLimited {
            provider: Provider::Google,
            attempts: 5,
        };
        assert_eq!(rate.category(), ErrorCategory::RateLimited);
        assert!(rate.is_retryable());

        let gone = ProviderError::CursorInvalidated {
            provider: Provider::Google,
        };
        assert_eq!(gone.category(), ErrorCategory::CursorInvalidated);
        assert!(!gone.is_retryable());

        let server = ProviderError::Api {
            provider: Provider::Notion,
            status: 503,
            message: "unavailable".into(),
        };
        assert!(server.is_retryable());
        assert_eq!(server.category(), ErrorCategory::TransientNetworkError);
    }

    #[test]
    fn sync_error_wraps_credential_category() {
        let err: SyncError = CredentialError::Missing {
            user: "u1".into(),
            provider: Provider::Notion,
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::CredentialMissing);
        assert_eq!(err.category().as_str(), "credential_missing");
    }
}
