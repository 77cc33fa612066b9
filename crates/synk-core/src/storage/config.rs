//! TOML-based application configuration.
//!
//! Stores:
//! - The local user id and the externally supplied `can_sync` gate
//! - Sync cadence and per-operation retry settings
//! - HTTP timeout and backoff policy shared by every adapter
//! - Notion property mapping and Google calendar selection
//! - OAuth client settings used for token refresh
//!
//! Configuration is stored at `~/.config/synk/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Account-state flags produced outside the sync core (billing, session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_true")]
    pub can_sync: bool,
}

/// Sync cycle cadence and apply-phase retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Retries per failed Create/Update/Delete before it is skipped.
    #[serde(default = "default_apply_max_retries")]
    pub apply_max_retries: u32,
    #[serde(default = "default_apply_retry_base_ms")]
    pub apply_retry_base_ms: u64,
}

/// Timeout and 429 backoff shared by all adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub retry_factor: u32,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
    /// Longest single backoff wait; caps `Retry-After` hints.
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
}

/// How the Notion status column is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Status,
    Select,
}

/// Notion database and property mapping. The schema itself is configured
/// by the user in Notion; this only names the columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    #[serde(default)]
    pub database_id: String,
    #[serde(default = "default_notion_api_base")]
    pub api_base: String,
    #[serde(default = "default_title_property")]
    pub title_property: String,
    #[serde(default = "default_date_property")]
    pub date_property: String,
    #[serde(default = "default_status_property")]
    pub status_property: String,
    #[serde(default = "default_status_kind")]
    pub status_kind: StatusKind,
    /// Option names mapped to each status; the first entry is written back.
    #[serde(default = "default_active_values")]
    pub active_values: Vec<String>,
    #[serde(default = "default_completed_values")]
    pub completed_values: Vec<String>,
    #[serde(default = "default_cancelled_values")]
    pub cancelled_values: Vec<String>,
    /// Rich-text property that records the linked Google event id.
    #[serde(default)]
    pub google_id_property: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default = "default_google_api_base")]
    pub api_base: String,
}

/// OAuth client used to refresh tokens for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub token_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_google_oauth")]
    pub google: OAuthClientConfig,
    #[serde(default = "default_notion_oauth")]
    pub notion: OAuthClientConfig,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/synk/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

// Default functions
fn default_true() -> bool {
    true
}
fn default_user_id() -> String {
    "default".into()
}
fn default_interval_secs() -> u64 {
    300
}
fn default_apply_max_retries() -> u32 {
    3
}
fn default_apply_retry_base_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_factor() -> u32 {
    2
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_max_delay_secs() -> u64 {
    60
}
fn default_retry_jitter() -> f64 {
    0.2
}
fn default_notion_api_base() -> String {
    "https://api.notion.com/v1".into()
}
fn default_title_property() -> String {
    "Name".into()
}
fn default_date_property() -> String {
    "Date".into()
}
fn default_status_property() -> String {
    "Status".into()
}
fn default_status_kind() -> StatusKind {
    StatusKind::Status
}
fn default_active_values() -> Vec<String> {
    vec!["Not started".into(), "In progress".into()]
}
fn default_completed_values() -> Vec<String> {
    vec!["Done".into()]
}
fn default_cancelled_values() -> Vec<String> {
    vec!["Cancelled".into()]
}
fn default_calendar_id() -> String {
    "primary".into()
}
fn default_google_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".into()
}
fn default_google_oauth() -> OAuthClientConfig {
    OAuthClientConfig {
        token_url: "https://oauth2.googleapis.com/token".into(),
        ..Default::default()
    }
}
fn default_notion_oauth() -> OAuthClientConfig {
    OAuthClientConfig {
        token_url: "https://api.notion.com/v1/oauth/token".into(),
        ..Default::default()
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self { can_sync: true }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            apply_max_retries: default_apply_max_retries(),
            apply_retry_base_ms: default_apply_retry_base_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_base_ms: default_retry_base_ms(),
            retry_factor: default_retry_factor(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_jitter: default_retry_jitter(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
        }
    }
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            database_id: String::new(),
            api_base: default_notion_api_base(),
            title_property: default_title_property(),
            date_property: default_date_property(),
            status_property: default_status_property(),
            status_kind: default_status_kind(),
            active_values: default_active_values(),
            completed_values: default_completed_values(),
            cancelled_values: default_cancelled_values(),
            google_id_property: None,
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            calendar_id: default_calendar_id(),
            api_base: default_google_api_base(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            google: default_google_oauth(),
            notion: default_notion_oauth(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            account: AccountConfig::default(),
            sync: SyncSettings::default(),
            http: HttpConfig::default(),
            notion: NotionConfig::default(),
            google: GoogleConfig::default(),
            oauth: OAuthConfig::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or create the default file.
    ///
    /// Environment overrides for OAuth client credentials are applied on top.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::load_from(&Self::path()?)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load from `path`, writing the defaults there when the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        let overrides = [
            ("SYNK_GOOGLE_CLIENT_ID", &mut self.oauth.google.client_id),
            ("SYNK_GOOGLE_CLIENT_SECRET", &mut self.oauth.google.client_secret),
            ("SYNK_NOTION_CLIENT_ID", &mut self.oauth.notion.client_id),
            ("SYNK_NOTION_CLIENT_SECRET", &mut self.oauth.notion.client_secret),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    *slot = value;
                }
            }
        }
    }

    /// Check the fields a sync cycle cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::MissingKey("user_id".into()));
        }
        if self.notion.database_id.trim().is_empty() {
            return Err(ConfigError::MissingKey("notion.database_id".into()));
        }
        if self.google.calendar_id.trim().is_empty() {
            return Err(ConfigError::MissingKey("google.calendar_id".into()));
        }
        if self.http.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "http.retry_max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(0.0..1.0).contains(&self.http.retry_jitter) {
            return Err(ConfigError::InvalidValue {
                key: "http.retry_jitter".into(),
                message: "must be in [0, 1)".into(),
            });
        }
        Ok(())
    }
}
