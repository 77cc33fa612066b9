mod config;
pub mod migrations;
pub mod state_db;

pub use config::{
    AccountConfig, Config, GoogleConfig, HttpConfig, NotionConfig, OAuthClientConfig,
    OAuthConfig, StatusKind, SyncSettings,
};
pub use state_db::{CycleCommit, StateDb};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/synk[-dev]/` based on SYNK_ENV, or `SYNK_DATA_DIR` when set.
///
/// Set SYNK_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("SYNK_DATA_DIR") {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("SYNK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("synk-dev")
            } else {
                base_dir.join("synk")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
