//! Credential management.
//!
//! Tokens are issued outside Synk (OAuth consent happens elsewhere); these
//! commands only store, inspect and remove them.

use chrono::{Duration, Utc};
use clap::Subcommand;
use synk_core::{Credential, Provider};

use super::{App, CliResult};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Store an externally issued token for a provider
    Import {
        /// Provider (notion or google)
        provider: Provider,
        /// Access token
        #[arg(long)]
        access_token: String,
        /// Refresh token, if the provider issued one
        #[arg(long)]
        refresh_token: Option<String>,
        /// Seconds until the access token expires; omit for non-expiring tokens
        #[arg(long)]
        expires_in: Option<i64>,
        /// Granted scope (repeatable)
        #[arg(long)]
        scope: Vec<String>,
    },
    /// Show stored credentials
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove the stored credential without touching links
    Remove {
        /// Provider (notion or google)
        provider: Provider,
    },
}

pub async fn run(action: AuthAction) -> CliResult {
    let app = App::open()?;
    match action {
        AuthAction::Import {
            provider,
            access_token,
            refresh_token,
            expires_in,
            scope,
        } => {
            if access_token.trim().is_empty() {
                return Err("access token must not be empty".into());
            }
            let expires_at = expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
            let credential = Credential::new(access_token, refresh_token, expires_at, scope);
            app.credentials
                .put(app.user(), provider, credential)
                .await?;
            println!("Stored {} credential for {}", provider.display_name(), app.user());
        }
        AuthAction::Status { json } => {
            let mut infos = Vec::new();
            for provider in Provider::ALL {
                infos.push((provider, app.credentials.info(app.user(), provider)?));
            }
            if json {
                let list: Vec<_> = infos.into_iter().filter_map(|(_, info)| info).collect();
                println!("{}", serde_json::to_string_pretty(&list)?);
                return Ok(());
            }
            for (provider, info) in infos {
                match info {
                    Some(info) => {
                        let expiry = match info.expires_at {
                            Some(at) => format!("expires {}", at.format("%Y-%m-%d %H:%M UTC")),
                            None => "does not expire".to_string(),
                        };
                        let refresh = if info.refreshable {
                            "refreshable"
                        } else {
                            "not refreshable"
                        };
                        println!("{}: connected ({expiry}, {refresh})", provider.display_name());
                    }
                    None => println!("{}: not connected", provider.display_name()),
                }
            }
        }
        AuthAction::Remove { provider } => {
            app.credentials.invalidate(app.user(), provider).await?;
            println!("Removed {} credential", provider.display_name());
        }
    }
    Ok(())
}
