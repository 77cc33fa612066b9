pub mod auth;
pub mod config;
pub mod disconnect;
pub mod status;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use synk_core::credentials::{KeyringBackend, OAuthRefresher};
use synk_core::sync::StaticGate;
use synk_core::{
    AdapterSet, Config, CredentialStore, EventBus, GoogleCalendarAdapter, NotionAdapter, StateDb,
    SyncOrchestrator,
};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Everything a command needs, wired from the on-disk config.
pub struct App {
    pub config: Config,
    pub state: Arc<StateDb>,
    pub credentials: Arc<CredentialStore>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl App {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let events = EventBus::new();
        let state = Arc::new(StateDb::open()?);
        let refresher = OAuthRefresher::new(
            config.oauth.clone(),
            Duration::from_secs(config.http.timeout_secs),
        )?;
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(KeyringBackend),
            Arc::new(refresher),
            events.clone(),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&credentials),
            Arc::clone(&state),
            Arc::new(StaticGate::from_config(&config.account)),
            events,
            config.sync.clone(),
        ));
        Ok(Self {
            config,
            state,
            credentials,
            orchestrator,
        })
    }

    /// Open the app and register the configured user with live adapters.
    pub fn open_for_sync() -> Result<Self, Box<dyn std::error::Error>> {
        let app = Self::open()?;
        app.config.validate()?;
        let notion = NotionAdapter::new(app.config.notion.clone(), &app.config.http)?;
        let google = GoogleCalendarAdapter::new(app.config.google.clone(), &app.config.http)?;
        app.orchestrator
            .register(app.user(), AdapterSet::new(Arc::new(notion), Arc::new(google)))?;
        Ok(app)
    }

    pub fn user(&self) -> &str {
        &self.config.user_id
    }
}
