//! # Synk Core Library
//!
//! Bidirectional sync between a Notion database and a Google Calendar.
//! The `synk` CLI is a thin layer over this crate; a desktop shell can drive
//! the same orchestrator and subscribe to its events.
//!
//! ## Architecture
//!
//! - **Credentials**: per-user OAuth tokens in the OS keyring, refreshed
//!   shortly before they expire
//! - **Providers**: Notion and Google Calendar adapters normalizing raw API
//!   payloads into [`SyncItem`]s, with one shared backoff policy
//! - **Sync**: change detection against the link table, a pure
//!   reconciliation engine and the per-user cycle orchestrator
//! - **Storage**: SQLite sync state and TOML configuration
//!
//! ## Key Components
//!
//! - [`SyncOrchestrator`]: runs, schedules and reports sync cycles
//! - [`reconcile`]: turns two provider deltas into [`SyncOperation`]s
//! - [`CredentialStore`]: hands out valid bearer tokens
//! - [`StateDb`]: links, cursors, snapshots and status persistence
//! - [`Config`]: application configuration management

pub mod credentials;
pub mod error;
pub mod events;
pub mod model;
pub mod providers;
pub mod storage;
pub mod sync;

pub use credentials::{Credential, CredentialStore};
pub use error::{ConfigError, CredentialError, DatabaseError, ErrorCategory, ProviderError, SyncError};
pub use events::{Event, EventBus};
pub use model::{ItemStatus, LinkRecord, Provider, SyncCursor, SyncItem, SyncOperation};
pub use providers::{GoogleCalendarAdapter, NotionAdapter, ProviderAdapter};
pub use storage::{Config, StateDb};
pub use sync::{reconcile, AdapterSet, SyncOrchestrator, SyncReport, SyncStatus};
