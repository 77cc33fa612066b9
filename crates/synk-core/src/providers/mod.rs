//! Provider adapters.
//!
//! Every external system implements [`ProviderAdapter`]. Adapters are
//! stateless between calls: the bearer token comes from the credential
//! store and the cursor from the orchestrator. Raw provider JSON never
//! leaves this module; everything is normalized into [`SyncItem`].

pub mod google;
pub mod http;
pub mod notion;
pub mod retry;

pub use google::GoogleCalendarAdapter;
pub use notion::NotionAdapter;
pub use retry::BackoffPolicy;

use async_trait::async_trait;

use crate::credentials::BearerToken;
use crate::error::ProviderError;
use crate::model::{ItemPatch, Provider, SyncCursor, SyncItem};

/// Result of one `list_changes` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeListing {
    /// Live items. On a full scan this is the complete set.
    pub items: Vec<SyncItem>,
    /// Ids reported deleted, archived or cancelled.
    pub removed: Vec<String>,
    /// Token for the next incremental listing, if the provider issues one.
    pub cursor: Option<String>,
    /// `true` when `items` is authoritative and anything absent is gone.
    pub full_scan: bool,
}

/// One provider record after normalization.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedEntry {
    Live(SyncItem),
    Removed(String),
    /// Valid for the provider but not representable as a calendar item.
    Skipped { id: String, reason: &'static str },
}

impl ChangeListing {
    pub(crate) fn push(&mut self, entry: ParsedEntry, provider: Provider) {
        match entry {
            ParsedEntry::Live(item) => self.items.push(item),
            ParsedEntry::Removed(id) => self.removed.push(id),
            ParsedEntry::Skipped { id, reason } => {
                tracing::debug!(provider = provider.as_str(), id = %id, reason, "skipping record");
            }
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Changes since `cursor`, or everything when it is `None`.
    ///
    /// Fails with `CursorInvalidated` when the provider rejects the token.
    async fn list_changes(
        &self,
        token: &BearerToken,
        cursor: Option<&SyncCursor>,
    ) -> Result<ChangeListing, ProviderError>;

    /// Returns the provider-assigned id.
    async fn create_item(&self, token: &BearerToken, item: &SyncItem)
        -> Result<String, ProviderError>;

    async fn update_item(
        &self,
        token: &BearerToken,
        id: &str,
        patch: &ItemPatch,
    ) -> Result<(), ProviderError>;

    /// Deleting an item that is already gone succeeds.
    async fn delete_item(&self, token: &BearerToken, id: &str) -> Result<(), ProviderError>;
}
