//! Operations emitted by reconciliation and applied by adapters.

use serde::{Deserialize, Serialize};

use super::item::{ItemPatch, Provider, SyncItem};
use super::link::{LinkChange, PendingLink};

/// One atomic action against a provider or the link table.
///
/// Operations are immutable once emitted; the orchestrator tracks the
/// outcome of each one independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOperation {
    /// Create `item` on `provider`; the item keeps its source id.
    Create { provider: Provider, item: SyncItem },
    /// Patch an existing item; `link` is persisted once the patch lands.
    Update {
        provider: Provider,
        id: String,
        patch: ItemPatch,
        link: PendingLink,
    },
    /// Remove an item whose counterpart was deleted, then drop the link.
    Delete {
        provider: Provider,
        id: String,
        link_id: String,
    },
    /// Link-table change with no provider call.
    LinkOnly(LinkChange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    LinkOnly,
}

impl SyncOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            SyncOperation::Create { .. } => OperationKind::Create,
            SyncOperation::Update { .. } => OperationKind::Update,
            SyncOperation::Delete { .. } => OperationKind::Delete,
            SyncOperation::LinkOnly(_) => OperationKind::LinkOnly,
        }
    }

    /// Provider the operation calls out to; `None` for link-only changes.
    pub fn target(&self) -> Option<Provider> {
        match self {
            SyncOperation::Create { provider, .. }
            | SyncOperation::Update { provider, .. }
            | SyncOperation::Delete { provider, .. } => Some(*provider),
            SyncOperation::LinkOnly(_) => None,
        }
    }

    /// Short human-readable label for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            SyncOperation::Create { provider, item } => {
                let source = item
                    .external_id_notion
                    .as_deref()
                    .or(item.external_id_google.as_deref())
                    .unwrap_or("?");
                format!("create on {} from {source}", provider.as_str())
            }
            SyncOperation::Update { provider, id, .. } => {
                format!("update {}:{id}", provider.as_str())
            }
            SyncOperation::Delete { provider, id, .. } => {
                format!("delete {}:{id}", provider.as_str())
            }
            SyncOperation::LinkOnly(LinkChange::Establish(p)) => format!("link {}", p.link_id),
            SyncOperation::LinkOnly(LinkChange::Dissolve { link_id }) => {
                format!("unlink {link_id}")
            }
        }
    }
}
