//! Per-provider incremental state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::{Provider, SyncItem};

/// Opaque change token plus the time the snapshot it bounds was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub provider: Provider,
    /// Provider change token (Google `nextSyncToken`); `None` forces a full scan.
    pub token: Option<String>,
    pub snapshot_timestamp: DateTime<Utc>,
}

impl SyncCursor {
    pub fn new(provider: Provider, token: Option<String>, snapshot_timestamp: DateTime<Utc>) -> Self {
        Self {
            provider,
            token,
            snapshot_timestamp,
        }
    }
}

/// Last-known item set of one provider, keyed by that provider's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub provider: Provider,
    pub items: BTreeMap<String, SyncItem>,
}

impl Snapshot {
    pub fn empty(provider: Provider) -> Self {
        Self {
            provider,
            items: BTreeMap::new(),
        }
    }

    pub fn from_items(provider: Provider, items: impl IntoIterator<Item = SyncItem>) -> Self {
        let items = items
            .into_iter()
            .filter_map(|item| item.id_for(provider).map(|id| (id.to_string(), item.clone())))
            .collect();
        Self { provider, items }
    }

    pub fn get(&self, id: &str) -> Option<&SyncItem> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
