//! Change detection for one provider.
//!
//! The current view of a provider is its previous snapshot with the new
//! listing applied (or the listing alone after a full scan). Items are then
//! classified against the link table: a linked item changed when its hash
//! differs from the hash recorded when the pair last converged.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{LinkRecord, Provider, Snapshot, SyncItem};
use crate::providers::ChangeListing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
    Unchanged,
}

/// One classified item. `item` is `None` only for removals.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedChange {
    pub kind: ChangeKind,
    pub id: String,
    pub item: Option<SyncItem>,
    /// Ordering timestamp: the item's own, or the last known one for removals.
    pub last_modified: DateTime<Utc>,
}

/// Classified changes plus the full current view of one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDelta {
    pub provider: Provider,
    /// Ordered by `(last_modified, id)`; unchanged items are omitted.
    pub changes: Vec<DetectedChange>,
    pub view: Snapshot,
}

impl ProviderDelta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

/// Merge `listing` into `previous` to obtain the provider's current item set.
///
/// Within one listing the entry with the latest `last_modified` wins for
/// each id, and removals win over live entries.
pub fn current_view(provider: Provider, previous: &Snapshot, listing: &ChangeListing) -> Snapshot {
    let mut items: BTreeMap<String, SyncItem> = if listing.full_scan {
        BTreeMap::new()
    } else {
        previous.items.clone()
    };

    let mut batch: HashMap<&str, &SyncItem> = HashMap::new();
    for item in &listing.items {
        let Some(id) = item.id_for(provider) else {
            continue;
        };
        match batch.get(id) {
            Some(seen) if seen.last_modified > item.last_modified => {}
            _ => {
                batch.insert(id, item);
            }
        }
    }
    for (id, item) in batch {
        items.insert(id.to_string(), item.clone());
    }
    for id in &listing.removed {
        items.remove(id);
    }

    Snapshot { provider, items }
}

/// Classify the current view of `provider` against the link table.
pub fn detect(
    provider: Provider,
    previous: &Snapshot,
    listing: &ChangeListing,
    links: &[LinkRecord],
) -> ProviderDelta {
    let view = current_view(provider, previous, listing);
    classify(provider, previous, view, links)
}

/// Classification step on an already assembled view.
pub fn classify(
    provider: Provider,
    previous: &Snapshot,
    view: Snapshot,
    links: &[LinkRecord],
) -> ProviderDelta {
    let linked: HashMap<&str, &LinkRecord> =
        links.iter().map(|l| (l.id_for(provider), l)).collect();

    let mut changes = Vec::new();
    for (id, item) in &view.items {
        let kind = match linked.get(id.as_str()) {
            Some(link) if link.hash_for(provider) == item.content_hash => ChangeKind::Unchanged,
            Some(_) => ChangeKind::Modified,
            None => ChangeKind::Added,
        };
        if kind != ChangeKind::Unchanged {
            changes.push(DetectedChange {
                kind,
                id: id.clone(),
                item: Some(item.clone()),
                last_modified: item.last_modified,
            });
        }
    }

    for link in links {
        let id = link.id_for(provider);
        if view.items.contains_key(id) {
            continue;
        }
        let last_modified = previous
            .get(id)
            .map(|i| i.last_modified)
            .unwrap_or(link.last_synced_at);
        changes.push(DetectedChange {
            kind: ChangeKind::Removed,
            id: id.to_string(),
            item: None,
            last_modified,
        });
    }

    changes.sort_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.id.cmp(&b.id))
    });

    ProviderDelta {
        provider,
        changes,
        view,
    }
}
