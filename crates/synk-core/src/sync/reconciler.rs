//! Reconciliation: two provider deltas in, one ordered operation list out.
//!
//! Pure and synchronous. Operations are grouped per link (or per origin
//! item for unlinked items) and emitted in key order, so the output does
//! not depend on the order of the inputs.
//!
//! Conflict policy:
//! - modified on one side: the other side is updated
//! - modified on both: the later `last_modified` wins, Google on a tie
//! - deleted on one side: the other side is deleted, even if it was modified
//! - deleted on both: the link is dissolved
//! - new on one side: created on the other, then linked
//! - new and already naming its counterpart: linked without a create

use std::collections::{HashMap, HashSet};

use tracing::error;

use super::detector::{ChangeKind, DetectedChange, ProviderDelta};
use crate::error::SyncError;
use crate::model::{
    ItemPatch, LinkChange, LinkEnd, LinkRecord, PendingLink, Provider, SyncItem, SyncOperation,
};

/// Side state of a linked pair as seen by this cycle.
#[derive(Debug, Clone, Copy)]
enum SideState<'a> {
    Unchanged(&'a SyncItem),
    Modified(&'a SyncItem),
    Removed,
}

impl<'a> SideState<'a> {
    fn item(&self) -> Option<&'a SyncItem> {
        match self {
            SideState::Unchanged(item) | SideState::Modified(item) => Some(item),
            SideState::Removed => None,
        }
    }
}

enum Plan {
    Ops(Vec<SyncOperation>),
    /// Create on `target`; `link` gets the new id via `LinkEnd::CreatedBy`.
    CreateAndLink {
        target: Provider,
        item: SyncItem,
        link_id: String,
        source_id: String,
    },
}

/// Merge `notion` and `google` deltas into the operations that converge them.
///
/// # Errors
/// `InvariantViolation` when the inputs contradict each other, which means
/// a defect upstream rather than a provider problem.
pub fn reconcile(
    notion: &ProviderDelta,
    google: &ProviderDelta,
    links: &[LinkRecord],
) -> Result<Vec<SyncOperation>, SyncError> {
    check_inputs(notion, google, links).map_err(|message| {
        error!(%message, "reconciliation invariant violated");
        SyncError::InvariantViolation(message)
    })?;

    let notion_changes = index_changes(notion);
    let google_changes = index_changes(google);
    let mut plans: Vec<(String, Plan)> = Vec::new();

    for link in links {
        let n = side_state(notion, &notion_changes, &link.notion_id)?;
        let g = side_state(google, &google_changes, &link.google_id)?;
        if let Some(ops) = plan_linked(link, n, g) {
            plans.push((link.link_id.clone(), Plan::Ops(ops)));
        }
    }

    let linked_notion: HashSet<&str> = links.iter().map(|l| l.notion_id.as_str()).collect();
    let linked_google: HashSet<&str> = links.iter().map(|l| l.google_id.as_str()).collect();
    let notion_added = added_sorted(notion);
    let google_added = added_sorted(google);

    // Recovery pairs first, so neither member is also planned as a create.
    let mut paired_notion: HashSet<String> = HashSet::new();
    let mut paired_google: HashSet<String> = HashSet::new();
    let mut recoveries: Vec<(&SyncItem, &SyncItem)> = Vec::new();
    for (added, source, other, other_linked) in [
        (&notion_added, Provider::Notion, google, &linked_google),
        (&google_added, Provider::Google, notion, &linked_notion),
    ] {
        for item in added {
            let Some(partner) = recovery_partner(item, source, other, other_linked) else {
                continue;
            };
            let (notion_item, google_item) = match source {
                Provider::Notion => (*item, partner),
                Provider::Google => (partner, *item),
            };
            let notion_id = id_of(notion_item, Provider::Notion)?;
            let google_id = id_of(google_item, Provider::Google)?;
            if paired_notion.contains(notion_id) || paired_google.contains(google_id) {
                continue;
            }
            paired_notion.insert(notion_id.to_string());
            paired_google.insert(google_id.to_string());
            recoveries.push((notion_item, google_item));
        }
    }
    for (notion_item, google_item) in recoveries {
        let (link_id, ops) = plan_recovery(notion_item, google_item)?;
        plans.push((link_id, Plan::Ops(ops)));
    }

    for (added, source, paired) in [
        (&notion_added, Provider::Notion, &paired_notion),
        (&google_added, Provider::Google, &paired_google),
    ] {
        let target = source.other();
        for item in added {
            let id = id_of(item, source)?;
            if paired.contains(id) {
                continue;
            }
            let link_id = LinkRecord::origin_key(source, id);
            plans.push((
                link_id.clone(),
                Plan::CreateAndLink {
                    target,
                    item: item.for_target(target),
                    link_id,
                    source_id: id.to_string(),
                },
            ));
        }
    }

    plans.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(emit(plans))
}

fn emit(plans: Vec<(String, Plan)>) -> Vec<SyncOperation> {
    let mut ops = Vec::new();
    for (_, plan) in plans {
        match plan {
            Plan::Ops(list) => ops.extend(list),
            Plan::CreateAndLink {
                target,
                item,
                link_id,
                source_id,
            } => {
                let index = ops.len();
                let hash = item.content_hash.clone();
                let (notion, google) = match target {
                    Provider::Google => (LinkEnd::Known(source_id), LinkEnd::CreatedBy(index)),
                    Provider::Notion => (LinkEnd::CreatedBy(index), LinkEnd::Known(source_id)),
                };
                ops.push(SyncOperation::Create {
                    provider: target,
                    item,
                });
                ops.push(SyncOperation::LinkOnly(LinkChange::Establish(PendingLink {
                    link_id,
                    notion,
                    google,
                    notion_hash: hash.clone(),
                    google_hash: hash,
                })));
            }
        }
    }
    ops
}

/// Added items of one delta in id order.
fn added_sorted(delta: &ProviderDelta) -> Vec<&SyncItem> {
    let mut added: Vec<&DetectedChange> = delta
        .changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Added)
        .collect();
    added.sort_by(|a, b| a.id.cmp(&b.id));
    added.iter().filter_map(|c| c.item.as_ref()).collect()
}

fn index_changes(delta: &ProviderDelta) -> HashMap<&str, &DetectedChange> {
    delta.changes.iter().map(|c| (c.id.as_str(), c)).collect()
}

fn side_state<'a>(
    delta: &'a ProviderDelta,
    changes: &HashMap<&str, &'a DetectedChange>,
    id: &str,
) -> Result<SideState<'a>, SyncError> {
    match changes.get(id) {
        Some(change) => match change.kind {
            ChangeKind::Removed => Ok(SideState::Removed),
            ChangeKind::Modified => change
                .item
                .as_ref()
                .map(SideState::Modified)
                .ok_or_else(|| invariant(format!("modified {id} carries no item"))),
            ChangeKind::Added => Err(invariant(format!(
                "{} item {id} is linked but classified as added",
                delta.provider.as_str()
            ))),
            ChangeKind::Unchanged => delta
                .view
                .get(id)
                .map(SideState::Unchanged)
                .ok_or_else(|| invariant(format!("unchanged {id} missing from view"))),
        },
        None => delta.view.get(id).map(SideState::Unchanged).ok_or_else(|| {
            invariant(format!(
                "linked {} item {id} is neither in the view nor removed",
                delta.provider.as_str()
            ))
        }),
    }
}

fn plan_linked(link: &LinkRecord, n: SideState<'_>, g: SideState<'_>) -> Option<Vec<SyncOperation>> {
    let dissolve = || {
        vec![SyncOperation::LinkOnly(LinkChange::Dissolve {
            link_id: link.link_id.clone(),
        })]
    };
    let delete = |provider: Provider| {
        vec![SyncOperation::Delete {
            provider,
            id: link.id_for(provider).to_string(),
            link_id: link.link_id.clone(),
        }]
    };

    match (n, g) {
        (SideState::Unchanged(_), SideState::Unchanged(_)) => None,
        (SideState::Removed, SideState::Removed) => Some(dissolve()),
        (SideState::Removed, _) => Some(delete(Provider::Google)),
        (_, SideState::Removed) => Some(delete(Provider::Notion)),
        (SideState::Modified(ni), SideState::Unchanged(gi)) => {
            Some(converge(link, ni, gi, Provider::Notion))
        }
        (SideState::Unchanged(ni), SideState::Modified(gi)) => {
            Some(converge(link, ni, gi, Provider::Google))
        }
        (SideState::Modified(ni), SideState::Modified(gi)) => {
            Some(converge(link, ni, gi, winner(ni, gi)))
        }
    }
}

/// Later edit wins; Google is the tie-break authority.
fn winner(notion: &SyncItem, google: &SyncItem) -> Provider {
    if notion.last_modified > google.last_modified {
        Provider::Notion
    } else {
        Provider::Google
    }
}

/// Push the winning side's content to the loser, or just refresh the link
/// hashes when both sides already agree.
fn converge(
    link: &LinkRecord,
    notion: &SyncItem,
    google: &SyncItem,
    winning: Provider,
) -> Vec<SyncOperation> {
    if notion.content_hash == google.content_hash {
        return vec![SyncOperation::LinkOnly(LinkChange::Establish(PendingLink::known(
            link.link_id.clone(),
            link.notion_id.clone(),
            link.google_id.clone(),
            notion.content_hash.clone(),
            google.content_hash.clone(),
        )))];
    }

    let (source, current) = match winning {
        Provider::Notion => (notion, google),
        Provider::Google => (google, notion),
    };
    let target = winning.other();
    vec![SyncOperation::Update {
        provider: target,
        id: link.id_for(target).to_string(),
        patch: ItemPatch::between(Some(current), source),
        link: PendingLink::known(
            link.link_id.clone(),
            link.notion_id.clone(),
            link.google_id.clone(),
            source.content_hash.clone(),
            source.content_hash.clone(),
        ),
    }]
}

/// An unlinked counterpart in `other` that `item` names, as left behind by
/// a create whose link was never committed.
fn recovery_partner<'a>(
    item: &SyncItem,
    source: Provider,
    other: &'a ProviderDelta,
    other_linked: &HashSet<&str>,
) -> Option<&'a SyncItem> {
    let counterpart_id = item.id_for(other.provider)?;
    if other_linked.contains(counterpart_id) {
        return None;
    }
    let counterpart = other.view.get(counterpart_id)?;
    match (counterpart.id_for(source), item.id_for(source)) {
        (Some(back), Some(own)) if back != own => None,
        _ => Some(counterpart),
    }
}

fn plan_recovery(
    notion: &SyncItem,
    google: &SyncItem,
) -> Result<(String, Vec<SyncOperation>), SyncError> {
    let notion_id = id_of(notion, Provider::Notion)?;
    let google_id = id_of(google, Provider::Google)?;
    // The event carrying the Notion id was created from Notion.
    let link_id = if google.id_for(Provider::Notion) == Some(notion_id) {
        LinkRecord::origin_key(Provider::Notion, notion_id)
    } else {
        LinkRecord::origin_key(Provider::Google, google_id)
    };
    let link = LinkRecord {
        link_id: link_id.clone(),
        notion_id: notion_id.to_string(),
        google_id: google_id.to_string(),
        notion_hash: String::new(),
        google_hash: String::new(),
        last_synced_at: notion.last_modified.max(google.last_modified),
    };
    let ops = converge(&link, notion, google, winner(notion, google));
    Ok((link_id, ops))
}

fn id_of(item: &SyncItem, provider: Provider) -> Result<&str, SyncError> {
    item.id_for(provider)
        .ok_or_else(|| invariant(format!("{} item without a {} id", provider.as_str(), provider.as_str())))
}

fn invariant(message: String) -> SyncError {
    error!(%message, "reconciliation invariant violated");
    SyncError::InvariantViolation(message)
}

fn check_inputs(
    notion: &ProviderDelta,
    google: &ProviderDelta,
    links: &[LinkRecord],
) -> Result<(), String> {
    if notion.provider != Provider::Notion || google.provider != Provider::Google {
        return Err("deltas passed for the wrong providers".into());
    }

    let mut link_ids = HashSet::new();
    let mut notion_ids = HashSet::new();
    let mut google_ids = HashSet::new();
    for link in links {
        if !link_ids.insert(link.link_id.as_str()) {
            return Err(format!("duplicate link id {}", link.link_id));
        }
        if !notion_ids.insert(link.notion_id.as_str()) {
            return Err(format!("notion item {} linked twice", link.notion_id));
        }
        if !google_ids.insert(link.google_id.as_str()) {
            return Err(format!("google item {} linked twice", link.google_id));
        }
    }

    for delta in [notion, google] {
        let mut seen = HashSet::new();
        for change in &delta.changes {
            if !seen.insert(change.id.as_str()) {
                return Err(format!(
                    "{} item {} classified twice",
                    delta.provider.as_str(),
                    change.id
                ));
            }
            if let Some(item) = &change.item {
                if item.id_for(delta.provider) != Some(change.id.as_str()) {
                    return Err(format!(
                        "{} change {} carries an item with a different id",
                        delta.provider.as_str(),
                        change.id
                    ));
                }
            }
        }
    }
    Ok(())
}
