//! Persistent Notion <-> Google associations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::Provider;

/// Maps a Notion item to its Google Calendar counterpart.
///
/// `notion_hash`/`google_hash` are the content hashes each side had when
/// the pair last converged; a differing live hash means that side changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub link_id: String,
    pub notion_id: String,
    pub google_id: String,
    pub notion_hash: String,
    pub google_hash: String,
    pub last_synced_at: DateTime<Utc>,
}

impl LinkRecord {
    /// Link ids are derived from the side the item originated on.
    pub fn origin_key(provider: Provider, id: &str) -> String {
        format!("{}:{}", provider.as_str(), id)
    }

    pub fn id_for(&self, provider: Provider) -> &str {
        match provider {
            Provider::Notion => &self.notion_id,
            Provider::Google => &self.google_id,
        }
    }

    pub fn hash_for(&self, provider: Provider) -> &str {
        match provider {
            Provider::Notion => &self.notion_hash,
            Provider::Google => &self.google_hash,
        }
    }
}

/// One end of a link that may not exist until a `Create` runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkEnd {
    Known(String),
    /// Filled with the id returned by the operation at this index.
    CreatedBy(usize),
}

/// A `LinkRecord` to be written once its operation succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLink {
    pub link_id: String,
    pub notion: LinkEnd,
    pub google: LinkEnd,
    pub notion_hash: String,
    pub google_hash: String,
}

impl PendingLink {
    pub fn known(
        link_id: impl Into<String>,
        notion_id: impl Into<String>,
        google_id: impl Into<String>,
        notion_hash: impl Into<String>,
        google_hash: impl Into<String>,
    ) -> Self {
        Self {
            link_id: link_id.into(),
            notion: LinkEnd::Known(notion_id.into()),
            google: LinkEnd::Known(google_id.into()),
            notion_hash: notion_hash.into(),
            google_hash: google_hash.into(),
        }
    }

    /// Index of the operation this link waits on, if any.
    pub fn depends_on(&self) -> Option<usize> {
        match (&self.notion, &self.google) {
            (LinkEnd::CreatedBy(i), _) | (_, LinkEnd::CreatedBy(i)) => Some(*i),
            _ => None,
        }
    }

    /// Resolve placeholders against ids produced by successful creates.
    pub fn resolve(
        &self,
        created: &HashMap<usize, String>,
        at: DateTime<Utc>,
    ) -> Option<LinkRecord> {
        let end = |e: &LinkEnd| match e {
            LinkEnd::Known(id) => Some(id.clone()),
            LinkEnd::CreatedBy(i) => created.get(i).cloned(),
        };
        Some(LinkRecord {
            link_id: self.link_id.clone(),
            notion_id: end(&self.notion)?,
            google_id: end(&self.google)?,
            notion_hash: self.notion_hash.clone(),
            google_hash: self.google_hash.clone(),
            last_synced_at: at,
        })
    }
}

/// Link-table mutation carried by `SyncOperation::LinkOnly`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkChange {
    Establish(PendingLink),
    Dissolve { link_id: String },
}

impl LinkChange {
    pub fn link_id(&self) -> &str {
        match self {
            LinkChange::Establish(pending) => &pending.link_id,
            LinkChange::Dissolve { link_id } => link_id,
        }
    }
}
