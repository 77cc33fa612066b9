//! The provider-neutral item model.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// External system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Notion,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Notion, Provider::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Notion => "notion",
            Provider::Google => "google",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Notion => "Notion",
            Provider::Google => "Google Calendar",
        }
    }

    /// The provider on the other side of the sync.
    pub fn other(&self) -> Provider {
        match self {
            Provider::Notion => Provider::Google,
            Provider::Google => Provider::Notion,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notion" => Ok(Provider::Notion),
            "google" | "gcal" | "google-calendar" => Ok(Provider::Google),
            other => Err(format!("unknown provider '{other}' (expected notion or google)")),
        }
    }
}

/// Lifecycle status of a task/event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Completed => "completed",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ItemStatus::Active),
            "completed" => Some(ItemStatus::Completed),
            "cancelled" => Some(ItemStatus::Cancelled),
            _ => None,
        }
    }
}

/// Normalized representation of one task/event.
///
/// At least one external id is set; both are set only once the item has
/// been linked (or when the provider payload names its counterpart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    pub external_id_notion: Option<String>,
    pub external_id_google: Option<String>,
    pub title: String,
    pub start_time: DateTime<Utc>,
    /// `None` for all-day items.
    pub end_time: Option<DateTime<Utc>>,
    /// Provider-side modification timestamp.
    pub last_modified: DateTime<Utc>,
    pub status: ItemStatus,
    pub content_hash: String,
}

impl SyncItem {
    /// Build an item owned by `provider` and compute its content hash.
    pub fn new(
        provider: Provider,
        id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        status: ItemStatus,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let id = Some(id.into());
        let (external_id_notion, external_id_google) = match provider {
            Provider::Notion => (id, None),
            Provider::Google => (None, id),
        };
        let mut item = Self {
            external_id_notion,
            external_id_google,
            title: title.into(),
            start_time: truncate_seconds(start_time),
            end_time: end_time.map(truncate_seconds),
            last_modified,
            status,
            content_hash: String::new(),
        };
        item.rehash();
        item
    }

    pub fn id_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Notion => self.external_id_notion.as_deref(),
            Provider::Google => self.external_id_google.as_deref(),
        }
    }

    pub fn set_id(&mut self, provider: Provider, id: Option<String>) {
        match provider {
            Provider::Notion => self.external_id_notion = id,
            Provider::Google => self.external_id_google = id,
        }
    }

    pub fn with_counterpart(mut self, provider: Provider, id: impl Into<String>) -> Self {
        self.set_id(provider, Some(id.into()));
        self
    }

    pub fn is_all_day(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn rehash(&mut self) {
        self.content_hash =
            content_hash(&self.title, self.start_time, self.end_time, self.status);
    }

    /// A copy of this item addressed to `target`: the target id is cleared
    /// and the source id is kept as the back-reference.
    pub fn for_target(&self, target: Provider) -> SyncItem {
        let mut item = self.clone();
        item.set_id(target, None);
        item
    }
}

/// Digest of the normalized, provider-independent fields.
pub fn content_hash(
    title: &str,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: ItemStatus,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().as_bytes());
    hasher.update([0u8]);
    match end_time {
        // All-day items compare by calendar date only.
        None => hasher.update(start_time.format("%Y-%m-%d").to_string().as_bytes()),
        Some(end) => {
            hasher.update(start_time.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes());
            hasher.update([0u8]);
            hasher.update(end.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes());
        }
    }
    hasher.update([0u8]);
    hasher.update(status.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

fn truncate_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

/// Start and end always travel together so the target can keep them consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Field-level change applied by `update_item`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub timing: Option<Timing>,
    pub status: Option<ItemStatus>,
}

impl ItemPatch {
    /// Fields of `desired` that differ from `current`; every field when the
    /// current state is unknown.
    pub fn between(current: Option<&SyncItem>, desired: &SyncItem) -> Self {
        let timing = Timing {
            start_time: desired.start_time,
            end_time: desired.end_time,
        };
        match current {
            None => Self {
                title: Some(desired.title.clone()),
                timing: Some(timing),
                status: Some(desired.status),
            },
            Some(cur) => Self {
                title: (cur.title.trim() != desired.title.trim()).then(|| desired.title.clone()),
                timing: (cur.start_time != desired.start_time || cur.end_time != desired.end_time)
                    .then_some(timing),
                status: (cur.status != desired.status).then_some(desired.status),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.timing.is_none() && self.status.is_none()
    }

    pub fn apply_to(&self, item: &mut SyncItem) {
        if let Some(title) = &self.title {
            item.title = title.clone();
        }
        if let Some(timing) = &self.timing {
            item.start_time = timing.start_time;
            item.end_time = timing.end_time;
        }
        if let Some(status) = self.status {
            item.status = status;
        }
        item.rehash();
    }
}
