//! Notion database adapter.
//!
//! Each page of the configured database is one item. Notion has no change
//! feed that reports deletions, so every listing is a full paginated query
//! and the snapshot comparison upstream finds what disappeared.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::http::HttpClient;
use super::{BackoffPolicy, ChangeListing, ParsedEntry, ProviderAdapter};
use crate::credentials::BearerToken;
use crate::error::ProviderError;
use crate::model::{ItemPatch, ItemStatus, Provider, SyncCursor, SyncItem, Timing};
use crate::storage::{HttpConfig, NotionConfig, StatusKind};

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

pub struct NotionAdapter {
    http: HttpClient,
    config: NotionConfig,
}

impl NotionAdapter {
    pub fn new(config: NotionConfig, http: &HttpConfig) -> Result<Self, ProviderError> {
        let client = HttpClient::new(
            Provider::Notion,
            std::time::Duration::from_secs(http.timeout_secs),
            BackoffPolicy::from_config(http),
        )?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: NotionConfig, http: HttpClient) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &BearerToken,
    ) -> reqwest::RequestBuilder {
        self.http
            .client()
            .request(method, self.url(path))
            .bearer_auth(token.as_str())
            .header("Notion-Version", NOTION_VERSION)
    }
}

#[async_trait]
impl ProviderAdapter for NotionAdapter {
    fn provider(&self) -> Provider {
        Provider::Notion
    }

    async fn list_changes(
        &self,
        token: &BearerToken,
        _cursor: Option<&SyncCursor>,
    ) -> Result<ChangeListing, ProviderError> {
        let path = format!("databases/{}/query", self.config.database_id);
        let mut listing = ChangeListing {
            full_scan: true,
            ..Default::default()
        };
        let mut start_cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(c) = &start_cursor {
                body["start_cursor"] = json!(c);
            }
            let resp = self
                .http
                .send_json(
                    self.request(reqwest::Method::POST, &path, token).json(&body),
                    &self.config.database_id,
                )
                .await?;
            pages += 1;

            let results = resp
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| decode("query response has no results array"))?;
            for page in results {
                listing.push(parse_page(page, &self.config)?, Provider::Notion);
            }

            let has_more = resp.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            start_cursor = resp
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(String::from);
            if !has_more || start_cursor.is_none() {
                break;
            }
        }

        info!(
            pages,
            items = listing.items.len(),
            removed = listing.removed.len(),
            "notion database scanned"
        );
        Ok(listing)
    }

    async fn create_item(
        &self,
        token: &BearerToken,
        item: &SyncItem,
    ) -> Result<String, ProviderError> {
        let mut properties = Map::new();
        write_title(&mut properties, &self.config, &item.title);
        write_timing(&mut properties, &self.config, item.start_time, item.end_time);
        write_status(&mut properties, &self.config, item.status);
        if let (Some(prop), Some(google_id)) =
            (&self.config.google_id_property, item.id_for(Provider::Google))
        {
            properties.insert(prop.clone(), rich_text(google_id));
        }

        let body = json!({
            "parent": { "database_id": self.config.database_id },
            "properties": properties,
        });
        let resp = self
            .http
            .send_json(
                self.request(reqwest::Method::POST, "pages", token).json(&body),
                &self.config.database_id,
            )
            .await?;
        let id = resp
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| decode("created page has no id"))?;
        debug!(id, "notion page created");
        Ok(id.to_string())
    }

    async fn update_item(
        &self,
        token: &BearerToken,
        id: &str,
        patch: &ItemPatch,
    ) -> Result<(), ProviderError> {
        let properties = patch_properties(&self.config, patch);
        if properties.is_empty() {
            return Ok(());
        }
        self.http
            .send(
                self.request(reqwest::Method::PATCH, &format!("pages/{id}"), token)
                    .json(&json!({ "properties": properties })),
                id,
            )
            .await?;
        Ok(())
    }

    async fn delete_item(&self, token: &BearerToken, id: &str) -> Result<(), ProviderError> {
        let result = self
            .http
            .send(
                self.request(reqwest::Method::PATCH, &format!("pages/{id}"), token)
                    .json(&json!({ "archived": true })),
                id,
            )
            .await;
        match result {
            Ok(_) | Err(ProviderError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn decode(message: impl Into<String>) -> ProviderError {
    ProviderError::Decode {
        provider: Provider::Notion,
        message: message.into(),
    }
}

/// Normalize one page object from a database query.
pub(crate) fn parse_page(page: &Value, config: &NotionConfig) -> Result<ParsedEntry, ProviderError> {
    let id = page
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| decode("page without id"))?
        .to_string();

    let archived = page.get("archived").and_then(Value::as_bool).unwrap_or(false)
        || page.get("in_trash").and_then(Value::as_bool).unwrap_or(false);
    if archived {
        return Ok(ParsedEntry::Removed(id));
    }

    let last_modified = page
        .get("last_edited_time")
        .and_then(Value::as_str)
        .and_then(parse_datetime)
        .ok_or_else(|| decode(format!("page {id} has no valid last_edited_time")))?;

    let props = page
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| decode(format!("page {id} has no properties")))?;

    let title = props
        .get(&config.title_property)
        .and_then(|p| p.get("title"))
        .map(plain_text)
        .unwrap_or_default();

    let Some(date) = props
        .get(&config.date_property)
        .and_then(|p| p.get("date"))
        .filter(|d| !d.is_null())
    else {
        return Ok(ParsedEntry::Skipped {
            id,
            reason: "no date",
        });
    };
    let Some(timing) = parse_date_value(date) else {
        return Ok(ParsedEntry::Skipped {
            id,
            reason: "unreadable date",
        });
    };

    let status = props
        .get(&config.status_property)
        .and_then(|p| p.get("status").or_else(|| p.get("select")))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .map(|name| status_from_name(config, name))
        .unwrap_or_default();

    let mut item = SyncItem::new(
        Provider::Notion,
        id,
        title,
        timing.start_time,
        timing.end_time,
        status,
        last_modified,
    );

    if let Some(prop) = &config.google_id_property {
        let counterpart = props
            .get(prop)
            .and_then(|p| p.get("rich_text"))
            .map(plain_text)
            .filter(|s| !s.trim().is_empty());
        if let Some(google_id) = counterpart {
            item = item.with_counterpart(Provider::Google, google_id.trim());
        }
    }

    Ok(ParsedEntry::Live(item))
}

fn plain_text(fragments: &Value) -> String {
    fragments
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| {
                    p.get("plain_text")
                        .or_else(|| p.pointer("/text/content"))
                        .and_then(Value::as_str)
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Date-only starts are all-day; a timed start without an end is a point in time.
fn parse_date_value(date: &Value) -> Option<Timing> {
    let start = date.get("start").and_then(Value::as_str)?;
    if let Ok(day) = NaiveDate::parse_from_str(start, "%Y-%m-%d") {
        return Some(Timing {
            start_time: day.and_hms_opt(0, 0, 0)?.and_utc(),
            end_time: None,
        });
    }
    let start_time = parse_datetime(start)?;
    let end_time = date
        .get("end")
        .and_then(Value::as_str)
        .and_then(parse_datetime)
        .unwrap_or(start_time);
    Some(Timing {
        start_time,
        end_time: Some(end_time),
    })
}

fn status_from_name(config: &NotionConfig, name: &str) -> ItemStatus {
    let matches = |values: &[String]| values.iter().any(|v| v.eq_ignore_ascii_case(name));
    if matches(&config.completed_values) {
        ItemStatus::Completed
    } else if matches(&config.cancelled_values) {
        ItemStatus::Cancelled
    } else {
        ItemStatus::Active
    }
}

fn status_name(config: &NotionConfig, status: ItemStatus) -> Option<&str> {
    let values = match status {
        ItemStatus::Active => &config.active_values,
        ItemStatus::Completed => &config.completed_values,
        ItemStatus::Cancelled => &config.cancelled_values,
    };
    values.first().map(String::as_str)
}

fn rich_text(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

fn write_title(props: &mut Map<String, Value>, config: &NotionConfig, title: &str) {
    props.insert(
        config.title_property.clone(),
        json!({ "title": [{ "text": { "content": title } }] }),
    );
}

fn write_timing(
    props: &mut Map<String, Value>,
    config: &NotionConfig,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) {
    let date = match end {
        None => json!({ "start": start.format("%Y-%m-%d").to_string(), "end": null }),
        Some(end) if end == start => json!({ "start": start.to_rfc3339(), "end": null }),
        Some(end) => json!({ "start": start.to_rfc3339(), "end": end.to_rfc3339() }),
    };
    props.insert(config.date_property.clone(), json!({ "date": date }));
}

fn write_status(props: &mut Map<String, Value>, config: &NotionConfig, status: ItemStatus) {
    let Some(name) = status_name(config, status) else {
        return;
    };
    let key = match config.status_kind {
        StatusKind::Status => "status",
        StatusKind::Select => "select",
    };
    let mut value = Map::new();
    value.insert(key.to_string(), json!({ "name": name }));
    props.insert(config.status_property.clone(), Value::Object(value));
}

fn patch_properties(config: &NotionConfig, patch: &ItemPatch) -> Map<String, Value> {
    let mut props = Map::new();
    if let Some(title) = &patch.title {
        write_title(&mut props, config, title);
    }
    if let Some(timing) = &patch.timing {
        write_timing(&mut props, config, timing.start_time, timing.end_time);
    }
    if let Some(status) = patch.status {
        write_status(&mut props, config, status);
    }
    props
}
