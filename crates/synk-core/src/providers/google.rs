//! Google Calendar events adapter.
//!
//! Listings use `syncToken` for incremental changes; an unknown or expired
//! token answers `410 Gone`, which surfaces as `CursorInvalidated`.
//! Item status and the Notion back-reference live in private extended
//! properties since calendar events have no native task status.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use url::Url;

use super::http::HttpClient;
use super::{BackoffPolicy, ChangeListing, ParsedEntry, ProviderAdapter};
use crate::credentials::BearerToken;
use crate::error::ProviderError;
use crate::model::{ItemPatch, ItemStatus, Provider, SyncCursor, SyncItem, Timing};
use crate::storage::{GoogleConfig, HttpConfig};

const MAX_RESULTS: &str = "250";
/// Private extended property carrying the item status.
pub const STATUS_PROPERTY: &str = "synkStatus";
/// Private extended property carrying the linked Notion page id.
pub const NOTION_ID_PROPERTY: &str = "synkNotionId";

pub struct GoogleCalendarAdapter {
    http: HttpClient,
    config: GoogleConfig,
}

impl GoogleCalendarAdapter {
    pub fn new(config: GoogleConfig, http: &HttpConfig) -> Result<Self, ProviderError> {
        let client = HttpClient::new(
            Provider::Google,
            std::time::Duration::from_secs(http.timeout_secs),
            BackoffPolicy::from_config(http),
        )?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: GoogleConfig, http: HttpClient) -> Self {
        Self { http, config }
    }

    /// `{api_base}/calendars/{calendar_id}/events[/{event_id}]`, percent-encoded.
    fn events_url(&self, event_id: Option<&str>) -> Result<Url, ProviderError> {
        let mut url = Url::parse(self.config.api_base.trim_end_matches('/'))
            .map_err(|e| decode(format!("invalid google.api_base: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| decode("google.api_base cannot be a base URL"))?;
            segments.pop_if_empty();
            segments.extend(["calendars", self.config.calendar_id.as_str(), "events"]);
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ProviderAdapter for GoogleCalendarAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn list_changes(
        &self,
        token: &BearerToken,
        cursor: Option<&SyncCursor>,
    ) -> Result<ChangeListing, ProviderError> {
        let sync_token = cursor.and_then(|c| c.token.clone());
        let mut listing = ChangeListing {
            full_scan: sync_token.is_none(),
            ..Default::default()
        };
        let url = self.events_url(None)?;
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("singleEvents", "true".into()),
                ("maxResults", MAX_RESULTS.into()),
            ];
            match &sync_token {
                Some(t) => {
                    query.push(("syncToken", t.clone()));
                    query.push(("showDeleted", "true".into()));
                }
                None => query.push(("showDeleted", "false".into())),
            }
            if let Some(p) = &page_token {
                query.push(("pageToken", p.clone()));
            }

            let request = self
                .http
                .client()
                .get(url.clone())
                .bearer_auth(token.as_str())
                .query(&query);
            let resp = match self.http.send_json(request, &self.config.calendar_id).await {
                Ok(resp) => resp,
                Err(ProviderError::Api { status: 410, .. }) => {
                    info!("google sync token rejected; full resync required");
                    return Err(ProviderError::CursorInvalidated {
                        provider: Provider::Google,
                    });
                }
                Err(e) => return Err(e),
            };
            pages += 1;

            if let Some(events) = resp.get("items").and_then(Value::as_array) {
                for event in events {
                    listing.push(parse_event(event)?, Provider::Google);
                }
            }

            page_token = resp
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from);
            if page_token.is_none() {
                listing.cursor = resp
                    .get("nextSyncToken")
                    .and_then(Value::as_str)
                    .map(String::from);
                break;
            }
        }

        info!(
            pages,
            full_scan = listing.full_scan,
            items = listing.items.len(),
            removed = listing.removed.len(),
            "google events listed"
        );
        Ok(listing)
    }

    async fn create_item(
        &self,
        token: &BearerToken,
        item: &SyncItem,
    ) -> Result<String, ProviderError> {
        let mut body = Map::new();
        body.insert("summary".into(), json!(item.title));
        write_timing(&mut body, item.start_time, item.end_time);
        let mut private = Map::new();
        private.insert(STATUS_PROPERTY.into(), json!(item.status.as_str()));
        if let Some(notion_id) = item.id_for(Provider::Notion) {
            private.insert(NOTION_ID_PROPERTY.into(), json!(notion_id));
        }
        body.insert("extendedProperties".into(), json!({ "private": private }));

        let request = self
            .http
            .client()
            .post(self.events_url(None)?)
            .bearer_auth(token.as_str())
            .json(&body);
        let resp = self.http.send_json(request, &self.config.calendar_id).await?;
        let id = resp
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| decode("created event has no id"))?;
        debug!(id, "google event created");
        Ok(id.to_string())
    }

    async fn update_item(
        &self,
        token: &BearerToken,
        id: &str,
        patch: &ItemPatch,
    ) -> Result<(), ProviderError> {
        let body = patch_body(patch);
        if body.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .client()
            .patch(self.events_url(Some(id))?)
            .bearer_auth(token.as_str())
            .json(&body);
        self.http.send(request, id).await?;
        Ok(())
    }

    async fn delete_item(&self, token: &BearerToken, id: &str) -> Result<(), ProviderError> {
        let request = self
            .http
            .client()
            .delete(self.events_url(Some(id))?)
            .bearer_auth(token.as_str());
        match self.http.send(request, id).await {
            Ok(_) | Err(ProviderError::NotFound { .. }) | Err(ProviderError::Api { status: 410, .. }) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn decode(message: impl Into<String>) -> ProviderError {
    ProviderError::Decode {
        provider: Provider::Google,
        message: message.into(),
    }
}

/// Normalize one event resource.
pub(crate) fn parse_event(event: &Value) -> Result<ParsedEntry, ProviderError> {
    let id = event
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| decode("event without id"))?
        .to_string();

    if event.get("status").and_then(Value::as_str) == Some("cancelled") {
        return Ok(ParsedEntry::Removed(id));
    }

    let last_modified = event
        .get("updated")
        .and_then(Value::as_str)
        .and_then(parse_datetime)
        .ok_or_else(|| decode(format!("event {id} has no valid updated timestamp")))?;

    let Some(timing) = parse_timing(event) else {
        return Ok(ParsedEntry::Skipped {
            id,
            reason: "no usable start",
        });
    };

    let private = event.pointer("/extendedProperties/private");
    let status = private
        .and_then(|p| p.get(STATUS_PROPERTY))
        .and_then(Value::as_str)
        .and_then(ItemStatus::parse)
        .unwrap_or_default();
    let title = event
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut item = SyncItem::new(
        Provider::Google,
        id,
        title,
        timing.start_time,
        timing.end_time,
        status,
        last_modified,
    );
    if let Some(notion_id) = private
        .and_then(|p| p.get(NOTION_ID_PROPERTY))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        item = item.with_counterpart(Provider::Notion, notion_id);
    }
    Ok(ParsedEntry::Live(item))
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_timing(event: &Value) -> Option<Timing> {
    let start = event.get("start")?;
    if let Some(day) = start.get("date").and_then(Value::as_str) {
        let day = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
        return Some(Timing {
            start_time: day.and_hms_opt(0, 0, 0)?.and_utc(),
            end_time: None,
        });
    }
    let start_time = start
        .get("dateTime")
        .and_then(Value::as_str)
        .and_then(parse_datetime)?;
    let end_time = event
        .pointer("/end/dateTime")
        .and_then(Value::as_str)
        .and_then(parse_datetime)
        .unwrap_or(start_time);
    Some(Timing {
        start_time,
        end_time: Some(end_time),
    })
}

/// All-day events end on the following date (Google's end date is exclusive).
fn write_timing(body: &mut Map<String, Value>, start: DateTime<Utc>, end: Option<DateTime<Utc>>) {
    match end {
        None => {
            let day = start.date_naive();
            let next = day + Duration::days(1);
            body.insert(
                "start".into(),
                json!({ "date": day.format("%Y-%m-%d").to_string(), "dateTime": null }),
            );
            body.insert(
                "end".into(),
                json!({ "date": next.format("%Y-%m-%d").to_string(), "dateTime": null }),
            );
        }
        Some(end) => {
            body.insert(
                "start".into(),
                json!({ "dateTime": start.to_rfc3339(), "date": null }),
            );
            body.insert(
                "end".into(),
                json!({ "dateTime": end.to_rfc3339(), "date": null }),
            );
        }
    }
}

fn patch_body(patch: &ItemPatch) -> Map<String, Value> {
    let mut body = Map::new();
    if let Some(title) = &patch.title {
        body.insert("summary".into(), json!(title));
    }
    if let Some(timing) = &patch.timing {
        write_timing(&mut body, timing.start_time, timing.end_time);
    }
    if let Some(status) = patch.status {
        let mut private = Map::new();
        private.insert(STATUS_PROPERTY.into(), json!(status.as_str()));
        body.insert("extendedProperties".into(), json!({ "private": private }));
    }
    body
}
