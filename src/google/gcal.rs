//! Google Calendar v3 client for the endpoints the sync engine needs:
//! event list/get/insert/patch/delete and push channel watch/stop.
//!
//! Event resources are decoded at this boundary into [`ProviderEvent`]
//! so nothing past here handles untyped provider JSON, except the raw
//! snapshot that is persisted alongside each row.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounds every provider call so a hung request fails the source
/// instead of stalling the whole run.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: &str = "250";
const EVENT_KIND: &str = "calendar#event";

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("Google Calendar request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Google Calendar returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Failed to decode Google Calendar response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Unsupported event resource kind: {0}")]
    UnsupportedKind(String),
}

impl GoogleApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GoogleApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The sync token is no longer valid and a full listing is required.
    pub fn is_gone(&self) -> bool {
        self.status() == Some(StatusCode::GONE)
    }

    /// The event does not exist (anymore) on the provider side.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::NOT_FOUND) | Some(StatusCode::GONE)
        )
    }
}

/// Start or end of an event. Exactly one of `date` (all-day) or
/// `date_time` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPerson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer: Option<bool>,
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub is_self: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    pub id: String,
    pub status: Option<String>,
    pub etag: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventDateTime>,
    pub end: Option<EventDateTime>,
    pub organizer: Option<EventPerson>,
    #[serde(default)]
    pub attendees: Vec<EventPerson>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub html_link: Option<String>,
    pub recurring_event_id: Option<String>,
}

impl GoogleEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    /// Last time the provider says the event changed.
    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.updated.or(self.created)
    }
}

/// An event resource as returned by the provider, one variant per
/// resource schema the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    CalendarV3 { event: GoogleEvent, raw: Value },
}

impl ProviderEvent {
    pub fn from_value(raw: Value) -> Result<Self, GoogleApiError> {
        // Incremental responses always carry `kind` but some minimal
        // payloads omit it, those are still v3 resources.
        match raw.get("kind").and_then(Value::as_str) {
            None | Some(EVENT_KIND) => {
                let event: GoogleEvent = serde_json::from_value(raw.clone())?;
                Ok(ProviderEvent::CalendarV3 { event, raw })
            }
            Some(other) => Err(GoogleApiError::UnsupportedKind(other.to_string())),
        }
    }

    pub fn event(&self) -> &GoogleEvent {
        match self {
            ProviderEvent::CalendarV3 { event, .. } => event,
        }
    }

    pub fn raw(&self) -> &Value {
        match self {
            ProviderEvent::CalendarV3 { raw, .. } => raw,
        }
    }

    pub fn id(&self) -> &str {
        &self.event().id
    }
}

/// Body sent on insert and patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<EventPerson>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventListQuery {
    /// Changes since the cursor, including deleted events.
    Incremental { sync_token: String },
    /// Everything inside a time window, ordered by update time.
    Window {
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    },
}

impl EventListQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("maxResults", PAGE_SIZE.to_string())];
        match self {
            EventListQuery::Incremental { sync_token } => {
                params.push(("syncToken", sync_token.clone()));
                params.push(("showDeleted", "true".to_string()));
            }
            EventListQuery::Window { time_min, time_max } => {
                params.push(("timeMin", time_min.to_rfc3339()));
                params.push(("timeMax", time_max.to_rfc3339()));
                params.push(("orderBy", "updated".to_string()));
            }
        }
        params
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    #[serde(default)]
    pub items: Vec<Value>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub address: String,
    pub token: String,
    pub params: WatchParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchParams {
    pub ttl: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchChannelResponse {
    pub id: String,
    pub resource_id: String,
    pub resource_uri: Option<String>,
    /// Milliseconds since the epoch, encoded as a string.
    pub expiration: Option<String>,
}

impl WatchChannelResponse {
    pub fn expiration_at(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.expiration.as_deref()?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StopChannelRequest<'a> {
    id: &'a str,
    resource_id: &'a str,
}

/// The provider operations the sync engine depends on.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventListQuery,
        page_token: Option<&str>,
    ) -> Result<EventsPage, GoogleApiError>;

    async fn insert_event(
        &self,
        calendar_id: &str,
        payload: &EventPayload,
    ) -> Result<ProviderEvent, GoogleApiError>;

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<ProviderEvent, GoogleApiError>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str)
    -> Result<(), GoogleApiError>;

    async fn watch_events(
        &self,
        calendar_id: &str,
        request: &WatchRequest,
    ) -> Result<WatchChannelResponse, GoogleApiError>;

    async fn stop_channel(&self, channel_id: &str, resource_id: &str)
    -> Result<(), GoogleApiError>;
}

pub struct GoogleCalendarClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GoogleCalendarClient {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self, GoogleApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    async fn send_raw(&self, req: RequestBuilder) -> Result<String, GoogleApiError> {
        let res = req.bearer_auth(&self.access_token).send().await?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GoogleApiError::Status { status, body });
        }
        Ok(body)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, GoogleApiError> {
        let body = self.send_raw(req).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_event(&self, req: RequestBuilder) -> Result<ProviderEvent, GoogleApiError> {
        let raw: Value = self.send(req).await?;
        ProviderEvent::from_value(raw)
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarClient {
    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventListQuery,
        page_token: Option<&str>,
    ) -> Result<EventsPage, GoogleApiError> {
        let mut params = query.params();
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let req = self.client.get(self.events_url(calendar_id)).query(&params);
        self.send(req).await
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        payload: &EventPayload,
    ) -> Result<ProviderEvent, GoogleApiError> {
        let req = self.client.post(self.events_url(calendar_id)).json(payload);
        self.send_event(req).await
    }

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<ProviderEvent, GoogleApiError> {
        let req = self
            .client
            .patch(self.event_url(calendar_id, event_id))
            .json(payload);
        self.send_event(req).await
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), GoogleApiError> {
        let req = self.client.delete(self.event_url(calendar_id, event_id));
        self.send_raw(req).await?;
        Ok(())
    }

    async fn watch_events(
        &self,
        calendar_id: &str,
        request: &WatchRequest,
    ) -> Result<WatchChannelResponse, GoogleApiError> {
        let url = format!("{}/watch", self.events_url(calendar_id));
        let req = self.client.post(url).json(request);
        self.send(req).await
    }

    async fn stop_channel(
        &self,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<(), GoogleApiError> {
        let url = format!("{}/channels/stop", self.base_url);
        let req = self.client.post(url).json(&StopChannelRequest {
            id: channel_id,
            resource_id,
        });
        self.send_raw(req).await?;
        Ok(())
    }
}
