//! Test utilities for integration tests
#![allow(dead_code)]
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Error, anyhow};
use async_trait::async_trait;
use axum::{Router, body::Body};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_rusqlite::Connection;

use kazador_sync::api::AppState;
use kazador_sync::api::app;
use kazador_sync::core::AppConfig;
use kazador_sync::core::db::{async_db, initialize_db};
use kazador_sync::google::gcal::{
    CalendarApi, EventListQuery, EventPayload, EventsPage, GoogleApiError, ProviderEvent,
    WatchChannelResponse, WatchRequest,
};
use kazador_sync::google::oauth::CALENDAR_SCOPES;
use kazador_sync::sync::db::{insert_source, save_event, upsert_account};
use kazador_sync::sync::job::CalendarConnector;
use kazador_sync::sync::models::{CalendarEvent, CalendarSource, LinkedSource, OAuthAccount};

pub const WEBHOOK_BASE_URL: &str = "https://sync.example.com";

/// A migrated database in a temporary directory. The directory is
/// removed when this is dropped so keep it alive for the whole test.
pub struct TestDb {
    pub dir: TempDir,
    pub db: Connection,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = async_db(dir.path().join("db").to_str().unwrap())
        .await
        .expect("Failed to connect to async db");
    db.call(|conn| {
        initialize_db(conn).expect("Failed to migrate db");
        Ok(())
    })
    .await
    .unwrap();
    TestDb { dir, db }
}

pub fn test_config(webhook_base_url: Option<&str>) -> AppConfig {
    AppConfig {
        storage_path: String::from("./"),
        db_path: String::from("./db"),
        google_client_id: String::from("test_client_id"),
        google_client_secret: String::from("test_client_secret"),
        google_redirect_uri: String::from("urn:ietf:wg:oauth:2.0:oob"),
        google_api_url: String::from("http://127.0.0.1:9/calendar/v3"),
        google_token_url: String::from("http://127.0.0.1:9/token"),
        webhook_base_url: webhook_base_url.map(String::from),
        sync_interval_secs: 900,
    }
}

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("Invalid timestamp")
        .with_timezone(&Utc)
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// Insert an account with a token valid for an hour and a source on
/// its primary calendar.
pub async fn seed_source(db: &Connection, source_id: &str, user_id: &str) -> LinkedSource {
    let account = OAuthAccount {
        id: format!("acct-{}", source_id),
        user_id: user_id.to_string(),
        account_email: format!("{}@example.com", source_id),
        scopes: CALENDAR_SCOPES.iter().map(|s| s.to_string()).collect(),
        access_token: Some(String::from("test_access_token")),
        refresh_token: Some(String::from("test_refresh_token")),
        expires_at: Some(now() + chrono::Duration::hours(1)),
        metadata: json!({}),
    };
    upsert_account(db, &account).await.unwrap();
    let source = CalendarSource {
        id: source_id.to_string(),
        user_id: user_id.to_string(),
        calendar_id: format!("{}@group.calendar.google.com", source_id),
        account_id: account.id.clone(),
        summary: Some(String::from("Tour dates")),
        timezone: Some(String::from("Europe/London")),
        metadata: json!({}),
        last_synced_at: None,
    };
    insert_source(db, &source).await.unwrap();
    LinkedSource { source, account }
}

/// A locally created timed event waiting to be pushed.
pub async fn seed_local_event(
    db: &Connection,
    source: &CalendarSource,
    summary: &str,
    start: &str,
    edited_at: DateTime<Utc>,
) -> CalendarEvent {
    let mut event = CalendarEvent::new_local(source, edited_at);
    event.summary = Some(summary.to_string());
    event.start = Some(start.parse().unwrap());
    let end = ts(start) + chrono::Duration::hours(2);
    event.end = Some(end.to_rfc3339().parse().unwrap());
    save_event(db, &event).await.unwrap();
    event
}

#[derive(Default)]
struct FakeState {
    clock: Option<DateTime<Utc>>,
    seq: u64,
    events: BTreeMap<String, Value>,
    changed_at_seq: HashMap<String, u64>,
    next_ids: Vec<String>,
    id_counter: u64,
    page_size: usize,
    expire_next_incremental: bool,
    fail_list: bool,
    reject_summaries: HashSet<String>,
    fail_watch: bool,
    fail_stop: bool,
    watch_expiration: Option<String>,
    repeated: Vec<Value>,
    list_queries: Vec<EventListQuery>,
    inserted: Vec<EventPayload>,
    patched: Vec<(String, EventPayload)>,
    deleted: Vec<String>,
    watch_requests: Vec<WatchRequest>,
    stopped: Vec<(String, String)>,
}

/// In-memory provider. Sync tokens are `tok-<seq>` where `seq` counts
/// every change made to the calendar.
#[derive(Clone, Default)]
pub struct FakeCalendar {
    state: Arc<Mutex<FakeState>>,
}

fn status_error(status: StatusCode, body: &str) -> GoogleApiError {
    GoogleApiError::Status {
        status,
        body: body.to_string(),
    }
}

impl FakeCalendar {
    pub fn new() -> Self {
        let calendar = Self::default();
        calendar.state().page_size = 2;
        calendar
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_clock(&self, at: DateTime<Utc>) {
        self.state().clock = Some(at);
    }

    pub fn queue_event_id(&self, id: &str) {
        self.state().next_ids.push(id.to_string());
    }

    pub fn expire_next_incremental(&self) {
        self.state().expire_next_incremental = true;
    }

    pub fn fail_list(&self) {
        self.state().fail_list = true;
    }

    pub fn reject_summary(&self, summary: &str) {
        self.state().reject_summaries.insert(summary.to_string());
    }

    pub fn fail_watch(&self) {
        self.state().fail_watch = true;
    }

    pub fn fail_stop(&self) {
        self.state().fail_stop = true;
    }

    pub fn set_watch_expiration(&self, millis: &str) {
        self.state().watch_expiration = Some(millis.to_string());
    }

    /// Simulate an edit made directly in the provider's calendar.
    pub fn remote_upsert(&self, event: Value) {
        let mut state = self.state();
        let id = event["id"].as_str().expect("event needs an id").to_string();
        let mut resource = json!({"kind": "calendar#event", "status": "confirmed"});
        merge(&mut resource, &event);
        state.seq += 1;
        let seq = state.seq;
        state.changed_at_seq.insert(id.clone(), seq);
        state.events.insert(id, resource);
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state().page_size = page_size;
    }

    /// Serve `event` again at the end of full window listings, the way an
    /// event edited mid-listing shows up on a later page.
    pub fn repeat_in_window(&self, event: Value) {
        let mut resource = json!({"kind": "calendar#event", "status": "confirmed"});
        merge(&mut resource, &event);
        self.state().repeated.push(resource);
    }

    /// Simulate a deletion made directly in the provider's calendar.
    pub fn remote_cancel(&self, id: &str, updated: &str) {
        let mut state = self.state();
        state.seq += 1;
        let seq = state.seq;
        if let Some(event) = state.events.get_mut(id) {
            event["status"] = json!("cancelled");
            event["updated"] = json!(updated);
        }
        state.changed_at_seq.insert(id.to_string(), seq);
    }

    pub fn event(&self, id: &str) -> Option<Value> {
        self.state().events.get(id).cloned()
    }

    pub fn list_queries(&self) -> Vec<EventListQuery> {
        self.state().list_queries.clone()
    }

    pub fn inserted(&self) -> Vec<EventPayload> {
        self.state().inserted.clone()
    }

    pub fn patched(&self) -> Vec<(String, EventPayload)> {
        self.state().patched.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn watch_requests(&self) -> Vec<WatchRequest> {
        self.state().watch_requests.clone()
    }

    pub fn stopped(&self) -> Vec<(String, String)> {
        self.state().stopped.clone()
    }

    pub fn current_token(&self) -> String {
        format!("tok-{}", self.state().seq)
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn payload_json(payload: &EventPayload) -> Value {
    serde_json::to_value(payload).unwrap()
}

#[async_trait]
impl CalendarApi for FakeCalendar {
    async fn list_events(
        &self,
        _calendar_id: &str,
        query: &EventListQuery,
        page_token: Option<&str>,
    ) -> Result<EventsPage, GoogleApiError> {
        let mut state = self.state();
        if page_token.is_none() {
            state.list_queries.push(query.clone());
        }
        if state.fail_list {
            return Err(status_error(StatusCode::INTERNAL_SERVER_ERROR, "backendError"));
        }

        let mut ids: Vec<(u64, String)> = match query {
            EventListQuery::Incremental { sync_token } => {
                if state.expire_next_incremental {
                    state.expire_next_incremental = false;
                    return Err(status_error(StatusCode::GONE, "fullSyncRequired"));
                }
                let since: u64 = sync_token
                    .trim_start_matches("tok-")
                    .parse()
                    .map_err(|_| status_error(StatusCode::GONE, "invalid sync token"))?;
                state
                    .changed_at_seq
                    .iter()
                    .filter(|(_, seq)| **seq > since)
                    .map(|(id, seq)| (*seq, id.clone()))
                    .collect()
            }
            EventListQuery::Window { .. } => state
                .events
                .iter()
                .filter(|(_, event)| event["status"] != "cancelled")
                .map(|(id, _)| (state.changed_at_seq.get(id).copied().unwrap_or(0), id.clone()))
                .collect(),
        };
        ids.sort();

        let mut listed: Vec<Value> = ids
            .iter()
            .filter_map(|(_, id)| state.events.get(id).cloned())
            .collect();
        if matches!(query, EventListQuery::Window { .. }) {
            listed.extend(state.repeated.iter().cloned());
        }

        let offset: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (offset + state.page_size).min(listed.len());
        let items = listed[offset..end].to_vec();
        let last_page = end >= listed.len();

        Ok(EventsPage {
            items,
            next_page_token: if last_page { None } else { Some(end.to_string()) },
            next_sync_token: if last_page {
                Some(format!("tok-{}", state.seq))
            } else {
                None
            },
        })
    }

    async fn insert_event(
        &self,
        _calendar_id: &str,
        payload: &EventPayload,
    ) -> Result<ProviderEvent, GoogleApiError> {
        let mut state = self.state();
        if let Some(summary) = &payload.summary {
            if state.reject_summaries.contains(summary) {
                return Err(status_error(StatusCode::BAD_REQUEST, "invalid event"));
            }
        }
        state.inserted.push(payload.clone());
        let id = if state.next_ids.is_empty() {
            state.id_counter += 1;
            format!("evt_{}", state.id_counter)
        } else {
            state.next_ids.remove(0)
        };
        let updated = state.clock.unwrap_or_else(now).to_rfc3339();
        let mut resource = json!({
            "kind": "calendar#event",
            "id": id,
            "etag": format!("\"etag-{}\"", id),
            "status": "confirmed",
            "created": updated,
            "updated": updated,
        });
        merge(&mut resource, &payload_json(payload));
        state.seq += 1;
        let seq = state.seq;
        state.changed_at_seq.insert(id.clone(), seq);
        state.events.insert(id, resource.clone());
        ProviderEvent::from_value(resource)
    }

    async fn patch_event(
        &self,
        _calendar_id: &str,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<ProviderEvent, GoogleApiError> {
        let mut state = self.state();
        if let Some(summary) = &payload.summary {
            if state.reject_summaries.contains(summary) {
                return Err(status_error(StatusCode::BAD_REQUEST, "invalid event"));
            }
        }
        state.patched.push((event_id.to_string(), payload.clone()));
        let updated = state.clock.unwrap_or_else(now).to_rfc3339();
        state.seq += 1;
        let seq = state.seq;
        let resource = state
            .events
            .get_mut(event_id)
            .ok_or_else(|| status_error(StatusCode::NOT_FOUND, "notFound"))?;
        merge(resource, &payload_json(payload));
        resource["updated"] = json!(updated);
        let resource = resource.clone();
        state.changed_at_seq.insert(event_id.to_string(), seq);
        ProviderEvent::from_value(resource)
    }

    async fn delete_event(&self, _calendar_id: &str, event_id: &str) -> Result<(), GoogleApiError> {
        let mut state = self.state();
        let updated = state.clock.unwrap_or_else(now).to_rfc3339();
        match state.events.get_mut(event_id) {
            Some(event) if event["status"] != "cancelled" => {
                event["status"] = json!("cancelled");
                event["updated"] = json!(updated);
            }
            Some(_) => return Err(status_error(StatusCode::GONE, "deleted")),
            None => return Err(status_error(StatusCode::NOT_FOUND, "notFound")),
        }
        state.deleted.push(event_id.to_string());
        state.seq += 1;
        let seq = state.seq;
        state.changed_at_seq.insert(event_id.to_string(), seq);
        Ok(())
    }

    async fn watch_events(
        &self,
        _calendar_id: &str,
        request: &WatchRequest,
    ) -> Result<WatchChannelResponse, GoogleApiError> {
        let mut state = self.state();
        if state.fail_watch {
            return Err(status_error(StatusCode::BAD_REQUEST, "pushWebhookBadDomain"));
        }
        state.watch_requests.push(request.clone());
        Ok(WatchChannelResponse {
            id: request.id.clone(),
            resource_id: format!("res-{}", state.watch_requests.len()),
            resource_uri: Some(String::from("https://www.googleapis.com/calendar/v3/x")),
            expiration: state.watch_expiration.clone(),
        })
    }

    async fn stop_channel(&self, channel_id: &str, resource_id: &str) -> Result<(), GoogleApiError> {
        let mut state = self.state();
        if state.fail_stop {
            return Err(status_error(StatusCode::NOT_FOUND, "channel not found"));
        }
        state
            .stopped
            .push((channel_id.to_string(), resource_id.to_string()));
        Ok(())
    }
}

/// Hands out a fake calendar per account. Accounts listed in
/// `unauthorized` fail to connect the way a revoked grant would.
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub calendars: HashMap<String, FakeCalendar>,
    pub unauthorized: HashSet<String>,
}

impl FakeConnector {
    pub fn with(account_id: &str, calendar: &FakeCalendar) -> Self {
        let mut connector = Self::default();
        connector
            .calendars
            .insert(account_id.to_string(), calendar.clone());
        connector
    }

    pub fn add(mut self, account_id: &str, calendar: &FakeCalendar) -> Self {
        self.calendars
            .insert(account_id.to_string(), calendar.clone());
        self
    }
}

#[async_trait]
impl CalendarConnector for FakeConnector {
    async fn connect(
        &self,
        _db: &Connection,
        account: &OAuthAccount,
        _now: DateTime<Utc>,
    ) -> Result<Box<dyn CalendarApi>, Error> {
        if self.unauthorized.contains(&account.id) {
            return Err(anyhow!("Token request failed: 400 Bad Request (invalid_grant: )"));
        }
        let calendar = self
            .calendars
            .get(&account.id)
            .ok_or_else(|| anyhow!("No calendar for account {}", account.id))?;
        Ok(Box::new(calendar.clone()))
    }
}

/// Creates a test application router backed by `db` and `connector`.
pub fn test_app(db: &Connection, connector: FakeConnector) -> Router {
    let app_state = AppState::with_connector(
        db.clone(),
        test_config(Some(WEBHOOK_BASE_URL)),
        Arc::new(connector),
    );
    app(Arc::new(RwLock::new(app_state)))
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
