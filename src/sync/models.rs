//! Rows of the sync tables and the enumerated state stored in them.
//!
//! `sync_status`, `origin` and `pending_action` are persisted as text.
//! Reading a value outside the enumerated set is a conversion error, it
//! is never defaulted.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|err: UnknownValue| FromSqlError::Other(Box::new(err)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
    Deleted,
    NeedsUpdate,
    DeletePending,
}

text_enum!(SyncStatus, "sync_status", {
    Pending => "pending",
    Synced => "synced",
    Failed => "failed",
    Deleted => "deleted",
    NeedsUpdate => "needs_update",
    DeletePending => "delete_pending",
});

/// Which side authored a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    Google,
    Kazador,
}

text_enum!(EventOrigin, "origin", {
    Google => "google",
    Kazador => "kazador",
});

/// An outstanding local mutation not yet applied to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Create,
    Update,
    Delete,
}

text_enum!(PendingAction, "pending_action", {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

impl SyncStatus {
    /// Statuses the push engine picks up even without an explicit
    /// pending action.
    pub const OUTSTANDING: [SyncStatus; 3] = [
        SyncStatus::Pending,
        SyncStatus::NeedsUpdate,
        SyncStatus::DeletePending,
    ];

    pub fn implied_action(&self) -> Option<PendingAction> {
        match self {
            SyncStatus::Pending => Some(PendingAction::Create),
            SyncStatus::NeedsUpdate => Some(PendingAction::Update),
            SyncStatus::DeletePending => Some(PendingAction::Delete),
            SyncStatus::Synced | SyncStatus::Failed | SyncStatus::Deleted => None,
        }
    }

    /// Transition table for a push attempt of `action`.
    pub fn after_push(action: PendingAction, succeeded: bool) -> SyncStatus {
        match (action, succeeded) {
            (_, false) => SyncStatus::Failed,
            (PendingAction::Delete, true) => SyncStatus::Deleted,
            (PendingAction::Create | PendingAction::Update, true) => SyncStatus::Synced,
        }
    }
}

/// Start or end of an event: a calendar date for all-day events or an
/// instant with its offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

impl EventTime {
    pub fn date(&self) -> NaiveDate {
        match self {
            EventTime::Date(date) => *date,
            EventTime::DateTime(at) => at.date_naive(),
        }
    }

    pub fn has_time(&self) -> bool {
        matches!(self, EventTime::DateTime(_))
    }
}

impl FromStr for EventTime {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UnknownValue {
            kind: "event time",
            value: s.to_string(),
        };
        if s.contains('T') {
            DateTime::parse_from_rfc3339(s)
                .map(EventTime::DateTime)
                .map_err(|_| invalid())
        } else {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(EventTime::Date)
                .map_err(|_| invalid())
        }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            EventTime::DateTime(at) => f.write_str(&at.to_rfc3339()),
        }
    }
}

impl ToSql for EventTime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for EventTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err: UnknownValue| FromSqlError::Other(Box::new(err)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthAccount {
    pub id: String,
    pub user_id: String,
    pub account_email: String,
    pub scopes: Vec<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

impl OAuthAccount {
    pub fn has_scopes(&self, required: &[&str]) -> bool {
        required
            .iter()
            .all(|scope| self.scopes.iter().any(|granted| granted == scope))
    }

    pub(crate) fn from_row(row: &Row, offset: usize) -> rusqlite::Result<Self> {
        let scopes: Value = row.get(offset + 3)?;
        Ok(Self {
            id: row.get(offset)?,
            user_id: row.get(offset + 1)?,
            account_email: row.get(offset + 2)?,
            scopes: serde_json::from_value(scopes)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                    offset + 3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                ))?,
            access_token: row.get(offset + 4)?,
            refresh_token: row.get(offset + 5)?,
            expires_at: row.get(offset + 6)?,
            metadata: row.get(offset + 7)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarSource {
    pub id: String,
    pub user_id: String,
    pub calendar_id: String,
    pub account_id: String,
    pub summary: Option<String>,
    pub timezone: Option<String>,
    pub metadata: Value,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CalendarSource {
    pub(crate) fn from_row(row: &Row, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            user_id: row.get(offset + 1)?,
            calendar_id: row.get(offset + 2)?,
            account_id: row.get(offset + 3)?,
            summary: row.get(offset + 4)?,
            timezone: row.get(offset + 5)?,
            metadata: row.get(offset + 6)?,
            last_synced_at: row.get(offset + 7)?,
        })
    }
}

/// A calendar source together with the account used to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedSource {
    pub source: CalendarSource,
    pub account: OAuthAccount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub source_id: String,
    pub calendar_id: String,
    /// Provider event id, `None` until the row is first pushed.
    pub event_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub start: Option<EventTime>,
    pub start_timezone: Option<String>,
    pub end: Option<EventTime>,
    pub end_timezone: Option<String>,
    pub is_all_day: bool,
    pub organizer: Option<Value>,
    pub attendees: Value,
    pub raw: Option<Value>,
    pub sync_status: SyncStatus,
    pub origin: EventOrigin,
    pub pending_action: Option<PendingAction>,
    pub etag: Option<String>,
    pub last_google_updated_at: Option<DateTime<Utc>>,
    pub last_kazador_updated_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    pub ignored: bool,
}

impl CalendarEvent {
    pub const COLUMNS: &'static str = "id, source_id, calendar_id, event_id, summary, \
        description, location, status, start_at, start_timezone, end_at, end_timezone, \
        is_all_day, organizer, attendees, raw, sync_status, origin, pending_action, etag, \
        last_google_updated_at, last_kazador_updated_at, last_synced_at, sync_error, ignored";

    /// A locally authored event waiting to be created on the provider.
    pub fn new_local(source: &CalendarSource, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source.id.clone(),
            calendar_id: source.calendar_id.clone(),
            event_id: None,
            summary: None,
            description: None,
            location: None,
            status: None,
            start: None,
            start_timezone: None,
            end: None,
            end_timezone: None,
            is_all_day: false,
            organizer: None,
            attendees: Value::Array(vec![]),
            raw: None,
            sync_status: SyncStatus::Pending,
            origin: EventOrigin::Kazador,
            pending_action: Some(PendingAction::Create),
            etag: None,
            last_google_updated_at: None,
            last_kazador_updated_at: Some(now),
            last_synced_at: None,
            sync_error: None,
            ignored: false,
        }
    }

    /// Explicit pending action wins, otherwise it is implied by the status.
    pub fn resolve_action(&self) -> Option<PendingAction> {
        self.pending_action
            .or_else(|| self.sync_status.implied_action())
    }

    pub fn is_reconciled(&self) -> bool {
        self.pending_action.is_none() && self.sync_status == SyncStatus::Synced
    }

    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            source_id: row.get("source_id")?,
            calendar_id: row.get("calendar_id")?,
            event_id: row.get("event_id")?,
            summary: row.get("summary")?,
            description: row.get("description")?,
            location: row.get("location")?,
            status: row.get("status")?,
            start: row.get("start_at")?,
            start_timezone: row.get("start_timezone")?,
            end: row.get("end_at")?,
            end_timezone: row.get("end_timezone")?,
            is_all_day: row.get("is_all_day")?,
            organizer: row.get("organizer")?,
            attendees: row.get("attendees")?,
            raw: row.get("raw")?,
            sync_status: row.get("sync_status")?,
            origin: row.get("origin")?,
            pending_action: row.get("pending_action")?,
            etag: row.get("etag")?,
            last_google_updated_at: row.get("last_google_updated_at")?,
            last_kazador_updated_at: row.get("last_kazador_updated_at")?,
            last_synced_at: row.get("last_synced_at")?,
            sync_error: row.get("sync_error")?,
            ignored: row.get("ignored")?,
        })
    }
}

/// Incremental sync cursor, one per source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub source_id: String,
    pub sync_token: Option<String>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchChannel {
    pub source_id: String,
    pub resource_id: String,
    pub channel_id: String,
    pub expiration_at: DateTime<Utc>,
    pub last_renewed_at: DateTime<Utc>,
    pub metadata: Value,
}
