//! Queries over the sync tables.
use std::collections::HashMap;

use anyhow::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, named_params};
use tokio_rusqlite::Connection;

use super::models::{
    CalendarEvent, CalendarSource, LinkedSource, OAuthAccount, SyncState, WatchChannel,
};

const LINKED_SOURCE_SELECT: &str = "
    SELECT s.id, s.user_id, s.calendar_id, s.account_id, s.summary, s.timezone,
           s.metadata, s.last_synced_at,
           a.id, a.user_id, a.account_email, a.scopes, a.access_token, a.refresh_token,
           a.expires_at, a.metadata
    FROM user_calendar_sources s
    JOIN oauth_accounts a ON a.id = s.account_id";

fn linked_source_from_row(row: &rusqlite::Row) -> rusqlite::Result<LinkedSource> {
    Ok(LinkedSource {
        source: CalendarSource::from_row(row, 0)?,
        account: OAuthAccount::from_row(row, 8)?,
    })
}

/// Every calendar source with the account it syncs through.
pub async fn find_linked_sources(db: &Connection) -> Result<Vec<LinkedSource>, Error> {
    let sources = db
        .call(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY s.rowid", LINKED_SOURCE_SELECT))?;
            let rows = stmt
                .query_map([], linked_source_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;
    Ok(sources)
}

pub async fn find_linked_source(
    db: &Connection,
    source_id: &str,
) -> Result<Option<LinkedSource>, Error> {
    let source_id = source_id.to_string();
    let source = db
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!("{} WHERE s.id = ?1", LINKED_SOURCE_SELECT))?;
            let row = stmt
                .query_row([&source_id], linked_source_from_row)
                .optional()?;
            Ok(row)
        })
        .await?;
    Ok(source)
}

/// Insert an account or refresh the tokens of the one already linked for
/// the same user and email. Returns the stored account id.
pub async fn upsert_account(db: &Connection, account: &OAuthAccount) -> Result<String, Error> {
    let account = account.clone();
    let id = db
        .call(move |conn| {
            let scopes = serde_json::to_value(&account.scopes)
                .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
            let id: String = conn.query_row(
                "INSERT INTO oauth_accounts
                    (id, user_id, provider, account_email, scopes, access_token,
                     refresh_token, expires_at, metadata)
                 VALUES (:id, :user_id, 'google', :account_email, :scopes, :access_token,
                     :refresh_token, :expires_at, :metadata)
                 ON CONFLICT (user_id, provider, account_email) DO UPDATE SET
                    scopes = excluded.scopes,
                    access_token = excluded.access_token,
                    refresh_token = COALESCE(excluded.refresh_token, oauth_accounts.refresh_token),
                    expires_at = excluded.expires_at,
                    metadata = excluded.metadata
                 RETURNING id",
                named_params! {
                    ":id": account.id,
                    ":user_id": account.user_id,
                    ":account_email": account.account_email,
                    ":scopes": scopes,
                    ":access_token": account.access_token,
                    ":refresh_token": account.refresh_token,
                    ":expires_at": account.expires_at,
                    ":metadata": account.metadata,
                },
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await?;
    Ok(id)
}

pub async fn update_account_tokens(db: &Connection, account: &OAuthAccount) -> Result<(), Error> {
    let account = account.clone();
    db.call(move |conn| {
        conn.execute(
            "UPDATE oauth_accounts
             SET access_token = ?1, refresh_token = ?2, expires_at = ?3, metadata = ?4
             WHERE id = ?5",
            rusqlite::params![
                account.access_token,
                account.refresh_token,
                account.expires_at,
                account.metadata,
                account.id,
            ],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

pub async fn insert_source(db: &Connection, source: &CalendarSource) -> Result<(), Error> {
    let source = source.clone();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO user_calendar_sources
                (id, user_id, calendar_id, account_id, summary, timezone, metadata, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                source.id,
                source.user_id,
                source.calendar_id,
                source.account_id,
                source.summary,
                source.timezone,
                source.metadata,
                source.last_synced_at,
            ],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

pub async fn touch_source_synced(
    db: &Connection,
    source_id: &str,
    at: DateTime<Utc>,
) -> Result<(), Error> {
    let source_id = source_id.to_string();
    db.call(move |conn| {
        conn.execute(
            "UPDATE user_calendar_sources SET last_synced_at = ?1 WHERE id = ?2",
            rusqlite::params![at, source_id],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

/// Rows with a local mutation still to be pushed, in insertion order.
pub async fn find_outstanding_events(
    db: &Connection,
    source_id: &str,
) -> Result<Vec<CalendarEvent>, Error> {
    let source_id = source_id.to_string();
    let events = db
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM calendar_events
                 WHERE source_id = ?1
                   AND (pending_action IS NOT NULL
                        OR sync_status IN ('pending', 'needs_update', 'delete_pending'))
                 ORDER BY created_at, rowid",
                CalendarEvent::COLUMNS
            ))?;
            let rows = stmt
                .query_map([&source_id], CalendarEvent::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;
    Ok(events)
}

/// Local rows of a source keyed by provider event id. Rows that were
/// never pushed have no provider id and are left out.
pub async fn find_events_by_provider_id(
    db: &Connection,
    source_id: &str,
) -> Result<HashMap<String, CalendarEvent>, Error> {
    let source_id = source_id.to_string();
    let events = db
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM calendar_events
                 WHERE source_id = ?1 AND event_id IS NOT NULL",
                CalendarEvent::COLUMNS
            ))?;
            let rows = stmt
                .query_map([&source_id], CalendarEvent::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

    Ok(events
        .into_iter()
        .filter_map(|event| event.event_id.clone().map(|id| (id, event)))
        .collect())
}

pub async fn find_event(db: &Connection, id: &str) -> Result<Option<CalendarEvent>, Error> {
    let id = id.to_string();
    let event = db
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM calendar_events WHERE id = ?1",
                CalendarEvent::COLUMNS
            ))?;
            let row = stmt.query_row([&id], CalendarEvent::from_row).optional()?;
            Ok(row)
        })
        .await?;
    Ok(event)
}

pub async fn find_events_for_source(
    db: &Connection,
    source_id: &str,
) -> Result<Vec<CalendarEvent>, Error> {
    let source_id = source_id.to_string();
    let events = db
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM calendar_events WHERE source_id = ?1 ORDER BY created_at, rowid",
                CalendarEvent::COLUMNS
            ))?;
            let rows = stmt
                .query_map([&source_id], CalendarEvent::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;
    Ok(events)
}

/// Insert the row or overwrite every mutable column of the existing one.
pub async fn save_event(db: &Connection, event: &CalendarEvent) -> Result<(), Error> {
    let event = event.clone();
    db.call(move |conn| {
        conn.execute(
            &format!(
                "INSERT INTO calendar_events ({})
                 VALUES (:id, :source_id, :calendar_id, :event_id, :summary, :description,
                     :location, :status, :start_at, :start_timezone, :end_at, :end_timezone,
                     :is_all_day, :organizer, :attendees, :raw, :sync_status, :origin,
                     :pending_action, :etag, :last_google_updated_at, :last_kazador_updated_at,
                     :last_synced_at, :sync_error, :ignored)
                 ON CONFLICT (id) DO UPDATE SET
                    event_id = excluded.event_id,
                    summary = excluded.summary,
                    description = excluded.description,
                    location = excluded.location,
                    status = excluded.status,
                    start_at = excluded.start_at,
                    start_timezone = excluded.start_timezone,
                    end_at = excluded.end_at,
                    end_timezone = excluded.end_timezone,
                    is_all_day = excluded.is_all_day,
                    organizer = excluded.organizer,
                    attendees = excluded.attendees,
                    raw = excluded.raw,
                    sync_status = excluded.sync_status,
                    origin = excluded.origin,
                    pending_action = excluded.pending_action,
                    etag = excluded.etag,
                    last_google_updated_at = excluded.last_google_updated_at,
                    last_kazador_updated_at = excluded.last_kazador_updated_at,
                    last_synced_at = excluded.last_synced_at,
                    sync_error = excluded.sync_error,
                    ignored = excluded.ignored",
                CalendarEvent::COLUMNS
            ),
            named_params! {
                ":id": event.id,
                ":source_id": event.source_id,
                ":calendar_id": event.calendar_id,
                ":event_id": event.event_id,
                ":summary": event.summary,
                ":description": event.description,
                ":location": event.location,
                ":status": event.status,
                ":start_at": event.start,
                ":start_timezone": event.start_timezone,
                ":end_at": event.end,
                ":end_timezone": event.end_timezone,
                ":is_all_day": event.is_all_day,
                ":organizer": event.organizer,
                ":attendees": event.attendees,
                ":raw": event.raw,
                ":sync_status": event.sync_status,
                ":origin": event.origin,
                ":pending_action": event.pending_action,
                ":etag": event.etag,
                ":last_google_updated_at": event.last_google_updated_at,
                ":last_kazador_updated_at": event.last_kazador_updated_at,
                ":last_synced_at": event.last_synced_at,
                ":sync_error": event.sync_error,
                ":ignored": event.ignored,
            },
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

pub async fn get_sync_state(db: &Connection, source_id: &str) -> Result<Option<SyncState>, Error> {
    let source_id = source_id.to_string();
    let state = db
        .call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT source_id, sync_token, last_polled_at, last_error
                     FROM calendar_sync_states WHERE source_id = ?1",
                    [&source_id],
                    |row| {
                        Ok(SyncState {
                            source_id: row.get(0)?,
                            sync_token: row.get(1)?,
                            last_polled_at: row.get(2)?,
                            last_error: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await?;
    Ok(state)
}

pub async fn save_sync_state(db: &Connection, state: &SyncState) -> Result<(), Error> {
    let state = state.clone();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO calendar_sync_states (source_id, sync_token, last_polled_at, last_error)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (source_id) DO UPDATE SET
                sync_token = excluded.sync_token,
                last_polled_at = excluded.last_polled_at,
                last_error = excluded.last_error",
            rusqlite::params![
                state.source_id,
                state.sync_token,
                state.last_polled_at,
                state.last_error,
            ],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

/// Drop the cursor so the next listing is a full reload.
pub async fn clear_sync_token(db: &Connection, source_id: &str) -> Result<(), Error> {
    let source_id = source_id.to_string();
    db.call(move |conn| {
        conn.execute(
            "UPDATE calendar_sync_states SET sync_token = NULL WHERE source_id = ?1",
            [&source_id],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

pub async fn get_watch_channel(
    db: &Connection,
    source_id: &str,
) -> Result<Option<WatchChannel>, Error> {
    let source_id = source_id.to_string();
    let channel = db
        .call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT source_id, resource_id, channel_id, expiration_at,
                            last_renewed_at, metadata
                     FROM calendar_watch_channels WHERE source_id = ?1",
                    [&source_id],
                    |row| {
                        Ok(WatchChannel {
                            source_id: row.get(0)?,
                            resource_id: row.get(1)?,
                            channel_id: row.get(2)?,
                            expiration_at: row.get(3)?,
                            last_renewed_at: row.get(4)?,
                            metadata: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await?;
    Ok(channel)
}

pub async fn save_watch_channel(db: &Connection, channel: &WatchChannel) -> Result<(), Error> {
    let channel = channel.clone();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO calendar_watch_channels
                (source_id, resource_id, channel_id, expiration_at, last_renewed_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (source_id) DO UPDATE SET
                resource_id = excluded.resource_id,
                channel_id = excluded.channel_id,
                expiration_at = excluded.expiration_at,
                last_renewed_at = excluded.last_renewed_at,
                metadata = excluded.metadata",
            rusqlite::params![
                channel.source_id,
                channel.resource_id,
                channel.channel_id,
                channel.expiration_at,
                channel.last_renewed_at,
                channel.metadata,
            ],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

pub async fn delete_watch_channel(db: &Connection, source_id: &str) -> Result<(), Error> {
    let source_id = source_id.to_string();
    db.call(move |conn| {
        conn.execute(
            "DELETE FROM calendar_watch_channels WHERE source_id = ?1",
            [&source_id],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}
