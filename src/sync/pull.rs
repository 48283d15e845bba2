//! Pull provider-side changes for a source into the local store.
//!
//! With a stored cursor only the changes since that cursor are listed.
//! Without one, or after the provider expired it, the full window around
//! `now` is reloaded.
use std::collections::HashMap;

use anyhow::{Context, Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_rusqlite::Connection;

use super::db::{
    clear_sync_token, find_events_by_provider_id, get_sync_state, save_event, save_sync_state,
    touch_source_synced,
};
use super::models::{CalendarEvent, CalendarSource, EventOrigin, SyncState, SyncStatus};
use super::translate::apply_provider_event;
use crate::google::gcal::{CalendarApi, EventListQuery, GoogleApiError, ProviderEvent};

pub const PAST_WINDOW_DAYS: i64 = 45;
pub const FUTURE_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PullSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub conflicts_skipped: usize,
}

struct Changes {
    items: Vec<Value>,
    next_sync_token: Option<String>,
}

pub fn full_window(now: DateTime<Utc>) -> EventListQuery {
    EventListQuery::Window {
        time_min: now - Duration::days(PAST_WINDOW_DAYS),
        time_max: now + Duration::days(FUTURE_WINDOW_DAYS),
    }
}

/// Walk every page of the listing. The cursor comes with the last page.
async fn list_changes(
    api: &dyn CalendarApi,
    calendar_id: &str,
    query: &EventListQuery,
) -> Result<Changes, GoogleApiError> {
    let mut items = Vec::new();
    let mut next_sync_token = None;
    let mut page_token: Option<String> = None;

    loop {
        let page = api
            .list_events(calendar_id, query, page_token.as_deref())
            .await?;
        items.extend(page.items);
        if page.next_sync_token.is_some() {
            next_sync_token = page.next_sync_token;
        }
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(Changes {
        items,
        next_sync_token,
    })
}

enum Merge {
    Inserted,
    Updated,
    Deleted,
    Conflict,
    Skipped,
}

fn has_newer_local_edit(local: &CalendarEvent, provider_event: &ProviderEvent) -> bool {
    if local.origin != EventOrigin::Kazador {
        return false;
    }
    match (
        local.last_kazador_updated_at,
        provider_event.event().changed_at(),
    ) {
        (Some(local_at), Some(remote_at)) => local_at > remote_at,
        _ => false,
    }
}

async fn merge_event(
    db: &Connection,
    source: &CalendarSource,
    local: &mut HashMap<String, CalendarEvent>,
    provider_event: ProviderEvent,
    now: DateTime<Utc>,
) -> Result<Merge, Error> {
    let existing = local.get(provider_event.id());

    if let Some(row) = existing {
        if row.pending_action.is_some() {
            tracing::debug!(
                "Skipping {} in source {}, local {} not pushed yet",
                provider_event.id(),
                source.id,
                row.resolve_action().map(|a| a.as_str()).unwrap_or("change")
            );
            return Ok(Merge::Conflict);
        }
        if has_newer_local_edit(row, &provider_event) {
            tracing::debug!(
                "Skipping {} in source {}, local edit is newer",
                provider_event.id(),
                source.id
            );
            return Ok(Merge::Conflict);
        }
    }

    // Cancellations of rows we never stored, or already deleted ourselves,
    // carry nothing new
    let cancelled = provider_event.event().is_cancelled();
    if cancelled && existing.is_none_or(|row| row.sync_status == SyncStatus::Deleted) {
        return Ok(Merge::Skipped);
    }

    let merged = apply_provider_event(existing, source, &provider_event, now);
    let outcome = match (existing.is_some(), cancelled) {
        (_, true) => Merge::Deleted,
        (true, false) => Merge::Updated,
        (false, false) => Merge::Inserted,
    };
    save_event(db, &merged).await?;
    local.insert(provider_event.id().to_string(), merged);
    Ok(outcome)
}

pub async fn pull_source(
    db: &Connection,
    api: &dyn CalendarApi,
    source: &CalendarSource,
    now: DateTime<Utc>,
) -> Result<PullSummary, Error> {
    let mut cursor = get_sync_state(db, &source.id)
        .await?
        .and_then(|state| state.sync_token);
    let mut local = find_events_by_provider_id(db, &source.id).await?;

    let query = match &cursor {
        Some(sync_token) => EventListQuery::Incremental {
            sync_token: sync_token.clone(),
        },
        None => full_window(now),
    };

    let listed = match list_changes(api, &source.calendar_id, &query).await {
        Err(err) if err.is_gone() && cursor.is_some() => {
            tracing::warn!(
                "Sync token for source {} expired, reloading the full window",
                source.id
            );
            clear_sync_token(db, &source.id).await?;
            cursor = None;
            list_changes(api, &source.calendar_id, &full_window(now)).await
        }
        other => other,
    };

    let changes = match listed {
        Ok(changes) => changes,
        Err(err) => {
            save_sync_state(
                db,
                &SyncState {
                    source_id: source.id.clone(),
                    sync_token: cursor,
                    last_polled_at: Some(now),
                    last_error: Some(err.to_string()),
                },
            )
            .await?;
            return Err(err).context(format!("Failed to list events for source {}", source.id));
        }
    };

    let mut summary = PullSummary::default();
    for item in changes.items {
        let provider_event = match ProviderEvent::from_value(item) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Skipping malformed event in source {}: {}", source.id, err);
                continue;
            }
        };
        match merge_event(db, source, &mut local, provider_event, now).await? {
            Merge::Inserted => summary.inserted += 1,
            Merge::Updated => summary.updated += 1,
            Merge::Deleted => summary.deleted += 1,
            Merge::Conflict => summary.conflicts_skipped += 1,
            Merge::Skipped => {}
        }
    }

    save_sync_state(
        db,
        &SyncState {
            source_id: source.id.clone(),
            sync_token: changes.next_sync_token.or(cursor),
            last_polled_at: Some(now),
            last_error: None,
        },
    )
    .await?;
    touch_source_synced(db, &source.id, now).await?;

    tracing::info!("Pulled source {}: {:?}", source.id, summary);
    Ok(summary)
}
