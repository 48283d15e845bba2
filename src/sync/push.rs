//! Push local mutations of a source to the provider.
//!
//! A failure on one row is recorded on that row and the remaining rows
//! are still pushed.
use anyhow::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_rusqlite::Connection;

use super::db::{find_outstanding_events, save_event};
use super::models::{CalendarEvent, CalendarSource, PendingAction, SyncStatus};
use super::translate::{apply_push_response, to_event_payload};
use crate::google::gcal::CalendarApi;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PushSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
}

enum Pushed {
    Created(CalendarEvent),
    Updated(CalendarEvent),
    Deleted(CalendarEvent),
}

async fn push_event(
    api: &dyn CalendarApi,
    source: &CalendarSource,
    event: &CalendarEvent,
    action: PendingAction,
    now: DateTime<Utc>,
) -> Result<Pushed, Error> {
    match (action, event.event_id.as_deref()) {
        (PendingAction::Delete, Some(event_id)) => {
            match api.delete_event(&source.calendar_id, event_id).await {
                Ok(()) => {}
                // Already gone on the provider side
                Err(err) if err.is_not_found() => {
                    tracing::debug!("Event {} already deleted upstream", event_id);
                }
                Err(err) => return Err(err.into()),
            }
            Ok(Pushed::Deleted(deleted_row(event, now)))
        }
        // Never reached the provider so there is nothing to delete
        (PendingAction::Delete, None) => Ok(Pushed::Deleted(deleted_row(event, now))),
        // A row that already has a provider id is patched even if it is
        // marked for creation, so a retried create never duplicates it.
        (PendingAction::Create | PendingAction::Update, Some(event_id)) => {
            let payload = to_event_payload(event, source)?;
            let response = api
                .patch_event(&source.calendar_id, event_id, &payload)
                .await?;
            Ok(Pushed::Updated(apply_push_response(event, &response, now)))
        }
        (PendingAction::Create | PendingAction::Update, None) => {
            let payload = to_event_payload(event, source)?;
            let response = api.insert_event(&source.calendar_id, &payload).await?;
            Ok(Pushed::Created(apply_push_response(event, &response, now)))
        }
    }
}

fn deleted_row(event: &CalendarEvent, now: DateTime<Utc>) -> CalendarEvent {
    CalendarEvent {
        sync_status: SyncStatus::after_push(PendingAction::Delete, true),
        pending_action: None,
        sync_error: None,
        ignored: true,
        last_synced_at: Some(now),
        ..event.clone()
    }
}

/// The pending action is written back on failure so the row is picked
/// up again even though its status no longer implies one.
fn failed_row(
    event: &CalendarEvent,
    action: PendingAction,
    err: &Error,
    now: DateTime<Utc>,
) -> CalendarEvent {
    CalendarEvent {
        sync_status: SyncStatus::after_push(action, false),
        pending_action: Some(action),
        sync_error: Some(format!("{:#}", err)),
        last_synced_at: Some(now),
        ..event.clone()
    }
}

pub async fn push_source(
    db: &Connection,
    api: &dyn CalendarApi,
    source: &CalendarSource,
    now: DateTime<Utc>,
) -> Result<PushSummary, Error> {
    let mut summary = PushSummary::default();
    let events = find_outstanding_events(db, &source.id).await?;

    for event in events {
        let Some(action) = event.resolve_action() else {
            continue;
        };
        match push_event(api, source, &event, action, now).await {
            Ok(Pushed::Created(row)) => {
                save_event(db, &row).await?;
                summary.created += 1;
            }
            Ok(Pushed::Updated(row)) => {
                save_event(db, &row).await?;
                summary.updated += 1;
            }
            Ok(Pushed::Deleted(row)) => {
                save_event(db, &row).await?;
                summary.deleted += 1;
            }
            Err(err) => {
                tracing::error!(
                    "Failed to push {} for event {} in source {}: {:#}",
                    action,
                    event.id,
                    source.id,
                    err
                );
                save_event(db, &failed_row(&event, action, &err, now)).await?;
                summary.failed += 1;
            }
        }
    }

    if summary != PushSummary::default() {
        tracing::info!("Pushed source {}: {:?}", source.id, summary);
    }
    Ok(summary)
}
