//! Conversions between local rows and provider event resources.
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::models::{CalendarEvent, CalendarSource, EventOrigin, EventTime, SyncStatus};
use crate::google::gcal::{EventDateTime, EventPayload, EventPerson, ProviderEvent};

fn to_provider_time(time: &EventTime, timezone: Option<&str>, all_day: bool) -> EventDateTime {
    match time {
        EventTime::DateTime(at) if !all_day => EventDateTime {
            date: None,
            date_time: Some(*at),
            time_zone: timezone.map(String::from),
        },
        _ => EventDateTime {
            date: Some(time.date()),
            ..Default::default()
        },
    }
}

fn from_provider_time(time: &EventDateTime) -> Option<EventTime> {
    match (time.date_time, time.date) {
        (Some(at), _) => Some(EventTime::DateTime(at)),
        (None, Some(date)) => Some(EventTime::Date(date)),
        (None, None) => None,
    }
}

/// Build the insert/patch body for a local row. Timed events fall back
/// to the source's timezone when the row has none.
pub fn to_event_payload(event: &CalendarEvent, source: &CalendarSource) -> Result<EventPayload> {
    let start = event
        .start
        .as_ref()
        .ok_or_else(|| anyhow!("Event {} has no start time", event.id))?;
    let end = event
        .end
        .as_ref()
        .ok_or_else(|| anyhow!("Event {} has no end time", event.id))?;
    let start_tz = event
        .start_timezone
        .as_deref()
        .or(source.timezone.as_deref());
    let end_tz = event
        .end_timezone
        .as_deref()
        .or(event.start_timezone.as_deref())
        .or(source.timezone.as_deref());
    let attendees: Vec<EventPerson> = serde_json::from_value(event.attendees.clone())
        .map_err(|e| anyhow!("Event {} has malformed attendees: {}", event.id, e))?;

    Ok(EventPayload {
        summary: event.summary.clone(),
        description: event.description.clone(),
        location: event.location.clone(),
        status: event.status.clone(),
        start: to_provider_time(start, start_tz, event.is_all_day),
        end: to_provider_time(end, end_tz, event.is_all_day),
        attendees,
    })
}

/// Row state after the provider accepted a create or update.
pub fn apply_push_response(
    event: &CalendarEvent,
    response: &ProviderEvent,
    now: DateTime<Utc>,
) -> CalendarEvent {
    let provider = response.event();
    CalendarEvent {
        event_id: Some(provider.id.clone()),
        etag: provider.etag.clone().or_else(|| event.etag.clone()),
        last_google_updated_at: provider.changed_at().or(event.last_google_updated_at),
        raw: Some(response.raw().clone()),
        sync_status: SyncStatus::Synced,
        pending_action: None,
        sync_error: None,
        last_synced_at: Some(now),
        ..event.clone()
    }
}

/// Merge a provider event into the local row it maps to, or build a new
/// row for it. Origin and the local edit stamp of an existing row are
/// kept as they are.
pub fn apply_provider_event(
    existing: Option<&CalendarEvent>,
    source: &CalendarSource,
    provider_event: &ProviderEvent,
    now: DateTime<Utc>,
) -> CalendarEvent {
    let provider = provider_event.event();
    let cancelled = provider.is_cancelled();

    let (id, origin, last_kazador_updated_at) = match existing {
        Some(row) => (row.id.clone(), row.origin, row.last_kazador_updated_at),
        None => (uuid::Uuid::new_v4().to_string(), EventOrigin::Google, None),
    };
    let start = provider.start.as_ref();
    let end = provider.end.as_ref();
    let organizer = provider
        .organizer
        .as_ref()
        .and_then(|person| serde_json::to_value(person).ok());
    let attendees = serde_json::to_value(&provider.attendees).unwrap_or(Value::Array(vec![]));

    // Cancelled resources from an incremental listing usually carry
    // nothing but the id and status, keep what we already know.
    let kept = if cancelled { existing } else { None };

    CalendarEvent {
        id,
        source_id: source.id.clone(),
        calendar_id: source.calendar_id.clone(),
        event_id: Some(provider.id.clone()),
        summary: provider
            .summary
            .clone()
            .or_else(|| kept.and_then(|e| e.summary.clone())),
        description: provider
            .description
            .clone()
            .or_else(|| kept.and_then(|e| e.description.clone())),
        location: provider
            .location
            .clone()
            .or_else(|| kept.and_then(|e| e.location.clone())),
        status: provider.status.clone(),
        start: start
            .and_then(from_provider_time)
            .or_else(|| kept.and_then(|e| e.start)),
        start_timezone: start
            .and_then(|t| t.time_zone.clone())
            .or_else(|| kept.and_then(|e| e.start_timezone.clone())),
        end: end
            .and_then(from_provider_time)
            .or_else(|| kept.and_then(|e| e.end)),
        end_timezone: end
            .and_then(|t| t.time_zone.clone())
            .or_else(|| kept.and_then(|e| e.end_timezone.clone())),
        is_all_day: match start {
            Some(time) => time.date.is_some() && time.date_time.is_none(),
            None => kept.is_some_and(|e| e.is_all_day),
        },
        organizer: organizer.or_else(|| kept.and_then(|e| e.organizer.clone())),
        attendees,
        raw: Some(provider_event.raw().clone()),
        sync_status: if cancelled {
            SyncStatus::Deleted
        } else {
            SyncStatus::Synced
        },
        origin,
        pending_action: None,
        etag: provider
            .etag
            .clone()
            .or_else(|| existing.and_then(|e| e.etag.clone())),
        last_google_updated_at: provider
            .changed_at()
            .or_else(|| existing.and_then(|e| e.last_google_updated_at)),
        last_kazador_updated_at,
        last_synced_at: Some(now),
        sync_error: None,
        ignored: cancelled,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::sync::models::PendingAction;

    fn source() -> CalendarSource {
        CalendarSource {
            id: "src-1".to_string(),
            user_id: "user-1".to_string(),
            calendar_id: "primary".to_string(),
            account_id: "acct-1".to_string(),
            summary: None,
            timezone: Some("Europe/London".to_string()),
            metadata: json!({}),
            last_synced_at: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn it_builds_timed_payload_with_source_timezone() {
        let mut event = CalendarEvent::new_local(&source(), now());
        event.summary = Some("Headline set".to_string());
        event.start = Some("2025-03-01T20:00:00Z".parse().unwrap());
        event.end = Some("2025-03-01T22:00:00Z".parse().unwrap());
        event.attendees = json!([{"email": "tm@example.com"}]);

        let payload = to_event_payload(&event, &source()).unwrap();
        assert_eq!(payload.summary.as_deref(), Some("Headline set"));
        assert!(payload.start.date.is_none());
        assert_eq!(payload.start.time_zone.as_deref(), Some("Europe/London"));
        assert_eq!(payload.end.time_zone.as_deref(), Some("Europe/London"));
        assert_eq!(payload.attendees[0].email.as_deref(), Some("tm@example.com"));
    }

    #[test]
    fn it_builds_all_day_payload() {
        let mut event = CalendarEvent::new_local(&source(), now());
        event.start = Some("2025-03-01T00:00:00Z".parse().unwrap());
        event.end = Some("2025-03-02".parse().unwrap());
        event.is_all_day = true;

        let payload = to_event_payload(&event, &source()).unwrap();
        assert_eq!(payload.start.date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(payload.end.date, NaiveDate::from_ymd_opt(2025, 3, 2));
        assert!(payload.start.date_time.is_none());
        assert!(payload.start.time_zone.is_none());
    }

    #[test]
    fn it_requires_start_and_end() {
        let event = CalendarEvent::new_local(&source(), now());
        let err = to_event_payload(&event, &source()).unwrap_err();
        assert!(err.to_string().contains("no start time"));
    }

    #[test]
    fn it_creates_google_origin_row_from_provider_event() {
        let provider = ProviderEvent::from_value(json!({
            "kind": "calendar#event",
            "id": "evt_new",
            "etag": "\"e1\"",
            "status": "confirmed",
            "summary": "Load in",
            "start": {"date": "2025-03-03"},
            "end": {"date": "2025-03-04"},
            "updated": "2025-02-28T10:00:00Z"
        }))
        .unwrap();

        let row = apply_provider_event(None, &source(), &provider, now());
        assert_eq!(row.event_id.as_deref(), Some("evt_new"));
        assert_eq!(row.origin, EventOrigin::Google);
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert!(row.is_all_day);
        assert_eq!(row.start, Some(EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 3).unwrap())));
        assert_eq!(
            row.last_google_updated_at,
            Some(Utc.with_ymd_and_hms(2025, 2, 28, 10, 0, 0).unwrap())
        );
        assert_eq!(row.last_kazador_updated_at, None);
        assert_eq!(row.last_synced_at, Some(now()));
        assert!(!row.ignored);
    }

    #[test]
    fn it_marks_cancelled_events_deleted_and_keeps_local_fields() {
        let mut existing = CalendarEvent::new_local(&source(), now());
        existing.event_id = Some("evt_abc".to_string());
        existing.summary = Some("Show".to_string());
        existing.start = Some("2025-03-01T20:00:00Z".parse().unwrap());
        existing.sync_status = SyncStatus::Synced;
        existing.pending_action = None;

        let provider = ProviderEvent::from_value(json!({
            "id": "evt_abc",
            "status": "cancelled"
        }))
        .unwrap();

        let row = apply_provider_event(Some(&existing), &source(), &provider, now());
        assert_eq!(row.id, existing.id);
        assert_eq!(row.origin, EventOrigin::Kazador);
        assert_eq!(row.sync_status, SyncStatus::Deleted);
        assert!(row.ignored);
        assert_eq!(row.summary.as_deref(), Some("Show"));
        assert_eq!(row.start, existing.start);
        assert_eq!(row.last_kazador_updated_at, existing.last_kazador_updated_at);
    }

    #[test]
    fn it_records_push_response() {
        let mut event = CalendarEvent::new_local(&source(), now());
        event.sync_error = Some("previous failure".to_string());
        event.pending_action = Some(PendingAction::Create);
        let response = ProviderEvent::from_value(json!({
            "id": "evt_abc",
            "etag": "\"e2\"",
            "updated": "2025-03-01T09:00:01Z"
        }))
        .unwrap();

        let row = apply_push_response(&event, &response, now());
        assert_eq!(row.event_id.as_deref(), Some("evt_abc"));
        assert_eq!(row.etag.as_deref(), Some("\"e2\""));
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert_eq!(row.pending_action, None);
        assert_eq!(row.sync_error, None);
        assert_eq!(row.origin, EventOrigin::Kazador);
        assert_eq!(row.last_kazador_updated_at, Some(now()));
    }
}
