//! Keeps one push notification channel alive per source.
use anyhow::{Context, Error, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_rusqlite::Connection;

use super::db::{delete_watch_channel, get_watch_channel, save_watch_channel};
use super::models::{CalendarSource, WatchChannel};
use crate::google::gcal::{CalendarApi, WatchParams, WatchRequest};

/// Channels expiring within this window are replaced.
pub const RENEWAL_BUFFER_HOURS: i64 = 6;
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Attribution carried by every notification the provider sends for a
/// channel, so the receiver knows which source changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelToken {
    pub source_id: String,
    pub user_id: String,
}

impl ChannelToken {
    pub fn encode(&self) -> String {
        // Serializing two strings cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// No webhook address is configured.
    Disabled,
    /// The existing channel is good for longer than the renewal buffer.
    Current,
    Created(WatchChannel),
}

pub fn needs_renewal(channel: &WatchChannel, now: DateTime<Utc>) -> bool {
    channel.expiration_at - Duration::hours(RENEWAL_BUFFER_HOURS) <= now
}

pub async fn ensure_watch_channel(
    db: &Connection,
    api: &dyn CalendarApi,
    source: &CalendarSource,
    webhook_address: Option<&str>,
    now: DateTime<Utc>,
) -> Result<WatchOutcome, Error> {
    let Some(address) = webhook_address else {
        return Ok(WatchOutcome::Disabled);
    };

    if let Some(existing) = get_watch_channel(db, &source.id).await? {
        if !needs_renewal(&existing, now) {
            return Ok(WatchOutcome::Current);
        }
        if let Err(err) = api
            .stop_channel(&existing.channel_id, &existing.resource_id)
            .await
        {
            // An orphaned channel expires on its own
            tracing::warn!(
                "Failed to stop channel {} for source {}: {}",
                existing.channel_id,
                source.id,
                err
            );
        }
        delete_watch_channel(db, &source.id).await?;
    }

    let request = WatchRequest {
        id: uuid::Uuid::new_v4().to_string(),
        channel_type: "web_hook".to_string(),
        address: address.to_string(),
        token: ChannelToken {
            source_id: source.id.clone(),
            user_id: source.user_id.clone(),
        }
        .encode(),
        params: WatchParams {
            ttl: (DEFAULT_TTL_HOURS * 60 * 60).to_string(),
        },
    };
    let response = api
        .watch_events(&source.calendar_id, &request)
        .await
        .with_context(|| format!("Failed to create watch channel for source {}", source.id))?;

    let channel = WatchChannel {
        source_id: source.id.clone(),
        resource_id: response.resource_id.clone(),
        channel_id: response.id.clone(),
        expiration_at: response
            .expiration_at()
            .unwrap_or(now + Duration::hours(DEFAULT_TTL_HOURS)),
        last_renewed_at: now,
        metadata: json!({ "resource_uri": response.resource_uri }),
    };
    save_watch_channel(db, &channel).await?;
    tracing::info!(
        "Watching source {} on channel {} until {}",
        source.id,
        channel.channel_id,
        channel.expiration_at
    );

    Ok(WatchOutcome::Created(channel))
}
