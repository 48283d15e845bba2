//! Router for the webhook API

use std::sync::{Arc, RwLock};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use super::public::{
    CHANNEL_ID_HEADER, CHANNEL_TOKEN_HEADER, CalendarNotificationAccepted, RESOURCE_STATE_HEADER,
};
use crate::api::public::ApiError;
use crate::api::state::AppState;
use crate::sync::db::find_linked_source;
use crate::sync::job::run_sync_for_source;
use crate::sync::watch::ChannelToken;

type SharedState = Arc<RwLock<AppState>>;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Handle change notifications from a calendar watch channel by
/// syncing the source in the background
async fn calendar_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resource_state = header(&headers, RESOURCE_STATE_HEADER);
    tracing::debug!(
        "Calendar notification on channel {:?}: {:?}",
        header(&headers, CHANNEL_ID_HEADER),
        resource_state
    );
    if resource_state == Some("sync") {
        return Ok(StatusCode::OK.into_response());
    }

    let Some(token) = header(&headers, CHANNEL_TOKEN_HEADER).and_then(ChannelToken::decode)
    else {
        return Ok((StatusCode::BAD_REQUEST, "Missing or invalid channel token").into_response());
    };

    let (db, config, connector, locks) = {
        let shared_state = state.read().expect("Unable to read share state");
        (
            shared_state.db.clone(),
            shared_state.config.clone(),
            Arc::clone(&shared_state.connector),
            shared_state.sync_locks.clone(),
        )
    };

    let known = find_linked_source(&db, &token.source_id)
        .await?
        .is_some_and(|linked| linked.source.user_id == token.user_id);
    if !known {
        return Ok((
            StatusCode::NOT_FOUND,
            format!("Calendar source {} not found", token.source_id),
        )
            .into_response());
    }

    let source_id = token.source_id.clone();
    tokio::spawn(async move {
        let now = chrono::Utc::now();
        match run_sync_for_source(&db, &config, connector.as_ref(), &locks, &source_id, now).await {
            Ok(summary) => {
                for err in summary.errors {
                    tracing::warn!("Source {} failed to sync: {}", err.source_id, err.message);
                }
            }
            Err(e) => tracing::error!("Notification sync failed for {}: {:#}", source_id, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CalendarNotificationAccepted {
            source_id: token.source_id,
        }),
    )
        .into_response())
}

/// Create the webhook router
pub fn router() -> Router<SharedState> {
    Router::new().route("/calendar", axum::routing::post(calendar_webhook))
}
