//! Router for the calendar API

use std::sync::{Arc, RwLock};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use super::public;
use crate::api::public::ApiError;
use crate::api::state::AppState;
use crate::sync::db::find_linked_source;
use crate::sync::job::{run_sync_for_source, run_sync_job};

type SharedState = Arc<RwLock<AppState>>;

/// Run calendar sync now and respond with the run summary
async fn sync_handler(
    State(state): State<SharedState>,
    Query(params): Query<public::SyncQuery>,
) -> Result<Response, ApiError> {
    let (db, config, connector, locks) = {
        let shared_state = state.read().expect("Unable to read share state");
        (
            shared_state.db.clone(),
            shared_state.config.clone(),
            Arc::clone(&shared_state.connector),
            shared_state.sync_locks.clone(),
        )
    };
    let now = chrono::Utc::now();

    let summary = match params.source_id {
        Some(source_id) => {
            if find_linked_source(&db, &source_id).await?.is_none() {
                return Ok((
                    StatusCode::NOT_FOUND,
                    format!("Calendar source {} not found", source_id),
                )
                    .into_response());
            }
            run_sync_for_source(&db, &config, connector.as_ref(), &locks, &source_id, now).await?
        }
        None => run_sync_job(&db, &config, connector.as_ref(), &locks, now).await?,
    };

    Ok(Json::<public::SyncRunSummary>(summary).into_response())
}

/// Create the calendar router
pub fn router() -> Router<SharedState> {
    Router::new().route("/sync", axum::routing::post(sync_handler))
}
