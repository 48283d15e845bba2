//! API routes module

pub mod calendar;
pub mod webhook;

use std::sync::{Arc, RwLock};

use crate::api::state::AppState;
use axum::Router;

type SharedState = Arc<RwLock<AppState>>;

/// Create the combined API router
pub fn router() -> Router<SharedState> {
    Router::new()
        // Calendar sync routes
        .nest("/calendar", calendar::router())
        // Provider push notifications
        .nest("/webhook", webhook::router())
}
