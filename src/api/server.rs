use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::routes;
use crate::api::state::AppState;
use crate::core::{AppConfig, db::async_db};
use crate::jobs::{CalendarSync, spawn_periodic_job};

pub fn app(shared_state: Arc<RwLock<AppState>>) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        // API routes
        .nest("/api", routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::clone(&shared_state))
}

// Run the server
pub async fn serve(host: String, port: String, config: AppConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // axum logs rejections from built-in extractors with the `axum::rejection`
                // target, at `TRACE` level. `axum::rejection=trace` enables showing those events
                format! {
                    "{}=debug,tower_http=debug,axum::rejection=trace",
                    env!("CARGO_CRATE_NAME")
                }
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = async_db(&config.db_path)
        .await
        .context("Failed to connect to async db")?;

    let app_state = AppState::new(db.clone(), config.clone());
    let sync_locks = app_state.sync_locks.clone();
    let shared_state = Arc::new(RwLock::new(app_state));
    let app = app(Arc::clone(&shared_state));

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;

    tracing::debug!("Server started. Listening on {}", listener.local_addr()?);

    match config.webhook_address() {
        Some(address) => tracing::info!("Calendar notifications will be sent to {}", address),
        None => tracing::info!("No webhook base url configured, calendar sync will only poll"),
    }

    // Calendar sync runs in its own tokio task on an interval
    let job = CalendarSync::new(&config, sync_locks);
    spawn_periodic_job(config, db, job);

    axum::serve(listener, app).await?;
    Ok(())
}
