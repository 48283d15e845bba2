//! Runs push, pull and watch maintenance for every calendar source.
//!
//! Sources are processed one after another. A failure in any stage of a
//! source is recorded in the run summary and the run moves on to the
//! next source.
//!
//! Only one run touches a source at a time. Every entry point (the
//! periodic job, the webhook and the manual sync endpoint) shares a
//! [`SourceLocks`] and overlapping runs for a source wait their turn.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_rusqlite::Connection;

use super::db::{find_linked_source, find_linked_sources};
use super::models::{LinkedSource, OAuthAccount};
use super::pull::{PullSummary, pull_source};
use super::push::{PushSummary, push_source};
use super::token::authorize_account;
use super::watch::ensure_watch_channel;
use crate::core::AppConfig;
use crate::google::gcal::{CalendarApi, GoogleCalendarClient};

/// Produces an authenticated provider client for an account.
#[async_trait]
pub trait CalendarConnector: Send + Sync {
    async fn connect(
        &self,
        db: &Connection,
        account: &OAuthAccount,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn CalendarApi>, Error>;
}

pub struct GoogleConnector {
    config: AppConfig,
}

impl GoogleConnector {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CalendarConnector for GoogleConnector {
    async fn connect(
        &self,
        db: &Connection,
        account: &OAuthAccount,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn CalendarApi>, Error> {
        let authorized = authorize_account(db, &self.config, account, now).await?;
        let client = GoogleCalendarClient::new(&self.config.google_api_url, &authorized.access_token)?;
        Ok(Box::new(client))
    }
}

/// One lock per calendar source, held for the whole push, pull and
/// watch cycle of that source.
#[derive(Debug, Clone, Default)]
pub struct SourceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SourceLocks {
    pub async fn acquire(&self, source_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(source_id.to_string()).or_default())
        };
        match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Source {} is already syncing, waiting for it", source_id);
                lock.lock_owned().await
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source_id: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunSummary {
    pub sources_processed: usize,
    pub pushed_created: usize,
    pub pushed_updated: usize,
    pub pushed_deleted: usize,
    pub pushed_failed: usize,
    pub pulled_inserted: usize,
    pub pulled_updated: usize,
    pub pulled_deleted: usize,
    pub conflicts_skipped: usize,
    pub errors: Vec<SourceError>,
}

impl SyncRunSummary {
    fn add_push(&mut self, push: PushSummary) {
        self.pushed_created += push.created;
        self.pushed_updated += push.updated;
        self.pushed_deleted += push.deleted;
        self.pushed_failed += push.failed;
    }

    fn add_pull(&mut self, pull: PullSummary) {
        self.pulled_inserted += pull.inserted;
        self.pulled_updated += pull.updated;
        self.pulled_deleted += pull.deleted;
        self.conflicts_skipped += pull.conflicts_skipped;
    }
}

async fn sync_source(
    db: &Connection,
    config: &AppConfig,
    connector: &dyn CalendarConnector,
    source_id: &str,
    now: DateTime<Utc>,
    summary: &mut SyncRunSummary,
) -> Result<(), Error> {
    // Read again under the lock, a previous run may have refreshed the
    // account's tokens
    let LinkedSource { source, account } = find_linked_source(db, source_id)
        .await?
        .ok_or_else(|| anyhow!("Calendar source {} was removed", source_id))?;

    let api = connector
        .connect(db, &account, now)
        .await
        .context("Failed to authorize account")?;

    let pushed = push_source(db, api.as_ref(), &source, now)
        .await
        .context("Push failed")?;
    summary.add_push(pushed);

    let pulled = pull_source(db, api.as_ref(), &source, now)
        .await
        .context("Pull failed")?;
    summary.add_pull(pulled);

    let webhook_address = config.webhook_address();
    ensure_watch_channel(db, api.as_ref(), &source, webhook_address.as_deref(), now)
        .await
        .context("Watch channel maintenance failed")?;

    Ok(())
}

async fn sync_sources(
    db: &Connection,
    config: &AppConfig,
    connector: &dyn CalendarConnector,
    locks: &SourceLocks,
    source_ids: Vec<String>,
    now: DateTime<Utc>,
) -> SyncRunSummary {
    let mut summary = SyncRunSummary::default();

    for source_id in source_ids {
        summary.sources_processed += 1;
        let _guard = locks.acquire(&source_id).await;
        if let Err(err) = sync_source(db, config, connector, &source_id, now, &mut summary).await {
            tracing::error!("Sync failed for source {}: {:#}", source_id, err);
            summary.errors.push(SourceError {
                source_id,
                message: format!("{:#}", err),
            });
        }
    }

    summary
}

/// Sync every calendar source.
pub async fn run_sync_job(
    db: &Connection,
    config: &AppConfig,
    connector: &dyn CalendarConnector,
    locks: &SourceLocks,
    now: DateTime<Utc>,
) -> Result<SyncRunSummary, Error> {
    let source_ids: Vec<String> = find_linked_sources(db)
        .await?
        .into_iter()
        .map(|linked| linked.source.id)
        .collect();
    tracing::info!("Syncing {} calendar source(s)", source_ids.len());
    let summary = sync_sources(db, config, connector, locks, source_ids, now).await;
    tracing::info!(
        "Calendar sync finished: {} source(s), {} error(s)",
        summary.sources_processed,
        summary.errors.len()
    );
    Ok(summary)
}

/// Sync a single source, used when the provider notifies us about it.
pub async fn run_sync_for_source(
    db: &Connection,
    config: &AppConfig,
    connector: &dyn CalendarConnector,
    locks: &SourceLocks,
    source_id: &str,
    now: DateTime<Utc>,
) -> Result<SyncRunSummary, Error> {
    if find_linked_source(db, source_id).await?.is_none() {
        return Err(anyhow!("Calendar source {} not found", source_id));
    }
    let source_ids = vec![source_id.to_string()];
    Ok(sync_sources(db, config, connector, locks, source_ids, now).await)
}
