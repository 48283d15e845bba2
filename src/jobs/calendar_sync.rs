use async_trait::async_trait;
use std::time::Duration;
use tokio_rusqlite::Connection;

use super::PeriodicJob;
use crate::core::AppConfig;
use crate::sync::job::{GoogleConnector, SourceLocks, run_sync_job};

#[derive(Debug)]
pub struct CalendarSync {
    interval_secs: u64,
    locks: SourceLocks,
}

impl CalendarSync {
    pub fn new(config: &AppConfig, locks: SourceLocks) -> Self {
        Self {
            interval_secs: config.sync_interval_secs,
            locks,
        }
    }
}

#[async_trait]
impl PeriodicJob for CalendarSync {
    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    async fn run_job(&self, config: &AppConfig, db: &Connection) {
        let connector = GoogleConnector::new(config.clone());
        match run_sync_job(db, config, &connector, &self.locks, chrono::Utc::now()).await {
            Ok(summary) => {
                for err in &summary.errors {
                    tracing::warn!("Source {} failed to sync: {}", err.source_id, err.message);
                }
            }
            Err(e) => tracing::error!("Calendar sync job failed: {}", e),
        }
    }
}
