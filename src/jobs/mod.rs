//! Background jobs run on a fixed interval by the server.
use std::time::Duration;

use async_trait::async_trait;
use tokio_rusqlite::Connection;

use crate::core::AppConfig;

mod calendar_sync;

pub use calendar_sync::CalendarSync;

#[async_trait]
pub trait PeriodicJob: Send + Sync + std::fmt::Debug {
    fn interval(&self) -> Duration;

    async fn run_job(&self, config: &AppConfig, db: &Connection);
}

/// Run `job` in its own task, once at startup and then every interval.
pub fn spawn_periodic_job<J>(config: AppConfig, db: Connection, job: J)
where
    J: PeriodicJob + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(job.interval());
        loop {
            interval.tick().await;
            tracing::debug!("Running periodic job: {:?}", job);
            job.run_job(&config, &db).await;
        }
    });
}
