use anyhow::Result;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::AppConfig;
use crate::core::db::async_db;
use crate::jobs::{CalendarSync, PeriodicJob};
use crate::sync::job::SourceLocks;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum JobId {
    CalendarSync,
}

pub(crate) fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run(id: JobId) -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let db = async_db(&config.db_path).await?;

    let job: Box<dyn PeriodicJob> = match id {
        JobId::CalendarSync => Box::new(CalendarSync::new(&config, SourceLocks::default())),
    };

    println!("Running job: {:?}", id);
    job.run_job(&config, &db).await;
    println!("Job completed");

    Ok(())
}
