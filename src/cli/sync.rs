use anyhow::Result;

use super::job::init_tracing;
use crate::core::AppConfig;
use crate::core::db::async_db;
use crate::sync::job::{GoogleConnector, SourceLocks, run_sync_for_source, run_sync_job};

/// Run calendar sync once and print the run summary as JSON.
pub async fn run(source_id: Option<String>) -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let db = async_db(&config.db_path).await?;
    let connector = GoogleConnector::new(config.clone());
    let locks = SourceLocks::default();
    let now = chrono::Utc::now();

    let summary = match source_id {
        Some(source_id) => run_sync_for_source(&db, &config, &connector, &locks, &source_id, now).await?,
        None => run_sync_job(&db, &config, &connector, &locks, now).await?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
