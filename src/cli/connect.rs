use anyhow::{Result, anyhow};
use rusqlite::OptionalExtension;

use crate::core::AppConfig;
use crate::core::db::async_db;
use crate::sync::db::insert_source;
use crate::sync::models::CalendarSource;

/// Register a calendar of a linked account as a sync source.
pub async fn run(account_id: String, calendar_id: String, timezone: Option<String>) -> Result<()> {
    let config = AppConfig::from_env()?;
    let db = async_db(&config.db_path).await?;

    let lookup_id = account_id.clone();
    let user_id: Option<String> = db
        .call(move |conn| {
            let user_id = conn
                .query_row(
                    "SELECT user_id FROM oauth_accounts WHERE id = ?1",
                    [&lookup_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(user_id)
        })
        .await?;
    let user_id = user_id.ok_or_else(|| anyhow!("Account {} not found", account_id))?;

    let source = CalendarSource {
        id: uuid::Uuid::new_v4().to_string(),
        user_id,
        calendar_id,
        account_id,
        summary: None,
        timezone,
        metadata: serde_json::json!({}),
        last_synced_at: None,
    };
    insert_source(&db, &source).await?;
    println!("Calendar source {} created for {}", source.id, source.calendar_id);

    Ok(())
}
