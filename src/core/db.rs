use std::fs;
use std::path::Path;

use anyhow::Result;
use rusqlite::Connection as SqliteConnection;
use tokio_rusqlite::Connection;

const DB_FILE_NAME: &str = "kazador.sqlite";

/// Open the sync database stored inside `db_path`.
pub async fn async_db(db_path: &str) -> Result<Connection> {
    fs::create_dir_all(db_path)?;
    let file = Path::new(db_path).join(DB_FILE_NAME);
    let db = Connection::open(file).await?;
    db.call(|conn| {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    })
    .await?;
    Ok(db)
}

pub fn initialize_db(conn: &SqliteConnection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS oauth_accounts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL DEFAULT 'google',
            account_email TEXT NOT NULL,
            scopes TEXT NOT NULL DEFAULT '[]',
            access_token TEXT,
            refresh_token TEXT,
            expires_at TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            UNIQUE (user_id, provider, account_email)
        );

        CREATE TABLE IF NOT EXISTS user_calendar_sources (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            calendar_id TEXT NOT NULL,
            account_id TEXT NOT NULL REFERENCES oauth_accounts(id) ON DELETE CASCADE,
            summary TEXT,
            timezone TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            last_synced_at TEXT
        );

        CREATE TABLE IF NOT EXISTS calendar_events (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES user_calendar_sources(id) ON DELETE CASCADE,
            calendar_id TEXT NOT NULL,
            event_id TEXT,
            summary TEXT,
            description TEXT,
            location TEXT,
            status TEXT,
            start_at TEXT,
            start_timezone TEXT,
            end_at TEXT,
            end_timezone TEXT,
            is_all_day INTEGER NOT NULL DEFAULT 0,
            organizer TEXT,
            attendees TEXT NOT NULL DEFAULT '[]',
            raw TEXT,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            origin TEXT NOT NULL DEFAULT 'kazador',
            pending_action TEXT,
            etag TEXT,
            last_google_updated_at TEXT,
            last_kazador_updated_at TEXT,
            last_synced_at TEXT,
            sync_error TEXT,
            ignored INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE (source_id, event_id)
        );

        CREATE INDEX IF NOT EXISTS calendar_events_outstanding
            ON calendar_events (source_id, sync_status, pending_action);

        CREATE TABLE IF NOT EXISTS calendar_sync_states (
            source_id TEXT PRIMARY KEY REFERENCES user_calendar_sources(id) ON DELETE CASCADE,
            sync_token TEXT,
            last_polled_at TEXT,
            last_error TEXT
        );

        CREATE TABLE IF NOT EXISTS calendar_watch_channels (
            source_id TEXT PRIMARY KEY REFERENCES user_calendar_sources(id) ON DELETE CASCADE,
            resource_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            expiration_at TEXT NOT NULL,
            last_renewed_at TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        );
        ",
    )
}

/// Every statement in the schema is `IF NOT EXISTS` so migrating is
/// re-running it.
pub fn migrate_db(conn: &SqliteConnection) -> Result<(), rusqlite::Error> {
    initialize_db(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_initializes_and_migrates_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let db = async_db(dir.path().to_str().unwrap()).await.unwrap();
        let tables = db
            .call(|conn| {
                initialize_db(conn)?;
                migrate_db(conn)?;
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await
            .unwrap();

        assert_eq!(
            tables,
            vec![
                "calendar_events",
                "calendar_sync_states",
                "calendar_watch_channels",
                "oauth_accounts",
                "user_calendar_sources",
            ]
        );
    }
}
