use std::sync::Arc;

use tokio_rusqlite::Connection;

use crate::core::AppConfig;
use crate::sync::job::{CalendarConnector, GoogleConnector, SourceLocks};

pub struct AppState {
    pub db: Connection,
    pub config: AppConfig,
    // Builds the provider client for each source that gets synced
    pub connector: Arc<dyn CalendarConnector>,
    // Shared with the periodic job so runs for a source never overlap
    pub sync_locks: SourceLocks,
}

impl AppState {
    pub fn new(db: Connection, config: AppConfig) -> Self {
        let connector = Arc::new(GoogleConnector::new(config.clone()));
        Self::with_connector(db, config, connector)
    }

    pub fn with_connector(
        db: Connection,
        config: AppConfig,
        connector: Arc<dyn CalendarConnector>,
    ) -> Self {
        Self {
            db,
            config,
            connector,
            sync_locks: SourceLocks::default(),
        }
    }
}
