use std::env;

use anyhow::{Context, Result};

pub const DEFAULT_GOOGLE_API_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage_path: String,
    pub db_path: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_uri: String,
    pub google_api_url: String,
    pub google_token_url: String,
    /// Public base URL the provider can reach. `None` turns off watch
    /// channels and sync falls back to polling only.
    pub webhook_base_url: Option<String>,
    pub sync_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let storage_path = env::var("KAZADOR_STORAGE_PATH").unwrap_or("./".to_string());
        let db_path = format!("{}/db", storage_path);
        let google_client_id = env::var("KAZADOR_GOOGLE_CLIENT_ID")
            .context("Missing env var KAZADOR_GOOGLE_CLIENT_ID")?;
        let google_client_secret = env::var("KAZADOR_GOOGLE_CLIENT_SECRET")
            .context("Missing env var KAZADOR_GOOGLE_CLIENT_SECRET")?;
        let google_redirect_uri = env::var("KAZADOR_GOOGLE_REDIRECT_URI")
            .unwrap_or_else(|_| DEFAULT_REDIRECT_URI.to_string());
        let google_api_url = env::var("KAZADOR_GOOGLE_API_URL")
            .unwrap_or_else(|_| DEFAULT_GOOGLE_API_URL.to_string());
        let google_token_url = env::var("KAZADOR_GOOGLE_TOKEN_URL")
            .unwrap_or_else(|_| DEFAULT_GOOGLE_TOKEN_URL.to_string());
        let webhook_base_url = env::var("KAZADOR_WEBHOOK_BASE_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        let sync_interval_secs = match env::var("KAZADOR_SYNC_INTERVAL_SECS") {
            Ok(val) => val
                .parse()
                .context("KAZADOR_SYNC_INTERVAL_SECS must be a number of seconds")?,
            Err(_) => 15 * 60,
        };

        Ok(Self {
            storage_path,
            db_path,
            google_client_id,
            google_client_secret,
            google_redirect_uri,
            google_api_url,
            google_token_url,
            webhook_base_url,
            sync_interval_secs,
        })
    }

    /// Address the provider posts change notifications to.
    pub fn webhook_address(&self) -> Option<String> {
        self.webhook_base_url
            .as_ref()
            .map(|base| format!("{}/api/webhook/calendar", base))
    }
}
