//! Keeps an account's access token usable, refreshing it shortly before
//! it expires and persisting whatever the token endpoint hands back.
use anyhow::{Context, Error, Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tokio_rusqlite::Connection;

use super::db::update_account_tokens;
use super::models::OAuthAccount;
use crate::core::AppConfig;
use crate::google::oauth::{CALENDAR_SCOPES, refresh_access_token};

/// Tokens expiring within this window are treated as expired.
pub const EXPIRY_SKEW_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct AuthorizedAccount {
    pub account: OAuthAccount,
    pub access_token: String,
    pub refreshed: bool,
}

pub fn needs_refresh(account: &OAuthAccount, now: DateTime<Utc>) -> bool {
    match (&account.access_token, account.expires_at) {
        (Some(_), Some(expires_at)) => expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= now,
        _ => true,
    }
}

/// Return a valid access token for the account, refreshing and storing
/// it first if needed.
pub async fn authorize_account(
    db: &Connection,
    config: &AppConfig,
    account: &OAuthAccount,
    now: DateTime<Utc>,
) -> Result<AuthorizedAccount, Error> {
    if !account.has_scopes(&CALENDAR_SCOPES) {
        bail!(
            "Account {} ({}) was not granted the calendar scopes, reconnect it",
            account.id,
            account.account_email
        );
    }

    if !needs_refresh(account, now) {
        if let Some(access_token) = account.access_token.clone() {
            return Ok(AuthorizedAccount {
                account: account.clone(),
                access_token,
                refreshed: false,
            });
        }
    }

    let refresh_token = account
        .refresh_token
        .as_deref()
        .ok_or_else(|| anyhow!("Account {} has no refresh token", account.id))?;

    tracing::debug!("Refreshing access token for account {}", account.id);
    let token = refresh_access_token(
        &config.google_token_url,
        &config.google_client_id,
        &config.google_client_secret,
        refresh_token,
    )
    .await
    .with_context(|| format!("Failed to refresh token for account {}", account.id))?;

    let mut updated = account.clone();
    updated.access_token = Some(token.access_token.clone());
    updated.expires_at = Some(
        now + Duration::seconds(token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)),
    );
    // Google only returns a refresh token when it rotates it.
    if let Some(refresh_token) = token.refresh_token {
        updated.refresh_token = Some(refresh_token);
    }
    let refreshed_at = Value::String(now.to_rfc3339());
    match updated.metadata.as_object_mut() {
        Some(metadata) => {
            metadata.insert("token_refreshed_at".to_string(), refreshed_at);
        }
        None => updated.metadata = json!({ "token_refreshed_at": refreshed_at }),
    }

    update_account_tokens(db, &updated).await?;

    Ok(AuthorizedAccount {
        access_token: token.access_token,
        account: updated,
        refreshed: true,
    })
}
