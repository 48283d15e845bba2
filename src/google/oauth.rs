//! OAuth2 token exchange against Google's token endpoint
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Scopes an account must have been granted to be usable for sync.
pub const CALENDAR_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/calendar.events",
];

/// A hung token endpoint fails the account being synced, not the run.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

fn token_client(timeout: Duration) -> Result<Client, Error> {
    Ok(Client::builder().timeout(timeout).build()?)
}

async fn request_token(
    client: &Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<OAuthToken, Error> {
    let res = client.post(token_url).form(form).send().await?;
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    if !status.is_success() {
        // `invalid_grant` means the refresh token was revoked or expired
        // and the user has to reconnect the account.
        if let Ok(err) = serde_json::from_str::<OAuthErrorResponse>(&text) {
            return Err(anyhow!(
                "Token request failed: {} ({}: {})",
                status,
                err.error,
                err.error_description.unwrap_or_default()
            ));
        }
        return Err(anyhow!("Token request failed: {} ({})", status, text));
    }
    let token: OAuthToken = serde_json::from_str(&text)?;
    Ok(token)
}

/// Exchange a refresh token for a new access token.
pub async fn refresh_access_token(
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<OAuthToken, Error> {
    request_token(
        &token_client(TOKEN_REQUEST_TIMEOUT)?,
        token_url,
        &[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ],
    )
    .await
}

/// Exchange the authorization code pasted by the user for tokens.
pub async fn exchange_code_for_token(
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<OAuthToken, Error> {
    request_token(
        &token_client(TOKEN_REQUEST_TIMEOUT)?,
        token_url,
        &[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ],
    )
    .await
}

pub fn authorization_url(client_id: &str, redirect_uri: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        AUTH_URL,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&CALENDAR_SCOPES.join(" "))
    )
}
