use anyhow::{Context, Result, anyhow};
use std::io::{self, Write};

use crate::core::AppConfig;
use crate::core::db::async_db;
use crate::google::oauth::{CALENDAR_SCOPES, authorization_url, exchange_code_for_token};
use crate::sync::db::upsert_account;
use crate::sync::models::OAuthAccount;

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read from stdin")?;
    Ok(input.trim().to_owned())
}

/// Link a Google account for `user_id` by pasting the authorization code.
pub async fn run(user_id: String) -> Result<()> {
    let config = AppConfig::from_env()?;

    let account_email = prompt("Enter the email address you are authenticating: ")?;
    println!(
        "\nPlease open the following URL in your browser and authorize access:\n\n{}\n",
        authorization_url(&config.google_client_id, &config.google_redirect_uri)
    );
    let code = prompt("Paste the authorization code shown by Google here: ")?;

    let token = exchange_code_for_token(
        &config.google_token_url,
        &config.google_client_id,
        &config.google_client_secret,
        &code,
        &config.google_redirect_uri,
    )
    .await?;
    let refresh_token = token
        .refresh_token
        .clone()
        .ok_or(anyhow!("No refresh token in response"))?;
    // Google echoes the granted scopes, fall back to what was requested
    let scopes = match &token.scope {
        Some(scope) => scope.split_whitespace().map(String::from).collect(),
        None => CALENDAR_SCOPES.iter().map(|s| s.to_string()).collect(),
    };
    let now = chrono::Utc::now();

    let account = OAuthAccount {
        id: uuid::Uuid::new_v4().to_string(),
        user_id,
        account_email,
        scopes,
        access_token: Some(token.access_token),
        refresh_token: Some(refresh_token),
        expires_at: token
            .expires_in
            .map(|secs| now + chrono::Duration::seconds(secs)),
        metadata: serde_json::json!({ "connected_at": now.to_rfc3339() }),
    };
    if !account.has_scopes(&CALENDAR_SCOPES) {
        println!("Warning: the calendar scopes were not granted, sync will skip this account");
    }

    let db = async_db(&config.db_path).await?;
    let account_id = upsert_account(&db, &account).await?;
    println!("Account {} saved for {}", account_id, account.account_email);

    Ok(())
}
