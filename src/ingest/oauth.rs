// src/ingest/oauth.rs
use reqwest::Client;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::ingest::http::{send_with_retry, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// OAuth2 client-credentials grant. Every failure is reported as
/// [`ProviderError::Auth`] so callers can tell it apart from data-endpoint errors.
pub async fn client_credentials_token(
    client: &Client,
    policy: &RetryPolicy,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<AccessToken, ProviderError> {
    if client_id.is_empty() || client_secret.is_empty() {
        return Err(ProviderError::Auth("missing client credentials".into()));
    }

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    let resp = send_with_retry(policy, "oauth token", || client.post(token_url).form(&form))
        .await
        .map_err(|e| ProviderError::Auth(e.to_string()))?;

    let token: AccessToken = resp
        .json()
        .await
        .map_err(|e| ProviderError::Auth(format!("token response: {e}")))?;
    if token.access_token.trim().is_empty() {
        return Err(ProviderError::Auth("empty access_token".into()));
    }
    Ok(token)
}
