// src/ingest/http.rs
//! Shared HTTP plumbing for provider adapters: bounded timeout, bounded retry.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use crate::error::ProviderError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u8,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempt is 1-based).
    pub fn backoff_for(&self, attempt: u8) -> Duration {
        let shift = u32::from(attempt.saturating_sub(1)).min(16);
        self.base_backoff.saturating_mul(1u32 << shift)
    }
}

pub fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(format!("deal-ingest/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Config(format!("http client: {e}")))
}

fn classify(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout.as_secs())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turns a non-2xx response into [`ProviderError::Http`], keeping a short body excerpt.
pub async fn ensure_success(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        body: body.chars().take(300).collect(),
    })
}

/// Sends the request built by `make`, retrying transient failures with
/// exponential backoff. `make` is called once per attempt.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    label: &str,
    make: F,
) -> Result<Response, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let res = match make().timeout(policy.timeout).send().await {
            Ok(resp) => ensure_success(resp).await,
            Err(e) => Err(classify(e, policy.timeout)),
        };

        match res {
            Ok(resp) => return Ok(resp),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_for(attempt);
                tracing::debug!(
                    request = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying provider request"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reads a JSON body, mapping failures to [`ProviderError::Decode`].
pub async fn read_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, ProviderError> {
    resp.json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = RetryPolicy {
            base_backoff: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(400));
    }
}
