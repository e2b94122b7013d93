//! Shared JSON-over-HTTP helpers for the provider and index clients.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited), 5xx and connection errors → retry
//! - timeouts → retry
//! - any other 4xx → fail immediately
//! - backoff: `base`, `2×base`, `4×base` … capped at `2^5 × base`

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{ChatError, ChatResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::from_secs(1),
        }
    }

    pub fn none() -> Self {
        Self::new(0)
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base * (1u32 << (attempt - 1).min(5))
    }
}

/// Build a `reqwest` client with a per-request timeout.
pub fn build_client(timeout: Duration) -> ChatResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ChatError::from)
}

/// Send a request built by `make_request`, retrying transient failures,
/// and decode a successful body as `T`.
pub async fn send_json<T, F>(policy: RetryPolicy, make_request: F) -> ChatResult<T>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_with_retry(policy, make_request).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ChatError::Provider {
        status: 200,
        message: format!("invalid response body: {}", e),
    })
}

/// Send with retry and return the raw successful response (used for streaming).
pub async fn send_with_retry<F>(policy: RetryPolicy, make_request: F) -> ChatResult<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay(attempt)).await;
        }

        let err = match make_request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let body_text = response.text().await.unwrap_or_default();
                ChatError::from_status(status.as_u16(), body_text)
            }
            Err(e) => ChatError::from(e),
        };

        if !err.is_retryable() {
            return Err(err);
        }
        tracing::debug!(attempt, error = %err, "retrying provider request");
        last_err = Some(err);
    }

    Err(last_err.unwrap_or(ChatError::Provider {
        status: 0,
        message: "request failed after retries".to_string(),
    }))
}
