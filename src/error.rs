//! Typed error taxonomy for the chat pipeline.
//!
//! Provider and index clients return [`ChatError`] so that callers can tell a
//! rate limit from a timeout from a bad API key without string matching.
//! Command-level code wraps these in `anyhow` with context.

use thiserror::Error;

/// Pipeline stage an error was raised in, used when logging failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embed,
    Retrieve,
    Generate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Embed => "embed",
            Stage::Retrieve => "retrieve",
            Stage::Generate => "generate",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log a failed stage. Shared by every caller that degrades to the fallback.
pub fn log_stage_failure(stage: Stage, err: &ChatError) {
    tracing::error!(stage = %stage, error = %err, "chat pipeline stage failed");
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or invalid settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider request timed out")]
    ProviderTimeout,

    #[error("provider rate limit exceeded")]
    ProviderRateLimited,

    #[error("provider rejected credentials: {0}")]
    ProviderAuth(String),

    #[error("vector index not found: {0}")]
    IndexNotFound(String),

    /// A streamed chunk that could not be decoded. Recovered locally.
    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),

    #[error("message must not be empty")]
    EmptyInput,

    /// Any other non-success provider or index response.
    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Map a non-success HTTP status and body to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ChatError::ProviderAuth(body),
            408 | 504 => ChatError::ProviderTimeout,
            429 => ChatError::ProviderRateLimited,
            _ => ChatError::Provider {
                status,
                message: body,
            },
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::ProviderTimeout | ChatError::ProviderRateLimited => true,
            ChatError::Provider { status, .. } => *status >= 500 || *status == 0,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::ProviderTimeout
        } else if let Some(status) = e.status() {
            ChatError::from_status(status.as_u16(), e.to_string())
        } else {
            // Connection-level failure; status 0 marks it retryable.
            ChatError::Provider {
                status: 0,
                message: e.to_string(),
            }
        }
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ChatError::from_status(401, "bad key".into()),
            ChatError::ProviderAuth(_)
        ));
        assert!(matches!(
            ChatError::from_status(429, String::new()),
            ChatError::ProviderRateLimited
        ));
        assert!(matches!(
            ChatError::from_status(504, String::new()),
            ChatError::ProviderTimeout
        ));
        assert!(matches!(
            ChatError::from_status(400, String::new()),
            ChatError::Provider { status: 400, .. }
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(ChatError::ProviderRateLimited.is_retryable());
        assert!(ChatError::from_status(503, String::new()).is_retryable());
        assert!(!ChatError::from_status(400, String::new()).is_retryable());
        assert!(!ChatError::ProviderAuth(String::new()).is_retryable());
        assert!(!ChatError::EmptyInput.is_retryable());
    }
}
