use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: String },

    #[error("request timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether a caller may reasonably retry the same request with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::EmptyResponse { .. } | Self::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_retryable() {
        assert!(LlmError::Unavailable("connection refused".into()).is_retryable());
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            LlmError::EmptyResponse {
                provider: "ollama".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn cancellation_is_not_retryable() {
        assert!(!LlmError::Cancelled.is_retryable());
        assert!(
            !LlmError::EmbedUnsupported {
                provider: "mock".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn timeout_message_includes_seconds() {
        let msg = LlmError::Timeout(Duration::from_millis(1500)).to_string();
        assert_eq!(msg, "request timed out after 1.5s");
    }
}
