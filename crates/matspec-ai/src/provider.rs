//! The completion API as an injected capability.

use std::time::Duration;

use async_trait::async_trait;
use matspec_core::{FailureKind, ImageInput, StageFailure};
use thiserror::Error;

/// Text returned by one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Input plus output tokens, when the provider reports them.
    pub tokens_used: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// Credential missing or refused (401/403).
    #[error("authentication failed: {0}")]
    Auth(String),
    /// 429 from the API.
    #[error("rate limited by the API")]
    RateLimited { retry_after: Option<Duration> },
    /// Network error, timeout, 5xx/529, malformed or empty reply.
    #[error("{0}")]
    Transient(String),
    /// Any other 4xx.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl CompletionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Transient(_) => FailureKind::Transient,
            Self::Rejected { .. } => FailureKind::Rejected,
        }
    }

    /// Per-item failure record after `attempts` requests.
    pub fn to_failure(&self, attempts: u32) -> StageFailure {
        let message = match self {
            Self::RateLimited { .. } => "rate limit still in force after backoff".to_string(),
            other => other.to_string(),
        };
        StageFailure::new(self.kind(), message, attempts)
    }
}

/// Authentication failure that aborts the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthFailure {
    pub message: String,
}

/// A hosted multimodal completion API.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send one image plus an instruction and return the reply text.
    async fn analyze_image(
        &self,
        image: &ImageInput,
        instruction: &str,
    ) -> Result<Completion, CompletionError>;

    /// Send a text-only prompt and return the reply text.
    async fn generate_text(&self, prompt: &str) -> Result<Completion, CompletionError>;
}

/// Treat an empty reply as a transient failure so it gets the retry.
pub(crate) fn require_text(completion: Completion) -> Result<Completion, CompletionError> {
    if completion.text.trim().is_empty() {
        return Err(CompletionError::Transient(
            "the API returned an empty reply".into(),
        ));
    }
    Ok(completion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_failure_kinds() {
        assert_eq!(CompletionError::Auth("x".into()).kind(), FailureKind::Auth);
        assert_eq!(
            CompletionError::RateLimited { retry_after: None }.kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            CompletionError::Rejected {
                status: 400,
                message: "too big".into()
            }
            .to_failure(1)
            .message,
            "request rejected (400): too big"
        );
    }

    #[test]
    fn empty_reply_is_transient() {
        let err = require_text(Completion {
            text: "  \n".into(),
            tokens_used: 3,
        })
        .unwrap_err();
        assert!(matches!(err, CompletionError::Transient(_)));
    }
}
