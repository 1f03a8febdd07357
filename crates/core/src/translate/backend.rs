//! Translation backend abstraction.

use async_trait::async_trait;
use std::time::Duration;

/// Error taxonomy shared by every translation backend.
///
/// Callers retry `RateLimited` and `ServiceFailure` under their own backoff
/// policy; `InvalidResponse` drives batch fallback; `NonRetryable` surfaces
/// straight to the request.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    /// The provider asked us to slow down (HTTP 429 or equivalent).
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// The reply could not be used: parse failure, count mismatch, or empty
    /// output for non-empty input.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Network error, timeout, 5xx or other transient provider failure.
    #[error("Service failure: {0}")]
    ServiceFailure(String),

    /// Authentication errors and other 4xx responses. Retrying will not help.
    #[error("Backend rejected request: {0}")]
    NonRetryable(String),
}

impl TranslationError {
    /// Whether backing off and retrying the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslationError::RateLimited { .. } | TranslationError::ServiceFailure(_)
        )
    }
}

/// Untranslated neighbour lines handed to the backend alongside a batch, so
/// repairs and small batches keep the surrounding dialogue in view. Context
/// lines are never translated and never counted in the reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchContext {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl BatchContext {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// A translation backend.
///
/// Implementations are stateless across calls; rate limiting, retries and
/// concurrency control all live above this port. `supports_batch` gates the
/// batched pipeline; the default `translate_batch` falls back to sequential
/// single-line calls so every backend behaves correctly either way.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Provider name used for logging and circuit breaking.
    fn name(&self) -> &str;

    /// Whether the backend natively accepts multi-line batches.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Translate a single line of dialogue.
    async fn translate_line(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslationError>;

    /// Translate a batch of lines, preserving order and count.
    async fn translate_batch(
        &self,
        lines: &[String],
        _context: &BatchContext,
        source: &str,
        target: &str,
    ) -> Result<Vec<String>, TranslationError> {
        let mut out = Vec::with_capacity(lines.len());
        for line in lines {
            out.push(self.translate_line(line, source, target).await?);
        }
        Ok(out)
    }
}
