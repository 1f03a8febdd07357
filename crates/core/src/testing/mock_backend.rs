//! Mock translation backend for tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::translate::{BatchContext, TranslationError, Translator};

/// Scriptable [`Translator`] implementation.
///
/// Translations are deterministic (`"<target>:<line>"`) so assertions can
/// predict output. Failure injection covers the interesting backend
/// behaviours: misaligned batch replies, transient errors, rate limiting and
/// hard rejections.
pub struct MockBackend {
    supports_batch: bool,
    /// Remaining batch calls that should return a misaligned reply.
    misalign_remaining: Arc<RwLock<u32>>,
    /// Specific batch call numbers (1-based) that should misalign.
    misalign_calls: Arc<RwLock<Vec<u32>>>,
    /// Remaining line calls that should fail with a transient error.
    transient_line_failures: Arc<RwLock<u32>>,
    /// Remaining calls that should be rate limited.
    rate_limited_remaining: Arc<RwLock<u32>>,
    /// When set, every call fails with this non-retryable message.
    reject_message: Arc<RwLock<Option<String>>>,
    /// When set, batch replies are aligned but corrupted: each starts with a
    /// blank line, so the written file loses entries on reparse.
    corrupt_replies: Arc<RwLock<bool>>,
    batch_counter: Arc<RwLock<u32>>,
    recorded_batches: Arc<RwLock<Vec<Vec<String>>>>,
    recorded_contexts: Arc<RwLock<Vec<BatchContext>>>,
    recorded_lines: Arc<RwLock<Vec<String>>>,
}

impl MockBackend {
    /// A batch-capable backend echoing `<target>:<line>`.
    pub fn echoing() -> Self {
        Self::with_batch_support(true)
    }

    /// A backend without batch capability, for the per-line path.
    pub fn line_only() -> Self {
        Self::with_batch_support(false)
    }

    fn with_batch_support(supports_batch: bool) -> Self {
        Self {
            supports_batch,
            misalign_remaining: Arc::new(RwLock::new(0)),
            misalign_calls: Arc::new(RwLock::new(Vec::new())),
            transient_line_failures: Arc::new(RwLock::new(0)),
            rate_limited_remaining: Arc::new(RwLock::new(0)),
            reject_message: Arc::new(RwLock::new(None)),
            corrupt_replies: Arc::new(RwLock::new(false)),
            batch_counter: Arc::new(RwLock::new(0)),
            recorded_batches: Arc::new(RwLock::new(Vec::new())),
            recorded_contexts: Arc::new(RwLock::new(Vec::new())),
            recorded_lines: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// The next `count` batch calls return a reply one entry short.
    pub async fn fail_next_batches(&self, count: u32) {
        *self.misalign_remaining.write().await = count;
    }

    /// Batch call number `call` (1-based) returns a misaligned reply.
    pub async fn fail_batch_number(&self, call: u32) {
        self.misalign_calls.write().await.push(call);
    }

    /// The next `count` line calls fail with a transient service error.
    pub async fn fail_next_lines(&self, count: u32) {
        *self.transient_line_failures.write().await = count;
    }

    /// The next `count` calls are rate limited.
    pub async fn rate_limit_next(&self, count: u32) {
        *self.rate_limited_remaining.write().await = count;
    }

    /// Every subsequent call fails hard with the given message.
    pub async fn reject_all(&self, message: &str) {
        *self.reject_message.write().await = Some(message.to_string());
    }

    /// Batch replies keep their count and order but come back corrupted:
    /// each entry gains a leading blank line, which breaks the block
    /// structure once written out. Models the provider mangling output in a
    /// way per-reply validation cannot see.
    pub async fn corrupt_batch_replies(&self, corrupt: bool) {
        *self.corrupt_replies.write().await = corrupt;
    }

    pub async fn batch_calls(&self) -> u32 {
        *self.batch_counter.read().await
    }

    pub async fn recorded_batches(&self) -> Vec<Vec<String>> {
        self.recorded_batches.read().await.clone()
    }

    pub async fn recorded_contexts(&self) -> Vec<BatchContext> {
        self.recorded_contexts.read().await.clone()
    }

    pub async fn recorded_lines(&self) -> Vec<String> {
        self.recorded_lines.read().await.clone()
    }

    async fn check_common_failures(&self) -> Result<(), TranslationError> {
        if let Some(message) = self.reject_message.read().await.clone() {
            return Err(TranslationError::NonRetryable(message));
        }
        {
            let mut rate_limited = self.rate_limited_remaining.write().await;
            if *rate_limited > 0 {
                *rate_limited -= 1;
                return Err(TranslationError::RateLimited { retry_after: None });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Translator for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_batch(&self) -> bool {
        self.supports_batch
    }

    async fn translate_line(
        &self,
        text: &str,
        _source: &str,
        target: &str,
    ) -> Result<String, TranslationError> {
        self.check_common_failures().await?;
        {
            let mut failures = self.transient_line_failures.write().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(TranslationError::ServiceFailure(
                    "injected transient failure".to_string(),
                ));
            }
        }
        self.recorded_lines.write().await.push(text.to_string());
        Ok(format!("{}:{}", target, text))
    }

    async fn translate_batch(
        &self,
        lines: &[String],
        context: &BatchContext,
        _source: &str,
        target: &str,
    ) -> Result<Vec<String>, TranslationError> {
        self.check_common_failures().await?;

        let call_number = {
            let mut counter = self.batch_counter.write().await;
            *counter += 1;
            *counter
        };
        self.recorded_batches.write().await.push(lines.to_vec());
        self.recorded_contexts.write().await.push(context.clone());

        let misalign = {
            let mut remaining = self.misalign_remaining.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                self.misalign_calls.read().await.contains(&call_number)
            }
        };

        if misalign {
            // One entry short, like a model that merged two lines.
            let replies: Vec<String> = lines
                .iter()
                .skip(1)
                .map(|l| format!("{}:{}", target, l))
                .collect();
            return Ok(replies);
        }

        if *self.corrupt_replies.read().await {
            return Ok(lines
                .iter()
                .map(|l| format!("\n{}:{}", target, l))
                .collect());
        }

        Ok(lines.iter().map(|l| format!("{}:{}", target, l)).collect())
    }
}
