//! Batched subtitle translation with split and repair fallback.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::subtitle::{is_meaningless, strip_markup, SubtitleItem};

use super::backend::{BatchContext, TranslationError, Translator};
use super::retry::{with_backoff, RetryError, RetryPolicy};

/// What to do when a batch reply fails alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRetryMode {
    /// Halve the failing batch and retry the halves right away.
    Immediate,
    /// Record the failing batch as a gap and repair it after the full pass.
    Deferred,
}

impl BatchRetryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchRetryMode::Immediate => "immediate",
            BatchRetryMode::Deferred => "deferred",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "immediate" => Some(BatchRetryMode::Immediate),
            "deferred" => Some(BatchRetryMode::Deferred),
            _ => None,
        }
    }
}

/// Tuning options for the batch pipeline.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Send markup-stripped text instead of the raw lines.
    pub strip_formatting: bool,
    /// Upper bound on lines per API call; 0 means unbounded.
    pub max_batch_size: usize,
    pub retry_mode: BatchRetryMode,
    /// Recursion depth for immediate-mode splitting.
    pub max_split_attempts: u32,
    /// Translated neighbour lines around a gap during deferred repair.
    pub repair_context_radius: usize,
    /// Per-gap repair attempts in deferred mode.
    pub repair_max_retries: u32,
    /// Source-language context lines sent ahead of every batch.
    pub context_before: usize,
    /// Source-language context lines sent after every batch.
    pub context_after: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            strip_formatting: false,
            max_batch_size: 180,
            retry_mode: BatchRetryMode::Deferred,
            max_split_attempts: 3,
            repair_context_radius: 10,
            repair_max_retries: 1,
            context_before: 0,
            context_after: 0,
        }
    }
}

/// Summary of a completed translation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Total items in the document.
    pub total: usize,
    /// Items sent (or queued) for backend translation.
    pub eligible: usize,
    /// Drawings, comments and meaningless items carried over untranslated.
    pub carried_over: usize,
    /// Items the backend actually translated.
    pub translated: usize,
    /// Item indices left untranslated after all fallback was exhausted.
    pub unresolved: Vec<usize>,
    /// Number of backend calls made.
    pub backend_calls: usize,
}

impl BatchOutcome {
    pub fn is_fully_translated(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Error type for a translation run.
#[derive(Debug, thiserror::Error)]
pub enum TranslateRunError {
    #[error("translation cancelled")]
    Cancelled,

    #[error(transparent)]
    Backend(TranslationError),
}

impl From<RetryError> for TranslateRunError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Cancelled => TranslateRunError::Cancelled,
            RetryError::Backend(e) => TranslateRunError::Backend(e),
        }
    }
}

/// Outcome of one group call.
enum GroupResult {
    Translated(Vec<String>),
    /// The reply failed alignment; fallback decides what happens next.
    Misaligned,
}

/// Drives batched translation of a parsed subtitle document.
///
/// Line count, ordering and timing are preserved end to end: only
/// `translated_lines` is ever written, and every fallback operates on item
/// indices into the original sequence.
pub struct BatchTranslator {
    backend: Arc<dyn Translator>,
    options: BatchOptions,
    retry: RetryPolicy,
}

impl BatchTranslator {
    pub fn new(backend: Arc<dyn Translator>, options: BatchOptions, retry: RetryPolicy) -> Self {
        Self {
            backend,
            options,
            retry,
        }
    }

    /// Translate `items` in place from `source` to `target`.
    ///
    /// `on_progress` is invoked with a monotonically non-decreasing
    /// percentage after every group or repair call.
    pub async fn translate(
        &self,
        items: &mut [SubtitleItem],
        source: &str,
        target: &str,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(u8),
    ) -> Result<BatchOutcome, TranslateRunError> {
        let total = items.len();
        let mut carried_over = 0usize;
        let mut completed = 0usize;
        let mut backend_calls = 0usize;

        // Pass 1: mark items the backend never sees. Drawings, lines that
        // strip down to nothing, and ASS comment events carry their source
        // text over and count as done for progress purposes.
        let mut send_texts: Vec<Option<String>> = Vec::with_capacity(total);
        let mut eligible: Vec<usize> = Vec::new();
        for (index, item) in items.iter_mut().enumerate() {
            let is_comment = item.ass.as_ref().map(|a| a.is_comment()).unwrap_or(false);
            let stripped = strip_markup(&item.text());
            if is_comment || is_meaningless(&stripped) {
                item.translated_lines = Some(item.lines.clone());
                carried_over += 1;
                completed += 1;
                send_texts.push(None);
                continue;
            }
            send_texts.push(Some(if self.options.strip_formatting {
                stripped
            } else {
                item.text()
            }));
            eligible.push(index);
        }

        on_progress(percent(completed, total));

        if eligible.is_empty() {
            debug!("nothing to translate, all {} items carried over", total);
            return Ok(BatchOutcome {
                total,
                eligible: 0,
                carried_over,
                translated: 0,
                unresolved: Vec::new(),
                backend_calls: 0,
            });
        }

        // Pass 2: chunk and translate.
        let chunk_size = if self.options.max_batch_size == 0 {
            eligible.len()
        } else {
            self.options.max_batch_size
        };
        let mut groups: VecDeque<(Vec<usize>, u32)> = eligible
            .chunks(chunk_size)
            .map(|c| (c.to_vec(), 0))
            .collect();

        let mut gaps: Vec<Vec<usize>> = Vec::new();
        let mut translated = 0usize;

        while let Some((group, depth)) = groups.pop_front() {
            let context = self.surrounding_context(items, &send_texts, &group);
            backend_calls += 1;
            match self
                .call_group(&send_texts, &group, &context, source, target, cancel)
                .await?
            {
                GroupResult::Translated(replies) => {
                    apply_translations(items, &group, replies);
                    translated += group.len();
                    completed += group.len();
                    crate::metrics::LINES_TRANSLATED.inc_by(group.len() as u64);
                    on_progress(percent(completed, total));
                }
                GroupResult::Misaligned => match self.options.retry_mode {
                    BatchRetryMode::Immediate => {
                        if group.len() == 1 || depth >= self.options.max_split_attempts {
                            warn!(
                                lines = group.len(),
                                depth, "batch misaligned with no split budget left"
                            );
                            gaps.push(group);
                        } else {
                            let mid = group.len() / 2;
                            let (left, right) = group.split_at(mid);
                            debug!(
                                lines = group.len(),
                                depth, "batch misaligned, splitting in half"
                            );
                            crate::metrics::BATCH_FALLBACKS
                                .with_label_values(&["split"])
                                .inc();
                            groups.push_front((right.to_vec(), depth + 1));
                            groups.push_front((left.to_vec(), depth + 1));
                        }
                    }
                    BatchRetryMode::Deferred => {
                        debug!(lines = group.len(), "batch misaligned, deferring repair");
                        crate::metrics::BATCH_FALLBACKS
                            .with_label_values(&["repair"])
                            .inc();
                        gaps.push(group);
                    }
                },
            }
        }

        // Pass 3: deferred repair of recorded gaps.
        let mut unresolved: Vec<usize> = Vec::new();
        if self.options.retry_mode == BatchRetryMode::Deferred {
            for gap in gaps {
                let mut repaired = false;
                for attempt in 0..self.options.repair_max_retries {
                    let context = self.repair_context(items, &gap);
                    backend_calls += 1;
                    match self
                        .call_group(&send_texts, &gap, &context, source, target, cancel)
                        .await?
                    {
                        GroupResult::Translated(replies) => {
                            apply_translations(items, &gap, replies);
                            translated += gap.len();
                            completed += gap.len();
                            crate::metrics::LINES_TRANSLATED.inc_by(gap.len() as u64);
                            on_progress(percent(completed, total));
                            repaired = true;
                            break;
                        }
                        GroupResult::Misaligned => {
                            warn!(
                                lines = gap.len(),
                                attempt = attempt + 1,
                                "gap repair reply misaligned"
                            );
                        }
                    }
                }
                if !repaired {
                    unresolved.extend(&gap);
                }
            }
        } else {
            unresolved = gaps.into_iter().flatten().collect();
        }

        unresolved.sort_unstable();
        if !unresolved.is_empty() {
            warn!(
                unresolved = unresolved.len(),
                total, "translation finished with untranslated lines"
            );
        } else {
            info!(translated, carried_over, total, "translation pass complete");
        }

        Ok(BatchOutcome {
            total,
            eligible: eligible.len(),
            carried_over,
            translated,
            unresolved,
            backend_calls,
        })
    }

    /// One backend call for a group of item indices, with transient errors
    /// retried under the backoff policy. Alignment problems are reported as
    /// `Misaligned` rather than errors so fallback can engage.
    async fn call_group(
        &self,
        send_texts: &[Option<String>],
        group: &[usize],
        context: &BatchContext,
        source: &str,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<GroupResult, TranslateRunError> {
        let lines: Vec<String> = group
            .iter()
            .map(|&i| send_texts[i].clone().unwrap_or_default())
            .collect();

        let result = with_backoff(&self.retry, cancel, || {
            self.backend.translate_batch(&lines, context, source, target)
        })
        .await;

        let outcome_label = match &result {
            Ok(_) => "ok",
            Err(RetryError::Cancelled) => "cancelled",
            Err(RetryError::Backend(TranslationError::RateLimited { .. })) => "rate_limited",
            Err(RetryError::Backend(TranslationError::InvalidResponse(_))) => "invalid",
            Err(RetryError::Backend(TranslationError::ServiceFailure(_))) => "failure",
            Err(RetryError::Backend(TranslationError::NonRetryable(_))) => "rejected",
        };
        crate::metrics::BACKEND_CALLS
            .with_label_values(&[self.backend.name(), outcome_label])
            .inc();

        match result {
            Ok(replies) => {
                if replies.len() != lines.len() {
                    return Ok(GroupResult::Misaligned);
                }
                let empty_reply = replies
                    .iter()
                    .zip(&lines)
                    .any(|(reply, line)| reply.trim().is_empty() && !line.trim().is_empty());
                if empty_reply {
                    return Ok(GroupResult::Misaligned);
                }
                Ok(GroupResult::Translated(replies))
            }
            Err(RetryError::Backend(TranslationError::InvalidResponse(reason))) => {
                debug!("backend reply rejected: {}", reason);
                Ok(GroupResult::Misaligned)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Source-language context lines around a regular batch.
    fn surrounding_context(
        &self,
        items: &[SubtitleItem],
        send_texts: &[Option<String>],
        group: &[usize],
    ) -> BatchContext {
        if self.options.context_before == 0 && self.options.context_after == 0 {
            return BatchContext::default();
        }
        let first = group[0];
        let last = *group.last().expect("groups are never empty");

        let before = (0..first)
            .rev()
            .filter_map(|i| send_texts[i].clone())
            .take(self.options.context_before)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let after = (last + 1..items.len())
            .filter_map(|i| send_texts[i].clone())
            .take(self.options.context_after)
            .collect();

        BatchContext { before, after }
    }

    /// Already-translated neighbour lines around a gap, used as repair
    /// context in the target language.
    fn repair_context(&self, items: &[SubtitleItem], gap: &[usize]) -> BatchContext {
        let radius = self.options.repair_context_radius;
        if radius == 0 {
            return BatchContext::default();
        }
        let first = gap[0];
        let last = *gap.last().expect("gaps are never empty");

        let before = (0..first)
            .rev()
            .filter_map(|i| translated_text(&items[i]))
            .take(radius)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let after = (last + 1..items.len())
            .filter_map(|i| translated_text(&items[i]))
            .take(radius)
            .collect();

        BatchContext { before, after }
    }
}

fn translated_text(item: &SubtitleItem) -> Option<String> {
    item.translated_lines.as_ref().map(|lines| lines.join("\n"))
}

fn apply_translations(items: &mut [SubtitleItem], group: &[usize], replies: Vec<String>) {
    for (&index, reply) in group.iter().zip(replies) {
        items[index].translated_lines = Some(reply.split('\n').map(|l| l.to_string()).collect());
    }
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn items(texts: &[&str]) -> Vec<SubtitleItem> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                SubtitleItem::new(
                    i + 1,
                    (i as u64) * 2000,
                    (i as u64) * 2000 + 1500,
                    vec![text.to_string()],
                )
            })
            .collect()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: std::time::Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: std::time::Duration::from_millis(5),
        }
    }

    fn translator(backend: Arc<MockBackend>, options: BatchOptions) -> BatchTranslator {
        BatchTranslator::new(backend, options, fast_retry())
    }

    #[tokio::test]
    async fn test_happy_batch() {
        let backend = Arc::new(MockBackend::echoing());
        let translator = translator(backend.clone(), BatchOptions::default());
        let mut subtitle = items(&["Hi", "How are you?", "Good, and you?"]);

        let mut seen = Vec::new();
        let outcome = translator
            .translate(
                &mut subtitle,
                "en",
                "fr",
                &CancellationToken::new(),
                |p| seen.push(p),
            )
            .await
            .unwrap();

        assert_eq!(outcome.translated, 3);
        assert!(outcome.is_fully_translated());
        assert_eq!(outcome.backend_calls, 1);
        for item in &subtitle {
            let translated = item.translated_lines.as_ref().unwrap();
            assert_eq!(translated[0], format!("fr:{}", item.lines[0]));
        }
        assert_eq!(*seen.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_order_and_timing_preserved_across_batches() {
        let backend = Arc::new(MockBackend::echoing());
        let options = BatchOptions {
            max_batch_size: 2,
            ..BatchOptions::default()
        };
        let translator = translator(backend, options);
        let mut subtitle = items(&["one", "two", "three", "four", "five"]);
        let original = subtitle.clone();

        translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(subtitle.len(), original.len());
        for (before, after) in original.iter().zip(&subtitle) {
            assert_eq!(before.start_ms, after.start_ms);
            assert_eq!(before.end_ms, after.end_ms);
            assert_eq!(before.lines, after.lines);
            assert_eq!(
                after.translated_lines.as_ref().unwrap()[0],
                format!("fr:{}", before.lines[0])
            );
        }
    }

    #[tokio::test]
    async fn test_drawings_and_empties_skip_backend() {
        let backend = Arc::new(MockBackend::echoing());
        let translator = translator(backend.clone(), BatchOptions::default());
        let mut subtitle = items(&[
            "m 0 0 l 100 0 100 100 0 100",
            "[door slams]",
            "♪ ♪",
        ]);

        let outcome = translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.backend_calls, 0);
        assert_eq!(outcome.carried_over, 3);
        assert_eq!(backend.batch_calls().await, 0);
        // Output equals input.
        for item in &subtitle {
            assert_eq!(item.translated_lines.as_ref().unwrap(), &item.lines);
        }
    }

    #[tokio::test]
    async fn test_immediate_split_recovers() {
        let backend = Arc::new(MockBackend::echoing());
        // First call (the batch of 4) misaligns; halves succeed.
        backend.fail_next_batches(1).await;
        let options = BatchOptions {
            retry_mode: BatchRetryMode::Immediate,
            max_split_attempts: 3,
            ..BatchOptions::default()
        };
        let translator = translator(backend.clone(), options);
        let mut subtitle = items(&["a", "b", "c", "d"]);

        let mut emissions = Vec::new();
        let outcome = translator
            .translate(
                &mut subtitle,
                "en",
                "fr",
                &CancellationToken::new(),
                |p| emissions.push(p),
            )
            .await
            .unwrap();

        assert!(outcome.is_fully_translated());
        assert_eq!(outcome.translated, 4);
        // One failed call plus two successful halves.
        assert_eq!(outcome.backend_calls, 3);
        assert!(emissions.len() >= 2);
        assert!(emissions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_immediate_split_single_line_failure_is_unresolved() {
        let backend = Arc::new(MockBackend::echoing());
        backend.fail_next_batches(100).await;
        let options = BatchOptions {
            retry_mode: BatchRetryMode::Immediate,
            max_batch_size: 2,
            max_split_attempts: 3,
            ..BatchOptions::default()
        };
        let translator = translator(backend, options);
        let mut subtitle = items(&["a", "b"]);

        let outcome = translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.unresolved, vec![0, 1]);
        assert!(subtitle[0].translated_lines.is_none());
    }

    #[tokio::test]
    async fn test_deferred_repair_translates_gap_with_context() {
        let backend = Arc::new(MockBackend::echoing());
        let options = BatchOptions {
            max_batch_size: 5,
            retry_mode: BatchRetryMode::Deferred,
            repair_context_radius: 2,
            repair_max_retries: 1,
            ..BatchOptions::default()
        };
        let translator = translator(backend.clone(), options);
        let mut subtitle = items(&["l1", "l2", "l3", "l4", "l5", "l6", "l7", "l8", "l9", "l10"]);

        // First batch of five succeeds; the second misaligns once, then the
        // repair call succeeds.
        backend.fail_batch_number(2).await;

        let outcome = translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(outcome.is_fully_translated());
        assert_eq!(outcome.translated, 10);
        assert_eq!(outcome.backend_calls, 3);
        for item in &subtitle {
            assert!(item.translated_lines.is_some());
        }

        // The repair call carried translated neighbours as context.
        let contexts = backend.recorded_contexts().await;
        let repair_ctx = contexts.last().unwrap();
        assert_eq!(
            repair_ctx.before,
            vec!["fr:l4".to_string(), "fr:l5".to_string()]
        );
        assert!(repair_ctx.after.is_empty());
    }

    #[tokio::test]
    async fn test_deferred_repair_exhausted_leaves_gap_untranslated() {
        let backend = Arc::new(MockBackend::echoing());
        backend.fail_next_batches(100).await;
        let options = BatchOptions {
            max_batch_size: 2,
            retry_mode: BatchRetryMode::Deferred,
            repair_max_retries: 2,
            ..BatchOptions::default()
        };
        let translator = translator(backend, options);
        let mut subtitle = items(&["a", "b", "c"]);

        let outcome = translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.unresolved, vec![0, 1, 2]);
        assert_eq!(outcome.translated, 0);
        // Untranslated items fall back to source text on write.
        assert!(subtitle.iter().all(|i| i.translated_lines.is_none()));
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts_run() {
        let backend = Arc::new(MockBackend::echoing());
        backend.reject_all("invalid api key").await;
        let translator = translator(backend, BatchOptions::default());
        let mut subtitle = items(&["a"]);

        let result = translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(
            result,
            Err(TranslateRunError::Backend(TranslationError::NonRetryable(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_run() {
        let backend = Arc::new(MockBackend::echoing());
        let translator = translator(backend, BatchOptions::default());
        let mut subtitle = items(&["a", "b"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = translator
            .translate(&mut subtitle, "en", "fr", &cancel, |_| {})
            .await;
        assert!(matches!(result, Err(TranslateRunError::Cancelled)));
    }

    #[tokio::test]
    async fn test_single_line_input_no_batching_needed() {
        let backend = Arc::new(MockBackend::echoing());
        let translator = translator(backend.clone(), BatchOptions::default());
        let mut subtitle = items(&["only line"]);

        let outcome = translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.backend_calls, 1);
        assert_eq!(outcome.translated, 1);
    }

    #[tokio::test]
    async fn test_unbounded_batch_size() {
        let backend = Arc::new(MockBackend::echoing());
        let options = BatchOptions {
            max_batch_size: 0,
            ..BatchOptions::default()
        };
        let translator = translator(backend.clone(), options);
        let mut subtitle = items(&["a", "b", "c", "d", "e"]);

        let outcome = translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.backend_calls, 1);
        assert_eq!(outcome.translated, 5);
    }

    #[tokio::test]
    async fn test_strip_formatting_sends_clean_text() {
        let backend = Arc::new(MockBackend::echoing());
        let options = BatchOptions {
            strip_formatting: true,
            ..BatchOptions::default()
        };
        let translator = translator(backend.clone(), options);
        let mut subtitle = items(&["<i>Hello</i>"]);

        translator
            .translate(&mut subtitle, "en", "fr", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        let batches = backend.recorded_batches().await;
        assert_eq!(batches[0], vec!["Hello".to_string()]);
        assert_eq!(
            subtitle[0].translated_lines.as_ref().unwrap()[0],
            "fr:Hello"
        );
    }

    #[test]
    fn test_retry_mode_parse() {
        assert_eq!(BatchRetryMode::parse("immediate"), Some(BatchRetryMode::Immediate));
        assert_eq!(BatchRetryMode::parse("deferred"), Some(BatchRetryMode::Deferred));
        assert_eq!(BatchRetryMode::parse("magic"), None);
    }

    #[test]
    fn test_percent_floor() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }
}
