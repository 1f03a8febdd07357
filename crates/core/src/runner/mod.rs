//! Job runner: executes one translation request end to end.

mod trial;

pub use trial::{TrialEvent, TrialReport, TrialRunner, TrialSource};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::integrity;
use crate::language;
use crate::media::{MediaStore, TranslationState};
use crate::probe::{ContainerProber, MediaIndexer};
use crate::request::{LogLevel, RequestService, RequestStatus, TranslationRequest};
use crate::settings::TranslationSettings;
use crate::subtitle::{is_meaningless, strip_markup, SubtitleDocument, SubtitleError};
use crate::translate::{
    with_backoff, BatchTranslator, RetryError, TranslateRunError, TranslationError, Translator,
};

/// Error type for a job run.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job cancelled")]
    Cancelled,

    #[error("No usable subtitle source found")]
    SourceUnavailable,

    #[error("{0} lines could not be translated after all fallback")]
    Unresolved(usize),

    #[error("Translated file failed the integrity check")]
    IntegrityFailed,

    #[error(transparent)]
    Subtitle(#[from] SubtitleError),

    #[error(transparent)]
    Backend(TranslationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TranslateRunError> for JobError {
    fn from(e: TranslateRunError) -> Self {
        match e {
            TranslateRunError::Cancelled => JobError::Cancelled,
            TranslateRunError::Backend(e) => JobError::Backend(e),
        }
    }
}

/// Backend fault classes the scheduler's provider guard reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFault {
    /// The provider rate limited or reported a daily quota.
    RateLimited,
    /// The provider rejected the request outright (auth, 4xx).
    Rejected,
}

/// What a finished job reports back to its dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: RequestStatus,
    pub fault: Option<BackendFault>,
}

/// The subtitle source a job resolved, tracking whether it was extracted on
/// demand (and must be cleaned up afterwards).
struct ResolvedSource {
    path: PathBuf,
    extracted: bool,
}

/// Executes translation requests against the stores and the backend.
///
/// One runner instance serves many jobs; each `run` call owns its request
/// exclusively and carries its own settings snapshot and cancellation token.
pub struct JobRunner {
    requests: Arc<RequestService>,
    media_store: Arc<dyn MediaStore>,
    prober: Arc<dyn ContainerProber>,
    backend: Arc<dyn Translator>,
}

impl JobRunner {
    pub fn new(
        requests: Arc<RequestService>,
        media_store: Arc<dyn MediaStore>,
        prober: Arc<dyn ContainerProber>,
        backend: Arc<dyn Translator>,
    ) -> Self {
        Self {
            requests,
            media_store,
            prober,
            backend,
        }
    }

    /// Run one request to a terminal status. All failure reporting happens
    /// through the request log and the status transition; the returned
    /// status is for the caller's bookkeeping.
    pub async fn run(
        &self,
        request: &TranslationRequest,
        settings: &TranslationSettings,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let started = std::time::Instant::now();
        if let Err(e) = self
            .requests
            .store()
            .update_status(&request.id, RequestStatus::InProgress)
        {
            warn!(request_id = %request.id, "could not start job: {}", e);
            return JobOutcome {
                status: request.status,
                fault: None,
            };
        }
        self.requests
            .report_progress(&request.id, 0, RequestStatus::InProgress);
        self.log(
            request,
            LogLevel::Info,
            &format!(
                "Translating {} from {} to {}",
                request.title, request.source_language, request.target_language
            ),
            None,
        );

        let mut source: Option<ResolvedSource> = None;
        let result = self.execute(request, settings, &cancel, &mut source).await;

        // The extracted source is temporary regardless of how the job ended.
        if let Some(resolved) = &source {
            if resolved.extracted {
                let _ = std::fs::remove_file(&resolved.path);
            }
        }

        let fault = match &result {
            Err(JobError::Backend(TranslationError::RateLimited { .. })) => {
                Some(BackendFault::RateLimited)
            }
            Err(JobError::Backend(TranslationError::NonRetryable(_))) => {
                Some(BackendFault::Rejected)
            }
            _ => None,
        };

        let final_status = match result {
            Ok(()) => RequestStatus::Completed,
            Err(JobError::Cancelled) => {
                self.log(request, LogLevel::Warn, "Translation cancelled", None);
                RequestStatus::Cancelled
            }
            Err(e) => {
                self.log(request, LogLevel::Error, &e.to_string(), None);
                RequestStatus::Failed
            }
        };

        match self.requests.store().update_status(&request.id, final_status) {
            Ok(updated) => {
                if final_status == RequestStatus::Completed {
                    // The single final 100% emission.
                    self.requests
                        .report_progress(&request.id, 100, RequestStatus::Completed);
                } else {
                    self.requests.report_progress(
                        &request.id,
                        updated.progress,
                        final_status,
                    );
                }
            }
            Err(e) => warn!(request_id = %request.id, "could not finalize job: {}", e),
        }

        // Keep the media's state in step with what just happened.
        if let Ok(Some(media)) = self.media_store.get(request.media_kind, request.media_id) {
            let state = match final_status {
                RequestStatus::Completed => TranslationState::Pending,
                RequestStatus::Failed => TranslationState::Failed,
                _ => TranslationState::Pending,
            };
            let _ = self.media_store.update_state(
                media.kind,
                media.id,
                state,
                media.state_settings_version,
            );
        }

        crate::metrics::REQUESTS_FINISHED
            .with_label_values(&[final_status.as_str()])
            .inc();
        crate::metrics::JOB_DURATION
            .with_label_values(&[final_status.as_str()])
            .observe(started.elapsed().as_secs_f64());

        JobOutcome {
            status: final_status,
            fault,
        }
    }

    async fn execute(
        &self,
        request: &TranslationRequest,
        settings: &TranslationSettings,
        cancel: &CancellationToken,
        source_slot: &mut Option<ResolvedSource>,
    ) -> Result<(), JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let resolved = self.resolve_source(request, settings).await?;
        let source_path = resolved.path.clone();
        *source_slot = Some(resolved);

        let mut doc = SubtitleDocument::read_file(&source_path)?;
        let total = doc.items.len();
        self.log(
            request,
            LogLevel::Info,
            &format!("Parsed {} subtitle lines from {}", total, source_path.display()),
            None,
        );

        let target_path = self.target_path(request, settings, &source_path);

        if total == 0 {
            doc.write_file(&target_path)?;
            self.finish_request(request, &target_path);
            return Ok(());
        }

        let use_batch = settings.use_batch_translation && self.backend.supports_batch();
        if use_batch {
            let translator = BatchTranslator::new(
                Arc::clone(&self.backend),
                settings.batch.clone(),
                settings.retry.clone(),
            );
            let requests = Arc::clone(&self.requests);
            let request_id = request.id.clone();
            let outcome = translator
                .translate(
                    &mut doc.items,
                    &request.source_language,
                    &request.target_language,
                    cancel,
                    move |progress| {
                        // The single 100% emission happens at completion.
                        requests.report_progress(
                            &request_id,
                            progress.min(99),
                            RequestStatus::InProgress,
                        );
                    },
                )
                .await?;
            self.log(
                request,
                LogLevel::Info,
                &format!(
                    "Batch translation: {} translated, {} carried over, {} backend calls",
                    outcome.translated, outcome.carried_over, outcome.backend_calls
                ),
                None,
            );
            if !outcome.unresolved.is_empty() {
                return Err(JobError::Unresolved(outcome.unresolved.len()));
            }
        } else {
            self.translate_per_line(request, settings, &mut doc, cancel)
                .await?;
        }

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        // Write to a scratch name first so the integrity check can read the
        // candidate and a failure never leaves a file under the final name.
        let scratch = scratch_path(&target_path);
        doc.write_file(&scratch)?;

        if settings.integrity_validation_enabled
            && !integrity::validate_files(&source_path, &scratch)
        {
            let _ = std::fs::remove_file(&scratch);
            return Err(JobError::IntegrityFailed);
        }

        if cancel.is_cancelled() {
            let _ = std::fs::remove_file(&scratch);
            return Err(JobError::Cancelled);
        }

        std::fs::rename(&scratch, &target_path)?;
        self.finish_request(request, &target_path);
        Ok(())
    }

    /// Resolve the subtitle source: the recorded sidecar when present,
    /// otherwise the best text-based embedded stream, extracted on demand.
    async fn resolve_source(
        &self,
        request: &TranslationRequest,
        settings: &TranslationSettings,
    ) -> Result<ResolvedSource, JobError> {
        if let Some(path) = &request.source_path {
            if path.is_file() {
                return Ok(ResolvedSource {
                    path: path.clone(),
                    extracted: false,
                });
            }
            self.log(
                request,
                LogLevel::Warn,
                &format!("Recorded source {} is gone, trying embedded streams", path.display()),
                None,
            );
        }

        let media = self
            .media_store
            .get(request.media_kind, request.media_id)
            .ok()
            .flatten()
            .ok_or(JobError::SourceUnavailable)?;

        let embedded = self
            .media_store
            .embedded(media.kind, media.id)
            .unwrap_or_default();
        let text_streams: Vec<_> = embedded.into_iter().filter(|s| s.is_text_based).collect();

        // Prefer the configured source-language order; the request's own
        // source language leads when it is not in the configured list.
        let mut preferences = settings.source_languages.clone();
        if !preferences
            .iter()
            .any(|l| language::matches(&l.code, &request.source_language))
        {
            preferences.insert(
                0,
                language::Language::new(request.source_language.clone(), String::new()),
            );
        }

        let best = language::find_best_match(&text_streams, &preferences)
            .ok_or(JobError::SourceUnavailable)?;

        // A stream extracted earlier (extract_all mode) may already be on disk.
        if let Some(existing) = &best.extracted_path {
            let path = PathBuf::from(existing);
            if path.is_file() {
                return Ok(ResolvedSource {
                    path,
                    extracted: false,
                });
            }
        }

        let media_file =
            MediaIndexer::resolve_media_file(&media).ok_or(JobError::SourceUnavailable)?;
        let language = if best.language.is_empty() {
            None
        } else {
            Some(best.language.as_str())
        };
        let extracted = self
            .prober
            .extract(&media_file, best.stream_index, &best.codec, language)
            .await
            .map_err(|e| {
                warn!(request_id = %request.id, "extraction failed: {}", e);
                JobError::SourceUnavailable
            })?
            .ok_or(JobError::SourceUnavailable)?;

        self.log(
            request,
            LogLevel::Info,
            &format!(
                "Extracted embedded stream {} ({}) to {}",
                best.stream_index,
                best.language,
                extracted.display()
            ),
            None,
        );
        Ok(ResolvedSource {
            path: extracted,
            extracted: true,
        })
    }

    /// Sequential single-line translation with backoff, for backends without
    /// batch capability.
    async fn translate_per_line(
        &self,
        request: &TranslationRequest,
        settings: &TranslationSettings,
        doc: &mut SubtitleDocument,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let total = doc.items.len();
        let mut completed = 0usize;

        for item in doc.items.iter_mut() {
            let is_comment = item.ass.as_ref().map(|a| a.is_comment()).unwrap_or(false);
            let stripped = strip_markup(&item.text());
            if is_comment || is_meaningless(&stripped) {
                item.translated_lines = Some(item.lines.clone());
                completed += 1;
                continue;
            }

            let text = if settings.batch.strip_formatting {
                stripped
            } else {
                item.text()
            };
            let translated = with_backoff(&settings.retry, cancel, || {
                self.backend.translate_line(
                    &text,
                    &request.source_language,
                    &request.target_language,
                )
            })
            .await
            .map_err(|e| match e {
                RetryError::Cancelled => JobError::Cancelled,
                RetryError::Backend(e) => JobError::Backend(e),
            })?;

            item.translated_lines =
                Some(translated.split('\n').map(|l| l.to_string()).collect());
            completed += 1;
            self.requests.report_progress(
                &request.id,
                (((completed * 100) / total) as u8).min(99),
                RequestStatus::InProgress,
            );
        }
        Ok(())
    }

    /// Target file path: `<media_base>[.<tag>].<target>.<ext>` next to the
    /// source, with the extension following the source format.
    fn target_path(
        &self,
        request: &TranslationRequest,
        settings: &TranslationSettings,
        source_path: &Path,
    ) -> PathBuf {
        let dir = source_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        let base = self
            .media_store
            .get(request.media_kind, request.media_id)
            .ok()
            .flatten()
            .map(|m| m.file_name)
            .unwrap_or_else(|| source_base_name(source_path));
        let ext = source_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("srt");

        let name = if settings.use_subtitle_tagging && !settings.subtitle_tag.is_empty() {
            format!(
                "{}.{}.{}.{}",
                base, settings.subtitle_tag, request.target_language, ext
            )
        } else {
            format!("{}.{}.{}", base, request.target_language, ext)
        };
        dir.join(name)
    }

    fn finish_request(&self, request: &TranslationRequest, target_path: &Path) {
        if let Err(e) = self
            .requests
            .store()
            .set_translated_path(&request.id, &target_path.display().to_string())
        {
            warn!(request_id = %request.id, "could not record translated path: {}", e);
        }
        self.log(
            request,
            LogLevel::Info,
            &format!("Wrote translated subtitle to {}", target_path.display()),
            None,
        );
        info!(
            request_id = %request.id,
            target = %target_path.display(),
            "translation completed"
        );
    }

    fn log(
        &self,
        request: &TranslationRequest,
        level: LogLevel,
        message: &str,
        details: Option<serde_json::Value>,
    ) {
        self.requests.append_log(&request.id, level, message, details);
    }
}

/// Scratch name used while a translation is validated, e.g.
/// `movie.fr.partial.srt`. The real subtitle extension is kept so the
/// integrity check can parse the candidate.
fn scratch_path(target: &Path) -> PathBuf {
    let ext = target
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("srt");
    target.with_extension(format!("partial.{}", ext))
}

/// Base name of a sidecar subtitle: the stem with a trailing language token
/// removed, so `Movie.en.srt` and `Movie.srt` both yield `Movie`.
fn source_base_name(source_path: &Path) -> String {
    let stem = source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("subtitle");
    match stem.rsplit_once('.') {
        Some((base, token))
            if (2..=3).contains(&token.len())
                && token.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            base.to_string()
        }
        _ => stem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressBroadcaster;
    use crate::media::{MediaKind, NewMovie, SqliteMediaStore};
    use crate::request::{RequestAttrs, SqliteRequestStore};
    use crate::testing::{MockBackend, MockProber};
    use chrono::Utc;
    use std::time::Duration;

    const SOURCE_SRT: &str = "1\r\n00:00:01,000 --> 00:00:02,500\r\nHello\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,500\r\nHow are you?\r\n\r\n";

    struct Fixture {
        runner: JobRunner,
        requests: Arc<RequestService>,
        media_store: Arc<SqliteMediaStore>,
        prober: Arc<MockProber>,
        dir: tempfile::TempDir,
    }

    fn fixture(backend: Arc<MockBackend>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let media_store = Arc::new(SqliteMediaStore::in_memory().unwrap());
        let requests = Arc::new(RequestService::new(
            Arc::new(SqliteRequestStore::in_memory().unwrap()),
            ProgressBroadcaster::default(),
        ));
        let prober = Arc::new(MockProber::new());
        let runner = JobRunner::new(
            Arc::clone(&requests),
            media_store.clone(),
            prober.clone(),
            backend,
        );
        Fixture {
            runner,
            requests,
            media_store,
            prober,
            dir,
        }
    }

    fn fast_settings() -> TranslationSettings {
        let mut settings = TranslationSettings::default();
        settings.retry.max_retries = 2;
        settings.retry.base_delay = Duration::from_millis(1);
        settings
    }

    fn add_movie(fixture: &Fixture, with_video: bool) -> crate::media::Media {
        let dir = fixture.dir.path();
        if with_video {
            std::fs::write(dir.join("Movie.mkv"), "video").unwrap();
        }
        fixture
            .media_store
            .upsert_movie(NewMovie {
                external_id: 1,
                title: "Movie".to_string(),
                path: dir.display().to_string(),
                file_name: "Movie".to_string(),
                media_hash: None,
                date_added: Utc::now(),
            })
            .unwrap()
    }

    fn make_request(fixture: &Fixture, media: &crate::media::Media, source: Option<PathBuf>) -> TranslationRequest {
        fixture
            .requests
            .create(
                RequestAttrs {
                    title: media.title.clone(),
                    source_language: "en".to_string(),
                    target_language: "fr".to_string(),
                    source_path: source,
                    media_kind: MediaKind::Movie,
                    media_id: media.id,
                    is_priority: false,
                },
                false,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_happy_batch_run_writes_target() {
        let fx = fixture(Arc::new(MockBackend::echoing()));
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(&source, SOURCE_SRT).unwrap();
        let request = make_request(&fx, &media, Some(source.clone()));

        let outcome = fx
            .runner
            .run(&request, &fast_settings(), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Completed);

        let target = fx.dir.path().join("Movie.fr.srt");
        assert!(target.exists());
        let doc = SubtitleDocument::read_file(&target).unwrap();
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.items[0].lines, vec!["fr:Hello"]);
        // Timecodes bitwise equal to input.
        assert_eq!(doc.items[0].start_ms, 1_000);
        assert_eq!(doc.items[1].end_ms, 4_500);

        let stored = fx.requests.get(&request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.translated_path, Some(target));
        assert!(stored.completed_at.is_some());
        // No scratch file left behind.
        assert!(!fx.dir.path().join("Movie.fr.partial.srt").exists());
    }

    #[tokio::test]
    async fn test_progress_is_monotone_and_hits_100_once() {
        let fx = fixture(Arc::new(MockBackend::echoing()));
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(&source, SOURCE_SRT).unwrap();
        let request = make_request(&fx, &media, Some(source));

        let mut rx = fx.requests.events().subscribe();
        fx.runner
            .run(&request, &fast_settings(), CancellationToken::new())
            .await;

        let mut progresses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            progresses.push(event.progress);
        }
        assert!(progresses.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progresses.iter().filter(|&&p| p == 100).count(), 1);
        assert_eq!(*progresses.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_per_line_path_with_transient_failures() {
        let backend = Arc::new(MockBackend::line_only());
        backend.fail_next_lines(1).await;
        let fx = fixture(backend.clone());
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(&source, SOURCE_SRT).unwrap();
        let request = make_request(&fx, &media, Some(source));

        let outcome = fx
            .runner
            .run(&request, &fast_settings(), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Completed);
        assert_eq!(backend.batch_calls().await, 0);
        assert_eq!(backend.recorded_lines().await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_source_and_no_media_file_fails() {
        let fx = fixture(Arc::new(MockBackend::echoing()));
        let media = add_movie(&fx, false);
        let request = make_request(&fx, &media, Some(fx.dir.path().join("gone.en.srt")));

        let outcome = fx
            .runner
            .run(&request, &fast_settings(), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Failed);

        let logs = fx.requests.logs(&request.id).unwrap();
        assert!(logs.iter().any(|l| l.message.contains("No usable subtitle source")));
    }

    #[tokio::test]
    async fn test_embedded_fallback_extracts_and_cleans_up() {
        let fx = fixture(Arc::new(MockBackend::echoing()));
        let media = add_movie(&fx, true);
        fx.prober.add_stream("eng", "Full Dialogue", "subrip", true).await;
        let streams = fx.prober.probe(Path::new("x")).await.unwrap();
        fx.media_store
            .replace_embedded(MediaKind::Movie, media.id, &streams)
            .unwrap();

        let mut settings = fast_settings();
        settings.source_languages = vec![language::Language::new("en", "English")];
        let request = make_request(&fx, &media, None);

        let outcome = fx
            .runner
            .run(&request, &settings, CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Completed);

        // The extracted temp source was removed, the translation kept.
        assert!(!fx.dir.path().join("Movie.eng.srt").exists());
        assert!(fx.dir.path().join("Movie.fr.srt").exists());
        assert_eq!(fx.prober.recorded_extractions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_no_output() {
        let fx = fixture(Arc::new(MockBackend::echoing()));
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(&source, SOURCE_SRT).unwrap();
        let request = make_request(&fx, &media, Some(source));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fx.runner.run(&request, &fast_settings(), cancel).await;
        assert_eq!(outcome.status, RequestStatus::Cancelled);
        assert!(!fx.dir.path().join("Movie.fr.srt").exists());
        assert!(!fx.dir.path().join("Movie.fr.partial.srt").exists());
    }

    #[tokio::test]
    async fn test_non_retryable_backend_error_fails_request() {
        let backend = Arc::new(MockBackend::echoing());
        backend.reject_all("bad api key").await;
        let fx = fixture(backend);
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(&source, SOURCE_SRT).unwrap();
        let request = make_request(&fx, &media, Some(source));

        let outcome = fx
            .runner
            .run(&request, &fast_settings(), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Failed);
        assert!(!fx.dir.path().join("Movie.fr.srt").exists());

        let logs = fx.requests.logs(&request.id).unwrap();
        assert!(logs.iter().any(|l| l.message.contains("bad api key")));
    }

    #[tokio::test]
    async fn test_empty_source_completes_with_empty_target() {
        let fx = fixture(Arc::new(MockBackend::echoing()));
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(&source, "").unwrap();
        let request = make_request(&fx, &media, Some(source));

        let mut settings = fast_settings();
        settings.integrity_validation_enabled = true;
        let outcome = fx
            .runner
            .run(&request, &settings, CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Completed);

        let target = fx.dir.path().join("Movie.fr.srt");
        assert!(target.exists());
        assert_eq!(std::fs::read_to_string(target).unwrap(), "");
    }

    #[tokio::test]
    async fn test_all_drawings_completes_without_backend_calls() {
        let backend = Arc::new(MockBackend::echoing());
        let fx = fixture(backend.clone());
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(
            &source,
            "1\r\n00:00:01,000 --> 00:00:02,000\r\nm 0 0 l 10 0 10 10 0 10\r\n\r\n",
        )
        .unwrap();
        let request = make_request(&fx, &media, Some(source));

        let outcome = fx
            .runner
            .run(&request, &fast_settings(), CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Completed);
        assert_eq!(backend.batch_calls().await, 0);

        // Output equals input.
        let doc =
            SubtitleDocument::read_file(&fx.dir.path().join("Movie.fr.srt")).unwrap();
        assert_eq!(doc.items[0].lines, vec!["m 0 0 l 10 0 10 10 0 10"]);
    }

    #[tokio::test]
    async fn test_subtitle_tagging_in_target_name() {
        let fx = fixture(Arc::new(MockBackend::echoing()));
        let media = add_movie(&fx, false);
        let source = fx.dir.path().join("Movie.en.srt");
        std::fs::write(&source, SOURCE_SRT).unwrap();
        let request = make_request(&fx, &media, Some(source));

        let mut settings = fast_settings();
        settings.use_subtitle_tagging = true;
        let outcome = fx
            .runner
            .run(&request, &settings, CancellationToken::new())
            .await;
        assert_eq!(outcome.status, RequestStatus::Completed);
        assert!(fx.dir.path().join("Movie.[Lingarr].fr.srt").exists());
    }

    #[test]
    fn test_source_base_name() {
        assert_eq!(source_base_name(Path::new("/m/Movie.en.srt")), "Movie");
        assert_eq!(source_base_name(Path::new("/m/Movie.eng.srt")), "Movie");
        assert_eq!(source_base_name(Path::new("/m/Movie.srt")), "Movie");
        assert_eq!(
            source_base_name(Path::new("/m/Movie v2.0.srt")),
            "Movie v2.0"
        );
    }

    #[test]
    fn test_scratch_path() {
        assert_eq!(
            scratch_path(Path::new("/m/Movie.fr.srt")),
            PathBuf::from("/m/Movie.fr.partial.srt")
        );
    }
}
