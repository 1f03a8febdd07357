//! One-shot trial translation without persistence.
//!
//! Lets a user point the configured backend at a subtitle file (or a media
//! item's best embedded stream) and watch it translate, without creating a
//! request row or writing any output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::language::{self, Language};
use crate::media::{MediaKind, MediaStore};
use crate::probe::{ContainerProber, MediaIndexer};
use crate::request::LogLevel;
use crate::settings::TranslationSettings;
use crate::subtitle::SubtitleDocument;
use crate::translate::{BatchTranslator, TranslateRunError, Translator};

/// What to translate in a trial run.
#[derive(Debug, Clone)]
pub enum TrialSource {
    SubtitlePath(PathBuf),
    Media(MediaKind, i64),
}

/// Terminal summary of a trial run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    pub success: bool,
    pub total: usize,
    pub translated: usize,
    pub duration: Duration,
}

/// Streamed trial output: log lines while running, one report at the end.
#[derive(Debug, Clone)]
pub enum TrialEvent {
    Log {
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
        details: Option<serde_json::Value>,
    },
    Finished(TrialReport),
}

/// Runs trial translations.
pub struct TrialRunner {
    backend: Arc<dyn Translator>,
    media_store: Arc<dyn MediaStore>,
    prober: Arc<dyn ContainerProber>,
}

impl TrialRunner {
    pub fn new(
        backend: Arc<dyn Translator>,
        media_store: Arc<dyn MediaStore>,
        prober: Arc<dyn ContainerProber>,
    ) -> Self {
        Self {
            backend,
            media_store,
            prober,
        }
    }

    /// Run a trial translation, streaming events to `tx`. The final
    /// [`TrialEvent::Finished`] is always sent, success or not.
    pub async fn run(
        &self,
        source: TrialSource,
        source_language: &str,
        target_language: &str,
        settings: &TranslationSettings,
        tx: mpsc::Sender<TrialEvent>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let report = self
            .run_inner(source, source_language, target_language, settings, &tx, &cancel)
            .await
            .unwrap_or_else(|message| {
                let _ = tx.try_send(log_event(LogLevel::Error, &message));
                TrialReport {
                    success: false,
                    total: 0,
                    translated: 0,
                    duration: Duration::ZERO,
                }
            });

        let _ = tx
            .send(TrialEvent::Finished(TrialReport {
                duration: started.elapsed(),
                ..report
            }))
            .await;
    }

    async fn run_inner(
        &self,
        source: TrialSource,
        source_language: &str,
        target_language: &str,
        settings: &TranslationSettings,
        tx: &mpsc::Sender<TrialEvent>,
        cancel: &CancellationToken,
    ) -> Result<TrialReport, String> {
        let (path, extracted) = self.resolve(source, source_language, settings).await?;
        let _ = tx.try_send(log_event(
            LogLevel::Info,
            &format!("Using source {}", path.display()),
        ));

        let mut doc = SubtitleDocument::read_file(&path).map_err(|e| e.to_string())?;
        let total = doc.items.len();
        let _ = tx.try_send(log_event(
            LogLevel::Info,
            &format!("Parsed {} lines", total),
        ));

        let translator = BatchTranslator::new(
            Arc::clone(&self.backend),
            settings.batch.clone(),
            settings.retry.clone(),
        );
        let progress_tx = tx.clone();
        let result = translator
            .translate(
                &mut doc.items,
                source_language,
                target_language,
                cancel,
                move |progress| {
                    let _ = progress_tx.try_send(log_event(
                        LogLevel::Debug,
                        &format!("Progress {}%", progress),
                    ));
                },
            )
            .await;

        if extracted {
            let _ = std::fs::remove_file(&path);
        }

        match result {
            Ok(outcome) => Ok(TrialReport {
                success: outcome.is_fully_translated(),
                total,
                translated: outcome.translated + outcome.carried_over,
                duration: Duration::ZERO,
            }),
            Err(TranslateRunError::Cancelled) => Err("trial cancelled".to_string()),
            Err(TranslateRunError::Backend(e)) => Err(e.to_string()),
        }
    }

    async fn resolve(
        &self,
        source: TrialSource,
        source_language: &str,
        settings: &TranslationSettings,
    ) -> Result<(PathBuf, bool), String> {
        match source {
            TrialSource::SubtitlePath(path) => {
                if path.is_file() {
                    Ok((path, false))
                } else {
                    Err(format!("subtitle file not found: {}", path.display()))
                }
            }
            TrialSource::Media(kind, id) => {
                let media = self
                    .media_store
                    .get(kind, id)
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("media not found: {} {}", kind, id))?;

                let embedded = self
                    .media_store
                    .embedded(kind, id)
                    .map_err(|e| e.to_string())?;
                let text_streams: Vec<_> =
                    embedded.into_iter().filter(|s| s.is_text_based).collect();

                let mut preferences = settings.source_languages.clone();
                if !preferences
                    .iter()
                    .any(|l| language::matches(&l.code, source_language))
                {
                    preferences.insert(0, Language::new(source_language, ""));
                }
                let best = language::find_best_match(&text_streams, &preferences)
                    .ok_or_else(|| "no matching embedded stream".to_string())?;

                let media_file = MediaIndexer::resolve_media_file(&media)
                    .ok_or_else(|| "media file missing on disk".to_string())?;
                let lang = if best.language.is_empty() {
                    None
                } else {
                    Some(best.language.as_str())
                };
                let path = self
                    .prober
                    .extract(&media_file, best.stream_index, &best.codec, lang)
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| "stream extraction failed".to_string())?;
                Ok((path, true))
            }
        }
    }
}

fn log_event(level: LogLevel, message: &str) -> TrialEvent {
    TrialEvent::Log {
        level,
        message: message.to_string(),
        timestamp: Utc::now(),
        details: None,
    }
}
