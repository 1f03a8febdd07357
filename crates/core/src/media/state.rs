//! Per-media translation state computation.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::language::{self, Language};
use crate::request::RequestStore;

use super::sidecar::{self, SidecarSubtitle};
use super::store::{MediaStore, MediaStoreError};
use super::types::{EmbeddedSubtitle, Media, TranslationState};

/// Everything [`compute_state`] looks at, gathered up front so the rule
/// evaluation itself is pure and trivially testable.
#[derive(Debug, Clone)]
pub struct StateContext<'a> {
    /// Effective exclusion (media or any parent).
    pub excluded: bool,
    pub source_languages: &'a [Language],
    pub target_languages: &'a [Language],
    pub has_active_request: bool,
    pub has_failed_request: bool,
    pub sidecars: &'a [SidecarSubtitle],
    pub embedded: &'a [EmbeddedSubtitle],
}

/// Classify a media item. Rules are evaluated in order; the first match wins.
pub fn compute_state(ctx: &StateContext) -> TranslationState {
    if ctx.excluded {
        return TranslationState::NotApplicable;
    }
    if ctx.source_languages.is_empty() || ctx.target_languages.is_empty() {
        return TranslationState::NotApplicable;
    }
    if ctx.has_active_request {
        return TranslationState::InProgress;
    }
    if ctx.has_failed_request {
        return TranslationState::Failed;
    }

    let has_sidecar_source = ctx
        .source_languages
        .iter()
        .any(|lang| sidecar::has_language(ctx.sidecars, &lang.code));
    // Image-based embedded streams are reported by the prober but are not
    // usable sources; only text tracks count here.
    let has_embedded_source = ctx.embedded.iter().any(|sub| {
        sub.is_text_based
            && ctx
                .source_languages
                .iter()
                .any(|lang| language::matches(&sub.language, &lang.code))
    });
    if !has_sidecar_source && !has_embedded_source {
        return TranslationState::AwaitingSource;
    }

    let all_targets_present = ctx
        .target_languages
        .iter()
        .all(|lang| sidecar::has_language(ctx.sidecars, &lang.code));
    if all_targets_present {
        return TranslationState::Complete;
    }

    TranslationState::Pending
}

/// Computes and persists media states against the stores.
pub struct StateEngine {
    media_store: Arc<dyn MediaStore>,
    request_store: Arc<dyn RequestStore>,
}

impl StateEngine {
    pub fn new(media_store: Arc<dyn MediaStore>, request_store: Arc<dyn RequestStore>) -> Self {
        Self {
            media_store,
            request_store,
        }
    }

    /// Recompute one media item's state and persist it together with the
    /// settings version it was computed under.
    pub fn refresh(
        &self,
        media: &Media,
        source_languages: &[Language],
        target_languages: &[Language],
        settings_version: i64,
    ) -> Result<TranslationState, MediaStoreError> {
        let sidecars = sidecar::find_sidecars(&media.path, &media.file_name);
        let embedded = self.media_store.embedded(media.kind, media.id)?;

        let has_active_request = self
            .request_store
            .has_active(media.kind, media.id)
            .unwrap_or_else(|e| {
                warn!(media_id = media.id, "request lookup failed: {}", e);
                false
            });
        let has_failed_request = self
            .request_store
            .has_failed(media.kind, media.id)
            .unwrap_or(false);

        let state = compute_state(&StateContext {
            excluded: media.excluded,
            source_languages,
            target_languages,
            has_active_request,
            has_failed_request,
            sidecars: &sidecars,
            embedded: &embedded,
        });

        if state != media.translation_state || media.state_settings_version != settings_version {
            debug!(
                media_id = media.id,
                kind = %media.kind,
                from = media.translation_state.as_str(),
                to = state.as_str(),
                "media state updated"
            );
            self.media_store
                .update_state(media.kind, media.id, state, settings_version)?;
        }
        Ok(state)
    }

    /// Flip every non-`NotApplicable` media to `Stale`. Called when the
    /// language settings version is bumped.
    pub fn mark_all_stale(&self) -> Result<usize, MediaStoreError> {
        self.media_store.mark_all_stale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn langs(codes: &[&str]) -> Vec<Language> {
        codes
            .iter()
            .map(|c| Language::new(*c, c.to_uppercase()))
            .collect()
    }

    fn sidecar(lang: &str) -> SidecarSubtitle {
        SidecarSubtitle {
            path: PathBuf::from(format!("/m/Movie.{}.srt", lang)),
            language: lang.to_string(),
        }
    }

    fn embedded(lang: &str, text_based: bool) -> EmbeddedSubtitle {
        EmbeddedSubtitle {
            stream_index: 0,
            language: lang.to_string(),
            title: String::new(),
            codec: if text_based { "ass" } else { "hdmv_pgs_subtitle" }.to_string(),
            is_text_based: text_based,
            is_default: false,
            is_forced: false,
            is_extracted: false,
            extracted_path: None,
        }
    }

    fn ctx<'a>(
        sources: &'a [Language],
        targets: &'a [Language],
        sidecars: &'a [SidecarSubtitle],
        embedded: &'a [EmbeddedSubtitle],
    ) -> StateContext<'a> {
        StateContext {
            excluded: false,
            source_languages: sources,
            target_languages: targets,
            has_active_request: false,
            has_failed_request: false,
            sidecars,
            embedded,
        }
    }

    #[test]
    fn test_excluded_wins_over_everything() {
        let sources = langs(&["en"]);
        let targets = langs(&["fr"]);
        let mut context = ctx(&sources, &targets, &[], &[]);
        context.excluded = true;
        context.has_active_request = true;
        assert_eq!(compute_state(&context), TranslationState::NotApplicable);
    }

    #[test]
    fn test_empty_language_lists() {
        let sources = langs(&["en"]);
        let targets = langs(&["fr"]);
        let none: Vec<Language> = Vec::new();
        assert_eq!(
            compute_state(&ctx(&none, &targets, &[], &[])),
            TranslationState::NotApplicable
        );
        assert_eq!(
            compute_state(&ctx(&sources, &none, &[], &[])),
            TranslationState::NotApplicable
        );
    }

    #[test]
    fn test_active_request_before_failed() {
        let sources = langs(&["en"]);
        let targets = langs(&["fr"]);
        let mut context = ctx(&sources, &targets, &[], &[]);
        context.has_active_request = true;
        context.has_failed_request = true;
        assert_eq!(compute_state(&context), TranslationState::InProgress);

        context.has_active_request = false;
        assert_eq!(compute_state(&context), TranslationState::Failed);
    }

    #[test]
    fn test_awaiting_source_without_any_source() {
        let sources = langs(&["en"]);
        let targets = langs(&["fr"]);
        // Sidecar in the wrong language, embedded only image-based English.
        let sidecars = vec![sidecar("de")];
        let embedded_subs = vec![embedded("eng", false)];
        assert_eq!(
            compute_state(&ctx(&sources, &targets, &sidecars, &embedded_subs)),
            TranslationState::AwaitingSource
        );
    }

    #[test]
    fn test_text_embedded_counts_as_source() {
        let sources = langs(&["en"]);
        let targets = langs(&["fr"]);
        let embedded_subs = vec![embedded("eng", true)];
        assert_eq!(
            compute_state(&ctx(&sources, &targets, &[], &embedded_subs)),
            TranslationState::Pending
        );
    }

    #[test]
    fn test_complete_when_all_targets_present() {
        let sources = langs(&["en"]);
        let targets = langs(&["fr", "de"]);
        let sidecars = vec![sidecar("en"), sidecar("fr"), sidecar("de")];
        assert_eq!(
            compute_state(&ctx(&sources, &targets, &sidecars, &[])),
            TranslationState::Complete
        );
    }

    #[test]
    fn test_pending_when_targets_missing() {
        let sources = langs(&["en"]);
        let targets = langs(&["fr", "de"]);
        let sidecars = vec![sidecar("en"), sidecar("fr")];
        assert_eq!(
            compute_state(&ctx(&sources, &targets, &sidecars, &[])),
            TranslationState::Pending
        );
    }
}
