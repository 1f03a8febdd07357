//! Media storage trait and types.

use chrono::{DateTime, Utc};

use super::types::{EmbeddedSubtitle, Media, MediaKind, Season, Show, TranslationState};

/// Error type for media store operations.
#[derive(Debug, thiserror::Error)]
pub enum MediaStoreError {
    #[error("Media not found: {kind} {id}")]
    NotFound { kind: MediaKind, id: i64 },

    #[error("Database error: {0}")]
    Database(String),
}

/// Attributes for upserting a movie from the managing system.
#[derive(Debug, Clone)]
pub struct NewMovie {
    pub external_id: i64,
    pub title: String,
    pub path: String,
    pub file_name: String,
    pub media_hash: Option<String>,
    pub date_added: DateTime<Utc>,
}

/// Attributes for upserting a show.
#[derive(Debug, Clone)]
pub struct NewShow {
    pub external_id: i64,
    pub title: String,
    pub path: String,
}

/// Attributes for upserting a season of a show.
#[derive(Debug, Clone)]
pub struct NewSeason {
    pub show_id: i64,
    pub number: u32,
}

/// Attributes for upserting an episode.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub external_id: i64,
    pub show_id: i64,
    pub season_id: i64,
    pub title: String,
    pub path: String,
    pub file_name: String,
    pub media_hash: Option<String>,
    pub date_added: DateTime<Utc>,
}

/// Trait for media storage backends.
///
/// Episodes are returned with season/show exclusion and show priority folded
/// into the `excluded`/`is_priority` fields.
pub trait MediaStore: Send + Sync {
    fn upsert_movie(&self, new: NewMovie) -> Result<Media, MediaStoreError>;
    fn upsert_show(&self, new: NewShow) -> Result<Show, MediaStoreError>;
    fn upsert_season(&self, new: NewSeason) -> Result<Season, MediaStoreError>;
    fn upsert_episode(&self, new: NewEpisode) -> Result<Media, MediaStoreError>;

    fn get(&self, kind: MediaKind, id: i64) -> Result<Option<Media>, MediaStoreError>;

    /// All media of one kind, unordered.
    fn list(&self, kind: MediaKind) -> Result<Vec<Media>, MediaStoreError>;

    /// Embedded subtitle rows for a media item, ordered by stream index.
    fn embedded(&self, kind: MediaKind, id: i64) -> Result<Vec<EmbeddedSubtitle>, MediaStoreError>;

    /// Replace the full embedded set for a media item in one transaction and
    /// stamp `indexed_at`.
    fn replace_embedded(
        &self,
        kind: MediaKind,
        id: i64,
        subtitles: &[EmbeddedSubtitle],
    ) -> Result<(), MediaStoreError>;

    /// Record the on-disk path of an extracted embedded stream.
    fn mark_extracted(
        &self,
        kind: MediaKind,
        id: i64,
        stream_index: u32,
        path: &str,
    ) -> Result<(), MediaStoreError>;

    fn update_state(
        &self,
        kind: MediaKind,
        id: i64,
        state: TranslationState,
        settings_version: i64,
    ) -> Result<(), MediaStoreError>;

    fn set_exclusion(&self, kind: MediaKind, id: i64, excluded: bool)
        -> Result<(), MediaStoreError>;

    fn set_priority(
        &self,
        kind: MediaKind,
        id: i64,
        is_priority: bool,
        priority_date: Option<DateTime<Utc>>,
    ) -> Result<(), MediaStoreError>;

    /// Stamp `last_subtitle_check_at`.
    fn touch_subtitle_check(&self, kind: MediaKind, id: i64) -> Result<(), MediaStoreError>;

    /// Flip every non-`NotApplicable` media to `Stale`. Returns the number of
    /// rows changed.
    fn mark_all_stale(&self) -> Result<usize, MediaStoreError>;

    /// Up to `limit` media needing attention, balanced between movies and
    /// episodes, ordered per the scheduling rules.
    fn next_work(&self, limit: usize, priority_first: bool) -> Result<Vec<Media>, MediaStoreError>;
}
