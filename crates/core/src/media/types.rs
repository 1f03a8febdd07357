//! Core media data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The two kinds of translatable media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Episode,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Episode => "episode",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "movie" => Some(MediaKind::Movie),
            "episode" => Some(MediaKind::Episode),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-media translation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationState {
    /// Never evaluated.
    Unknown,
    /// Excluded from translation or no languages configured.
    NotApplicable,
    /// No usable source subtitle found yet.
    AwaitingSource,
    /// Source available, one or more targets missing.
    Pending,
    /// An active translation request exists.
    InProgress,
    /// A failed request exists.
    Failed,
    /// All configured targets present.
    Complete,
    /// Settings changed since the state was computed.
    Stale,
}

impl TranslationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationState::Unknown => "unknown",
            TranslationState::NotApplicable => "not_applicable",
            TranslationState::AwaitingSource => "awaiting_source",
            TranslationState::Pending => "pending",
            TranslationState::InProgress => "in_progress",
            TranslationState::Failed => "failed",
            TranslationState::Complete => "complete",
            TranslationState::Stale => "stale",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unknown" => Some(TranslationState::Unknown),
            "not_applicable" => Some(TranslationState::NotApplicable),
            "awaiting_source" => Some(TranslationState::AwaitingSource),
            "pending" => Some(TranslationState::Pending),
            "in_progress" => Some(TranslationState::InProgress),
            "failed" => Some(TranslationState::Failed),
            "complete" => Some(TranslationState::Complete),
            "stale" => Some(TranslationState::Stale),
            _ => None,
        }
    }
}

/// A subtitle track embedded in a media container.
///
/// `stream_index` is the position within the subtitle-only subset of the
/// container's streams and is unique per media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedSubtitle {
    pub stream_index: u32,
    pub language: String,
    pub title: String,
    pub codec: String,
    pub is_text_based: bool,
    pub is_default: bool,
    pub is_forced: bool,
    pub is_extracted: bool,
    pub extracted_path: Option<String>,
}

/// A movie or an episode, with parent flags already folded in for episodes.
///
/// The store resolves season/show exclusion and show-level priority when
/// loading, so `excluded` and `is_priority` are effective values.
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub id: i64,
    pub kind: MediaKind,
    pub external_id: i64,
    pub title: String,
    /// Directory containing the media file.
    pub path: PathBuf,
    /// Base filename without extension.
    pub file_name: String,
    pub media_hash: Option<String>,
    pub date_added: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub last_subtitle_check_at: Option<DateTime<Utc>>,
    pub excluded: bool,
    pub is_priority: bool,
    pub priority_date: Option<DateTime<Utc>>,
    /// Minimum age in hours before a freshly added item is translated.
    pub translation_age_threshold: Option<u32>,
    pub translation_state: TranslationState,
    pub state_settings_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    /// Full path of the media file given an on-disk extension.
    pub fn file_path(&self, extension: &str) -> PathBuf {
        self.path.join(format!("{}.{}", self.file_name, extension))
    }
}

/// A show as reported by the managing system.
#[derive(Debug, Clone, PartialEq)]
pub struct Show {
    pub id: i64,
    pub external_id: i64,
    pub title: String,
    pub path: PathBuf,
    pub exclude_from_translation: bool,
    pub is_priority: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A season within a show.
#[derive(Debug, Clone, PartialEq)]
pub struct Season {
    pub id: i64,
    pub show_id: i64,
    pub number: u32,
    pub exclude_from_translation: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
