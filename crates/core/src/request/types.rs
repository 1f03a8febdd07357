//! Translation request data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::MediaKind;

/// Lifecycle status of a translation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Failed,
    Cancelled,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "in_progress" => Some(RequestStatus::InProgress),
            "failed" => Some(RequestStatus::Failed),
            "cancelled" => Some(RequestStatus::Cancelled),
            "completed" => Some(RequestStatus::Completed),
            _ => None,
        }
    }

    /// Active means the request still occupies the per-tuple singleton slot.
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::InProgress)
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted translation request.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    /// Unique identifier (UUID).
    pub id: String,
    /// Media title snapshot at creation time.
    pub title: String,
    pub source_language: String,
    pub target_language: String,
    /// Path of the source subtitle. `None` means the runner resolves a
    /// source by extracting from the media's embedded streams.
    pub source_path: Option<PathBuf>,
    /// Path of the translated subtitle, set on completion.
    pub translated_path: Option<PathBuf>,
    pub media_kind: MediaKind,
    pub media_id: i64,
    pub status: RequestStatus,
    /// 0..=100.
    pub progress: u8,
    pub is_priority: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TranslationRequest {
    /// The (media, language pair) tuple guarded by the active-singleton index.
    pub fn tuple(&self) -> (MediaKind, i64, &str, &str) {
        (
            self.media_kind,
            self.media_id,
            &self.source_language,
            &self.target_language,
        )
    }
}

/// Attributes for creating a translation request.
#[derive(Debug, Clone)]
pub struct RequestAttrs {
    pub title: String,
    pub source_language: String,
    pub target_language: String,
    pub source_path: Option<PathBuf>,
    pub media_kind: MediaKind,
    pub media_id: i64,
    pub is_priority: bool,
}

/// Severity of a request log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// A structured log line attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLogEntry {
    pub id: i64,
    pub request_id: String,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
