//! Request storage trait and types.

use crate::media::MediaKind;

use super::types::{
    LogLevel, RequestAttrs, RequestLogEntry, RequestStatus, TranslationRequest,
};

/// Error type for request store operations.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} request {id}: status is {status}")]
    InvalidStatus {
        id: String,
        status: RequestStatus,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

/// Outcome of a create call: either a fresh row or the already-active one
/// the unique index pointed us back to.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(TranslationRequest),
    Existing(TranslationRequest),
}

impl CreateOutcome {
    pub fn request(&self) -> &TranslationRequest {
        match self {
            CreateOutcome::Created(r) | CreateOutcome::Existing(r) => r,
        }
    }

    pub fn into_request(self) -> TranslationRequest {
        match self {
            CreateOutcome::Created(r) | CreateOutcome::Existing(r) => r,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Filter for querying requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub media: Option<(MediaKind, i64)>,
    pub limit: Option<i64>,
}

impl RequestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_media(mut self, kind: MediaKind, id: i64) -> Self {
        self.media = Some((kind, id));
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Trait for request storage backends.
///
/// The store is the single authority for the active-singleton invariant: at
/// most one row per (media, source, target) tuple is active at any instant,
/// enforced by a unique partial index. All admission goes through `create`.
pub trait RequestStore: Send + Sync {
    /// Create a request, or return the active row already holding the tuple.
    fn create(&self, attrs: RequestAttrs) -> Result<CreateOutcome, RequestError>;

    fn get(&self, id: &str) -> Result<Option<TranslationRequest>, RequestError>;

    /// List requests matching the filter, pending-first by priority then age.
    fn list(&self, filter: &RequestFilter) -> Result<Vec<TranslationRequest>, RequestError>;

    /// Transition a request's status, maintaining `is_active` and
    /// `completed_at` along the way. Transitions out of a terminal status
    /// are rejected.
    fn update_status(&self, id: &str, status: RequestStatus) -> Result<TranslationRequest, RequestError>;

    fn set_progress(&self, id: &str, progress: u8) -> Result<(), RequestError>;

    fn set_translated_path(&self, id: &str, path: &str) -> Result<(), RequestError>;

    /// The active request for a tuple, if any.
    fn active_for(
        &self,
        kind: MediaKind,
        media_id: i64,
        source: &str,
        target: &str,
    ) -> Result<Option<TranslationRequest>, RequestError>;

    /// Most recent completed request for a tuple, if any.
    fn latest_completed_for(
        &self,
        kind: MediaKind,
        media_id: i64,
        source: &str,
        target: &str,
    ) -> Result<Option<TranslationRequest>, RequestError>;

    fn has_active(&self, kind: MediaKind, media_id: i64) -> Result<bool, RequestError>;

    fn has_failed(&self, kind: MediaKind, media_id: i64) -> Result<bool, RequestError>;

    /// Flip every InProgress row to Failed. Called once on startup to clean
    /// up after a crashed process; returns the number of rows changed.
    fn fail_interrupted(&self, message: &str) -> Result<usize, RequestError>;

    /// Delete a terminal request and its logs.
    fn remove(&self, id: &str) -> Result<TranslationRequest, RequestError>;

    fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Result<(), RequestError>;

    fn logs(&self, id: &str) -> Result<Vec<RequestLogEntry>, RequestError>;
}
