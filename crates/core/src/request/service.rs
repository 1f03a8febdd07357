//! Request lifecycle service: admission, cancellation, retry, logging.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{ProgressBroadcaster, ProgressEvent};

use super::store::{RequestError, RequestFilter, RequestStore};
use super::types::{LogLevel, RequestAttrs, RequestLogEntry, RequestStatus, TranslationRequest};

/// Coordinates request rows, per-job cancellation tokens and progress events.
///
/// The store's unique partial index is the authority on deduplication; this
/// service layers the user-facing operations on top of it.
pub struct RequestService {
    store: Arc<dyn RequestStore>,
    events: ProgressBroadcaster,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl RequestService {
    pub fn new(store: Arc<dyn RequestStore>, events: ProgressBroadcaster) -> Self {
        Self {
            store,
            events,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    pub fn events(&self) -> &ProgressBroadcaster {
        &self.events
    }

    /// Create a request for a (media, source, target) tuple.
    ///
    /// An active row for the tuple is always returned as-is. Without `force`,
    /// a previously completed translation whose output file still exists is
    /// also returned instead of re-queuing the same work; `force` requests a
    /// fresh translation regardless.
    pub fn create(
        &self,
        attrs: RequestAttrs,
        force: bool,
    ) -> Result<TranslationRequest, RequestError> {
        if let Some(active) = self.store.active_for(
            attrs.media_kind,
            attrs.media_id,
            &attrs.source_language,
            &attrs.target_language,
        )? {
            debug!(request_id = %active.id, "returning existing active request");
            return Ok(active);
        }

        if !force {
            if let Some(completed) = self.store.latest_completed_for(
                attrs.media_kind,
                attrs.media_id,
                &attrs.source_language,
                &attrs.target_language,
            )? {
                let output_exists = completed
                    .translated_path
                    .as_ref()
                    .map(|p| p.exists())
                    .unwrap_or(false);
                if output_exists {
                    debug!(request_id = %completed.id, "translation already completed");
                    return Ok(completed);
                }
            }
        }

        let outcome = self.store.create(attrs)?;
        if outcome.was_created() {
            info!(
                request_id = %outcome.request().id,
                source = %outcome.request().source_language,
                target = %outcome.request().target_language,
                "created translation request"
            );
        }
        Ok(outcome.into_request())
    }

    /// Register a cancellation token for a request a worker is about to run.
    pub fn register_worker(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap()
            .insert(id.to_string(), token.clone());
        token
    }

    /// Drop the token once the worker is done with the request.
    pub fn release_worker(&self, id: &str) {
        self.tokens.lock().unwrap().remove(id);
    }

    /// Tokens of every registered worker, for shutdown propagation.
    pub fn worker_tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().values().cloned().collect()
    }

    fn worker_token(&self, id: &str) -> Option<CancellationToken> {
        self.tokens.lock().unwrap().get(id).cloned()
    }

    /// Cancel a request.
    ///
    /// Pending rows transition immediately. InProgress rows are signalled via
    /// their worker's token and transition when the runner acknowledges; if
    /// no worker holds the request (e.g. after a crash) it transitions
    /// directly.
    pub fn cancel(&self, id: &str) -> Result<TranslationRequest, RequestError> {
        let request = self
            .store
            .get(id)?
            .ok_or_else(|| RequestError::NotFound(id.to_string()))?;

        match request.status {
            RequestStatus::Pending => {
                let cancelled = self.store.update_status(id, RequestStatus::Cancelled)?;
                self.publish(&cancelled);
                Ok(cancelled)
            }
            RequestStatus::InProgress => match self.worker_token(id) {
                Some(token) => {
                    info!(request_id = %id, "signalling cancellation to running job");
                    token.cancel();
                    Ok(request)
                }
                None => {
                    warn!(request_id = %id, "in-progress request has no worker, cancelling directly");
                    let cancelled = self.store.update_status(id, RequestStatus::Cancelled)?;
                    self.publish(&cancelled);
                    Ok(cancelled)
                }
            },
            status => Err(RequestError::InvalidStatus {
                id: id.to_string(),
                status,
                operation: "cancel".to_string(),
            }),
        }
    }

    /// Re-queue a failed or cancelled request as a fresh Pending row. The
    /// original row is kept for history.
    pub fn retry(&self, id: &str) -> Result<TranslationRequest, RequestError> {
        let request = self
            .store
            .get(id)?
            .ok_or_else(|| RequestError::NotFound(id.to_string()))?;

        if !matches!(
            request.status,
            RequestStatus::Failed | RequestStatus::Cancelled
        ) {
            return Err(RequestError::InvalidStatus {
                id: id.to_string(),
                status: request.status,
                operation: "retry".to_string(),
            });
        }

        let attrs = RequestAttrs {
            title: request.title.clone(),
            source_language: request.source_language.clone(),
            target_language: request.target_language.clone(),
            source_path: request.source_path.clone(),
            media_kind: request.media_kind,
            media_id: request.media_id,
            is_priority: request.is_priority,
        };
        let fresh = self.store.create(attrs)?.into_request();
        info!(old = %id, new = %fresh.id, "retried request");
        Ok(fresh)
    }

    /// Retry every failed request. Returns the fresh rows.
    pub fn retry_all_failed(&self) -> Result<Vec<TranslationRequest>, RequestError> {
        let failed = self
            .store
            .list(&RequestFilter::new().with_status(RequestStatus::Failed))?;
        let mut fresh = Vec::new();
        for request in failed {
            fresh.push(self.retry(&request.id)?);
        }
        Ok(fresh)
    }

    /// Cancel every Pending request. Returns the number cancelled.
    pub fn cancel_all_queued(&self) -> Result<usize, RequestError> {
        let pending = self
            .store
            .list(&RequestFilter::new().with_status(RequestStatus::Pending))?;
        let count = pending.len();
        for request in pending {
            let cancelled = self.store.update_status(&request.id, RequestStatus::Cancelled)?;
            self.publish(&cancelled);
        }
        Ok(count)
    }

    /// Push orphaned InProgress rows (no registered worker) back to Pending
    /// so the dispatcher picks them up again. Returns the number re-queued.
    pub fn reenqueue_queued(&self) -> Result<usize, RequestError> {
        let in_progress = self
            .store
            .list(&RequestFilter::new().with_status(RequestStatus::InProgress))?;
        let mut count = 0;
        for request in in_progress {
            if self.worker_token(&request.id).is_none() {
                self.store.update_status(&request.id, RequestStatus::Pending)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Record progress and publish it to subscribers.
    pub fn report_progress(&self, id: &str, progress: u8, status: RequestStatus) {
        if let Err(e) = self.store.set_progress(id, progress) {
            warn!(request_id = %id, "failed to persist progress: {}", e);
        }
        self.events.publish(ProgressEvent {
            request_id: id.to_string(),
            progress,
            status,
        });
    }

    /// Append a log line to a request. This is the single channel of
    /// user-visible job progress; duplicates are kept as-is.
    pub fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        details: Option<serde_json::Value>,
    ) {
        if let Err(e) = self.store.append_log(id, level, message, details) {
            warn!(request_id = %id, "failed to append request log: {}", e);
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<TranslationRequest>, RequestError> {
        self.store.get(id)
    }

    pub fn list(&self, filter: &RequestFilter) -> Result<Vec<TranslationRequest>, RequestError> {
        self.store.list(filter)
    }

    pub fn logs(&self, id: &str) -> Result<Vec<RequestLogEntry>, RequestError> {
        self.store.logs(id)
    }

    pub fn remove(&self, id: &str) -> Result<TranslationRequest, RequestError> {
        self.store.remove(id)
    }

    fn publish(&self, request: &TranslationRequest) {
        self.events.publish(ProgressEvent {
            request_id: request.id.clone(),
            progress: request.progress,
            status: request.status,
        });
    }
}
