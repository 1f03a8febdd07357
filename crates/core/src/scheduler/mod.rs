//! Background scheduler: periodic library passes and job dispatch.
//!
//! Two cron-driven duties (indexing and translation scanning) feed the
//! request store; a polling dispatcher drains Pending requests into a
//! bounded worker pool. Shutdown signals every worker token and waits a
//! bounded grace period for acknowledgement.

mod breaker;
mod config;

pub use breaker::{GuardConfig, ProviderGuard};
pub use config::{SchedulerConfig, MAX_WORKER_CEILING};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::inventory::InventorySync;
use crate::language::Language;
use crate::media::{
    self, Media, MediaStore, StateEngine, TranslationState,
};
use crate::probe::MediaIndexer;
use crate::request::{RequestAttrs, RequestFilter, RequestService, RequestStatus};
use crate::runner::{BackendFault, JobRunner};
use crate::settings::{
    language_settings_version, ExtractionMode, SettingsStore, TranslationSettings,
};

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Cron scheduler error: {0}")]
    Cron(String),

    #[error("Scheduler already running")]
    AlreadyRunning,
}

/// Snapshot of the scheduler's state.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_workers: usize,
    pub pending_requests: usize,
}

/// Everything the background loops share.
pub struct SchedulerCore {
    config: SchedulerConfig,
    media_store: Arc<dyn MediaStore>,
    settings_store: Arc<dyn SettingsStore>,
    requests: Arc<RequestService>,
    state_engine: StateEngine,
    indexer: MediaIndexer,
    inventory_sync: Option<InventorySync>,
    runner: Arc<JobRunner>,
    guard: ProviderGuard,
    running: AtomicBool,
    active_workers: AtomicUsize,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        media_store: Arc<dyn MediaStore>,
        settings_store: Arc<dyn SettingsStore>,
        requests: Arc<RequestService>,
        state_engine: StateEngine,
        indexer: MediaIndexer,
        inventory_sync: Option<InventorySync>,
        runner: Arc<JobRunner>,
    ) -> Self {
        let guard = ProviderGuard::new(GuardConfig {
            rejection_threshold: config.provider_rejection_threshold,
            cooldown: Duration::from_secs(config.provider_cooldown_secs),
            daily_limit: (config.provider_daily_limit > 0).then_some(config.provider_daily_limit),
            daily_buffer: config.provider_daily_buffer,
        });
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            media_store,
            settings_store,
            requests,
            state_engine,
            indexer,
            inventory_sync,
            runner,
            guard,
            running: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            shutdown_tx,
        }
    }

    fn load_settings(&self) -> Option<TranslationSettings> {
        match TranslationSettings::load(self.settings_store.as_ref()) {
            Ok(settings) => Some(settings),
            Err(e) => {
                error!("could not load translation settings: {}", e);
                None
            }
        }
    }

    /// Indexing pass: mirror the external library, then (re)probe embedded
    /// streams of anything whose directory changed since the last probe.
    pub async fn run_indexing_pass(&self) {
        if let Some(sync) = &self.inventory_sync {
            if let Err(e) = sync.sync().await {
                warn!("library sync failed: {}", e);
            }
        }

        let Some(settings) = self.load_settings() else {
            return;
        };
        let version = language_settings_version(self.settings_store.as_ref()).unwrap_or(0);

        for kind in [media::MediaKind::Movie, media::MediaKind::Episode] {
            let items = match self.media_store.list(kind) {
                Ok(items) => items,
                Err(e) => {
                    warn!(%kind, "could not list media for indexing: {}", e);
                    continue;
                }
            };
            for media in items {
                if !needs_index(&media) {
                    continue;
                }
                match self.indexer.sync_embedded(&media).await {
                    Ok(_) => {
                        if settings.extraction_mode == ExtractionMode::ExtractAll {
                            if let Err(e) = self.indexer.extract_all_text_streams(&media).await {
                                warn!(media_id = media.id, "extract-all failed: {}", e);
                            }
                        }
                        let _ = self.state_engine.refresh(
                            &media,
                            &settings.source_languages,
                            &settings.target_languages,
                            version,
                        );
                    }
                    Err(e) => debug!(media_id = media.id, "indexing skipped: {}", e),
                }
            }
        }
    }

    /// Translation pass: refresh states of the next work slice and enqueue
    /// requests for every missing (source, target) pair.
    pub async fn run_translation_pass(&self) {
        let Some(settings) = self.load_settings() else {
            return;
        };
        if settings.source_languages.is_empty() || settings.target_languages.is_empty() {
            debug!("no languages configured, translation pass skipped");
            return;
        }
        let version = language_settings_version(self.settings_store.as_ref()).unwrap_or(0);

        let work = match self
            .media_store
            .next_work(self.config.scan_batch_size, true)
        {
            Ok(work) => work,
            Err(e) => {
                warn!("next-work query failed: {}", e);
                return;
            }
        };

        for media in work {
            let state = match self.state_engine.refresh(
                &media,
                &settings.source_languages,
                &settings.target_languages,
                version,
            ) {
                Ok(state) => state,
                Err(e) => {
                    warn!(media_id = media.id, "state refresh failed: {}", e);
                    continue;
                }
            };

            if state == TranslationState::Pending {
                if within_age_threshold(&media) {
                    debug!(
                        media_id = media.id,
                        "media younger than its translation age threshold, postponed"
                    );
                } else {
                    self.enqueue_missing_targets(&media, &settings);
                }
            }
            let _ = self.media_store.touch_subtitle_check(media.kind, media.id);
        }
    }

    fn enqueue_missing_targets(&self, media: &Media, settings: &TranslationSettings) {
        let sidecars = media::find_sidecars(&media.path, &media.file_name);
        let source = pick_source(&sidecars, &settings.source_languages);

        for target in &settings.target_languages {
            if media::has_language(&sidecars, &target.code) {
                continue;
            }
            let (source_language, source_path) = match &source {
                Some((language, sidecar)) => {
                    (language.code.clone(), Some(sidecar.path.clone()))
                }
                // No sidecar source: the job extracts from embedded streams.
                None => (
                    settings
                        .source_languages
                        .first()
                        .map(|l| l.code.clone())
                        .unwrap_or_default(),
                    None,
                ),
            };

            let attrs = RequestAttrs {
                title: media.title.clone(),
                source_language,
                target_language: target.code.clone(),
                source_path,
                media_kind: media.kind,
                media_id: media.id,
                is_priority: media.is_priority,
            };
            match self.requests.create(attrs, false) {
                Ok(request) => {
                    debug!(
                        request_id = %request.id,
                        media_id = media.id,
                        target = %target.code,
                        "request enqueued"
                    );
                }
                Err(e) => warn!(media_id = media.id, "request creation failed: {}", e),
            }
        }
    }

    /// One dispatch cycle: fill free worker slots with pending requests.
    /// Returns the number of jobs started.
    pub fn dispatch_pending(self: &Arc<Self>) -> usize {
        let Some(settings) = self.load_settings() else {
            return 0;
        };
        let provider = settings.service_type.clone();
        if !self.guard.allows(&provider) {
            debug!(provider, "provider not admitting work");
            return 0;
        }

        let max_workers = settings
            .max_parallel_translations
            .clamp(1, MAX_WORKER_CEILING);
        let active = self.active_workers.load(Ordering::SeqCst);
        let slots = max_workers.saturating_sub(active);
        if slots == 0 {
            return 0;
        }

        let pending = match self.requests.list(
            &RequestFilter::new()
                .with_status(RequestStatus::Pending)
                .with_limit(slots as i64),
        ) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("could not list pending requests: {}", e);
                return 0;
            }
        };

        let mut started = 0;
        for request in pending {
            if !self.guard.allows(&provider) {
                break;
            }
            self.spawn_job(request, settings.clone(), provider.clone());
            started += 1;
        }
        started
    }

    fn spawn_job(
        self: &Arc<Self>,
        request: crate::request::TranslationRequest,
        settings: TranslationSettings,
        provider: String,
    ) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        self.guard.record_call(&provider);
        let token = self.requests.register_worker(&request.id);
        let core = Arc::clone(self);

        tokio::spawn(async move {
            let outcome = core.runner.run(&request, &settings, token).await;

            match outcome.fault {
                Some(BackendFault::RateLimited) => core.guard.trip(&provider),
                Some(BackendFault::Rejected) => core.guard.record_rejection(&provider),
                None => {
                    if outcome.status == RequestStatus::Completed {
                        core.guard.record_success(&provider);
                    }
                }
            }

            core.requests.release_worker(&request.id);
            core.active_workers.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub fn status(&self) -> SchedulerStatus {
        let pending = self
            .requests
            .list(&RequestFilter::new().with_status(RequestStatus::Pending))
            .map(|p| p.len())
            .unwrap_or(0);
        SchedulerStatus {
            running: self.running.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            pending_requests: pending,
        }
    }
}

/// The public scheduler handle: owns the cron runtime and the dispatch loop.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    cron: tokio::sync::Mutex<Option<JobScheduler>>,
}

impl Scheduler {
    pub fn new(core: SchedulerCore) -> Self {
        Self {
            core: Arc::new(core),
            cron: tokio::sync::Mutex::new(None),
        }
    }

    pub fn core(&self) -> &Arc<SchedulerCore> {
        &self.core
    }

    /// Start the background loops. Crashed-process recovery runs first: any
    /// request stuck InProgress is failed and can be retried manually.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        match self
            .core
            .requests
            .store()
            .fail_interrupted("Translation was interrupted by a service restart")
        {
            Ok(0) => {}
            Ok(count) => info!(count, "failed interrupted requests from previous run"),
            Err(e) => warn!("interrupted-request recovery failed: {}", e),
        }

        self.spawn_dispatch_loop();

        let cron = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Cron(e.to_string()))?;

        let indexing_core = Arc::clone(&self.core);
        let indexing_job = Job::new_async(self.core.config.indexing_cron.as_str(), move |_uuid, _l| {
            let core = Arc::clone(&indexing_core);
            Box::pin(async move {
                info!("indexing pass started");
                core.run_indexing_pass().await;
            })
        })
        .map_err(|e| SchedulerError::Cron(e.to_string()))?;
        cron.add(indexing_job)
            .await
            .map_err(|e| SchedulerError::Cron(e.to_string()))?;

        let translation_core = Arc::clone(&self.core);
        let translation_job =
            Job::new_async(self.core.config.translation_cron.as_str(), move |_uuid, _l| {
                let core = Arc::clone(&translation_core);
                Box::pin(async move {
                    debug!("translation pass started");
                    core.run_translation_pass().await;
                })
            })
            .map_err(|e| SchedulerError::Cron(e.to_string()))?;
        cron.add(translation_job)
            .await
            .map_err(|e| SchedulerError::Cron(e.to_string()))?;

        cron.start()
            .await
            .map_err(|e| SchedulerError::Cron(e.to_string()))?;
        *self.cron.lock().await = Some(cron);

        info!("scheduler started");
        Ok(())
    }

    fn spawn_dispatch_loop(&self) {
        let core = Arc::clone(&self.core);
        let mut shutdown_rx = core.shutdown_tx.subscribe();
        let interval = Duration::from_millis(core.config.dispatch_poll_interval_ms);

        tokio::spawn(async move {
            info!("dispatch loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("dispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !core.running.load(Ordering::Relaxed) {
                            break;
                        }
                        let started = core.dispatch_pending();
                        if started > 0 {
                            debug!(started, "dispatched translation jobs");
                        }
                    }
                }
            }
            info!("dispatch loop stopped");
        });
    }

    /// Stop gracefully: signal every worker token, wait a bounded grace
    /// period for jobs to acknowledge, then tear down the cron runtime.
    pub async fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            warn!("scheduler not running");
            return;
        }

        let _ = self.core.shutdown_tx.send(());
        for token in self.core.requests.worker_tokens() {
            token.cancel();
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.core.config.shutdown_grace_ms);
        while self.core.active_workers.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.core.active_workers.load(Ordering::SeqCst),
                    "shutdown grace period elapsed with jobs still running"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Some(mut cron) = self.cron.lock().await.take() {
            if let Err(e) = cron.shutdown().await {
                warn!("cron shutdown failed: {}", e);
            }
        }

        info!("scheduler stopped");
    }
}

/// Whether a media item's embedded streams need (re)probing: never probed,
/// or the directory changed since the last probe.
fn needs_index(media: &Media) -> bool {
    let Some(indexed_at) = media.indexed_at else {
        return true;
    };
    match std::fs::metadata(&media.path).and_then(|m| m.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified) > indexed_at,
        // An unreadable directory cannot be probed either.
        Err(_) => false,
    }
}

/// Whether a media item is still inside its per-media waiting period. Fresh
/// additions are often replaced by better releases within days; the
/// threshold avoids translating a file that is about to disappear.
fn within_age_threshold(media: &Media) -> bool {
    match media.translation_age_threshold {
        Some(hours) => Utc::now() - media.date_added < chrono::Duration::hours(hours as i64),
        None => false,
    }
}

/// First sidecar matching the configured source languages, in priority
/// order.
fn pick_source<'a>(
    sidecars: &'a [media::SidecarSubtitle],
    sources: &'a [Language],
) -> Option<(&'a Language, &'a media::SidecarSubtitle)> {
    for language in sources {
        if let Some(sidecar) = media::find_language(sidecars, &language.code) {
            return Some((language, sidecar));
        }
    }
    None
}
