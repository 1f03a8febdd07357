use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sublingo_core::{
    load_config, validate_config, ContainerProber, FfmpegProber, JobRunner, MediaIndexer,
    OpenAiCompatBackend, OpenAiCompatConfig, ProberConfig, ProgressBroadcaster, RequestService,
    Scheduler, SchedulerCore, SqliteMediaStore, SqliteRequestStore, SqliteSettingsStore,
    StateEngine, TranslationSettings, Translator,
};

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("sublingo {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("SUBLINGO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!("Database path: {:?}", config.database.path);

    // Stores share one SQLite file
    let media_store = Arc::new(
        SqliteMediaStore::new(&config.database.path).context("Failed to open media store")?,
    );
    let request_store = Arc::new(
        SqliteRequestStore::new(&config.database.path).context("Failed to open request store")?,
    );
    let settings_store = Arc::new(
        SqliteSettingsStore::new(&config.database.path)
            .context("Failed to open settings store")?,
    );
    info!("Stores initialized");

    // Metrics registry
    let registry = prometheus::Registry::new();
    sublingo_core::metrics::register_all(&registry).context("Failed to register metrics")?;

    // Progress events: forward to the log until a UI layer subscribes
    let events = ProgressBroadcaster::default();
    let mut progress_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = progress_rx.recv().await {
            info!(
                request_id = %event.request_id,
                progress = event.progress,
                status = %event.status,
                "translation progress"
            );
        }
    });

    let requests = Arc::new(RequestService::new(request_store.clone(), events));

    // Container tool
    let prober: Arc<dyn ContainerProber> = Arc::new(FfmpegProber::new(ProberConfig {
        ffprobe_path: config.tools.ffprobe_path.clone(),
        ffmpeg_path: config.tools.ffmpeg_path.clone(),
    }));
    if prober.is_available().await {
        info!("Container tool available at {:?}", config.tools.ffprobe_path);
    } else {
        warn!("Container tool not available, embedded subtitle support disabled");
    }

    // Translation backend; the request timeout follows the runtime settings
    let settings = TranslationSettings::load(settings_store.as_ref())
        .context("Failed to load translation settings")?;
    let backend: Arc<dyn Translator> = Arc::new(OpenAiCompatBackend::new(
        settings.service_type.clone(),
        OpenAiCompatConfig {
            base_url: config.backend.base_url.clone(),
            api_key: config.backend.api_key.clone(),
            model: config.backend.model.clone(),
            request_timeout: settings.request_timeout,
        },
    ));
    info!(
        provider = %settings.service_type,
        model = %config.backend.model,
        "Translation backend configured"
    );
    if settings.source_languages.is_empty() || settings.target_languages.is_empty() {
        warn!("No source/target languages configured yet; nothing will be translated");
    }

    let runner = Arc::new(JobRunner::new(
        Arc::clone(&requests),
        media_store.clone(),
        Arc::clone(&prober),
        backend,
    ));

    let scheduler = Scheduler::new(SchedulerCore::new(
        config.scheduler.clone(),
        media_store.clone(),
        settings_store.clone(),
        Arc::clone(&requests),
        StateEngine::new(media_store.clone(), request_store),
        MediaIndexer::new(Arc::clone(&prober), media_store),
        // Concrete media-manager adapters plug in here; none ship by default.
        None,
        runner,
    ));

    if config.scheduler.enabled {
        scheduler.start().await.context("Failed to start scheduler")?;
    } else {
        info!("Scheduler disabled by configuration");
    }

    shutdown_signal().await;
    info!("Shutdown signal received");

    scheduler.stop().await;
    info!("sublingo stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
