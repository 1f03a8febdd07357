// Allow some clippy lints that are too noisy for this codebase
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::collapsible_if)]

pub mod config;
pub mod events;
pub mod integrity;
pub mod inventory;
pub mod language;
pub mod media;
pub mod metrics;
pub mod probe;
pub mod request;
pub mod runner;
pub mod scheduler;
pub mod settings;
pub mod subtitle;
pub mod translate;

/// Testing utilities and mock implementations for E2E tests.
///
/// This module provides mock implementations of the external service ports,
/// allowing comprehensive E2E testing without real infrastructure.
pub mod testing;

pub use config::{load_config, load_config_from_str, validate_config, BackendConfig, Config, ConfigError, DatabaseConfig, ToolsConfig};
pub use events::{ProgressBroadcaster, ProgressEvent};
pub use inventory::{
    ExternalEpisode, ExternalMovie, ExternalShow, InventoryError, InventorySync, MediaInventory,
};
pub use language::Language;
pub use media::{
    compute_state, EmbeddedSubtitle, Media, MediaKind, MediaStore, MediaStoreError,
    SidecarSubtitle, SqliteMediaStore, StateContext, StateEngine, TranslationState,
};
pub use probe::{ContainerProber, FfmpegProber, MediaIndexer, ProbeError, ProberConfig};
pub use request::{
    LogLevel, RequestAttrs, RequestError, RequestFilter, RequestService, RequestStatus,
    RequestStore, SqliteRequestStore, TranslationRequest,
};
pub use runner::{JobRunner, TrialEvent, TrialReport, TrialRunner, TrialSource};
pub use scheduler::{
    ProviderGuard, Scheduler, SchedulerConfig, SchedulerCore, SchedulerError, SchedulerStatus,
};
pub use settings::{SettingsStore, SqliteSettingsStore, TranslationSettings};
pub use subtitle::{SubtitleDocument, SubtitleFormat, SubtitleItem};
pub use translate::{
    BatchOptions, BatchRetryMode, BatchTranslator, OpenAiCompatBackend, OpenAiCompatConfig,
    TranslationError, Translator,
};
