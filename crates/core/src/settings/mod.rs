//! Runtime-mutable settings persisted as a key→value table.
//!
//! Unlike the daemon's static config file, these settings are editable while
//! the service runs. Jobs read a typed snapshot at start; mid-job changes
//! only affect later jobs. Changing the language lists bumps a monotone
//! version, which invalidates previously computed media states.

mod sqlite;

pub use sqlite::SqliteSettingsStore;

use std::time::Duration;

use crate::language::Language;
use crate::translate::{BatchOptions, BatchRetryMode, RetryPolicy};

/// Error type for settings operations.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Trait for settings storage backends.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// Well-known setting keys.
pub mod keys {
    pub const SERVICE_TYPE: &str = "service_type";
    pub const MAX_PARALLEL_TRANSLATIONS: &str = "max_parallel_translations";
    pub const USE_BATCH_TRANSLATION: &str = "use_batch_translation";
    pub const MAX_BATCH_SIZE: &str = "max_batch_size";
    pub const BATCH_RETRY_MODE: &str = "batch_retry_mode";
    pub const REPAIR_CONTEXT_RADIUS: &str = "repair_context_radius";
    pub const REPAIR_MAX_RETRIES: &str = "repair_max_retries";
    pub const MAX_BATCH_SPLIT_ATTEMPTS: &str = "max_batch_split_attempts";
    pub const MAX_RETRIES: &str = "max_retries";
    pub const RETRY_DELAY: &str = "retry_delay";
    pub const RETRY_DELAY_MULTIPLIER: &str = "retry_delay_multiplier";
    pub const REQUEST_TIMEOUT: &str = "request_timeout";
    pub const STRIP_SUBTITLE_FORMATTING: &str = "strip_subtitle_formatting";
    pub const CONTEXT_BEFORE: &str = "context_before";
    pub const CONTEXT_AFTER: &str = "context_after";
    pub const INTEGRITY_VALIDATION_ENABLED: &str = "integrity_validation_enabled";
    pub const SOURCE_LANGUAGES: &str = "source_languages";
    pub const TARGET_LANGUAGES: &str = "target_languages";
    pub const SUBTITLE_EXTRACTION_MODE: &str = "subtitle_extraction_mode";
    pub const USE_SUBTITLE_TAGGING: &str = "use_subtitle_tagging";
    pub const SUBTITLE_TAG: &str = "subtitle_tag";
    pub const LANGUAGE_SETTINGS_VERSION: &str = "language_settings_version";
}

/// How embedded subtitles are turned into files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Extract only when a job needs the stream as a source.
    OnDemand,
    /// Extract every text stream during indexing.
    ExtractAll,
}

impl ExtractionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "on_demand" => Some(ExtractionMode::OnDemand),
            "extract_all" => Some(ExtractionMode::ExtractAll),
            _ => None,
        }
    }
}

/// Typed snapshot of the translation settings, read once per job start.
#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub service_type: String,
    pub max_parallel_translations: usize,
    pub use_batch_translation: bool,
    pub batch: BatchOptions,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub integrity_validation_enabled: bool,
    pub source_languages: Vec<Language>,
    pub target_languages: Vec<Language>,
    pub extraction_mode: ExtractionMode,
    pub use_subtitle_tagging: bool,
    pub subtitle_tag: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            service_type: "localai".to_string(),
            max_parallel_translations: 1,
            use_batch_translation: true,
            batch: BatchOptions::default(),
            retry: RetryPolicy {
                max_retries: 20,
                base_delay: Duration::from_secs(120),
                multiplier: 1.0,
                max_delay: Duration::from_secs(3600),
            },
            request_timeout: Duration::from_secs(15),
            integrity_validation_enabled: false,
            source_languages: Vec::new(),
            target_languages: Vec::new(),
            extraction_mode: ExtractionMode::OnDemand,
            use_subtitle_tagging: false,
            subtitle_tag: "[Lingarr]".to_string(),
        }
    }
}

impl TranslationSettings {
    /// Load a snapshot from the store, falling back to defaults for missing
    /// or unparseable keys.
    pub fn load(store: &dyn SettingsStore) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let batch = BatchOptions {
            strip_formatting: get_bool(store, keys::STRIP_SUBTITLE_FORMATTING, false)?,
            max_batch_size: get_parsed(store, keys::MAX_BATCH_SIZE, 180)?,
            retry_mode: get_string(store, keys::BATCH_RETRY_MODE)?
                .and_then(|v| BatchRetryMode::parse(&v))
                .unwrap_or(BatchRetryMode::Deferred),
            max_split_attempts: get_parsed(store, keys::MAX_BATCH_SPLIT_ATTEMPTS, 3)?,
            repair_context_radius: get_parsed(store, keys::REPAIR_CONTEXT_RADIUS, 10)?,
            repair_max_retries: get_parsed(store, keys::REPAIR_MAX_RETRIES, 1)?,
            context_before: get_parsed(store, keys::CONTEXT_BEFORE, 0)?,
            context_after: get_parsed(store, keys::CONTEXT_AFTER, 0)?,
        };

        let retry = RetryPolicy {
            max_retries: get_parsed(store, keys::MAX_RETRIES, 20)?,
            base_delay: Duration::from_secs(get_parsed(store, keys::RETRY_DELAY, 120)?),
            multiplier: get_parsed(store, keys::RETRY_DELAY_MULTIPLIER, 1.0)?,
            max_delay: defaults.retry.max_delay,
        };

        Ok(Self {
            service_type: get_string(store, keys::SERVICE_TYPE)?
                .unwrap_or_else(|| defaults.service_type.clone()),
            max_parallel_translations: get_parsed(store, keys::MAX_PARALLEL_TRANSLATIONS, 1)?,
            use_batch_translation: get_bool(store, keys::USE_BATCH_TRANSLATION, true)?,
            batch,
            retry,
            request_timeout: Duration::from_secs(get_parsed(store, keys::REQUEST_TIMEOUT, 15)?),
            integrity_validation_enabled: get_bool(
                store,
                keys::INTEGRITY_VALIDATION_ENABLED,
                false,
            )?,
            source_languages: get_languages(store, keys::SOURCE_LANGUAGES)?,
            target_languages: get_languages(store, keys::TARGET_LANGUAGES)?,
            extraction_mode: get_string(store, keys::SUBTITLE_EXTRACTION_MODE)?
                .and_then(|v| ExtractionMode::parse(&v))
                .unwrap_or(ExtractionMode::OnDemand),
            use_subtitle_tagging: get_bool(store, keys::USE_SUBTITLE_TAGGING, false)?,
            subtitle_tag: get_string(store, keys::SUBTITLE_TAG)?
                .unwrap_or_else(|| defaults.subtitle_tag.clone()),
        })
    }
}

/// Current language settings version (0 when never set).
pub fn language_settings_version(store: &dyn SettingsStore) -> Result<i64, SettingsError> {
    Ok(store
        .get(keys::LANGUAGE_SETTINGS_VERSION)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

/// Replace the language lists and bump the settings version. Callers must
/// follow up with `StateEngine::mark_all_stale`.
pub fn set_languages(
    store: &dyn SettingsStore,
    source: &[Language],
    target: &[Language],
) -> Result<i64, SettingsError> {
    let source_json = serde_json::to_string(source)
        .map_err(|e| SettingsError::Database(e.to_string()))?;
    let target_json = serde_json::to_string(target)
        .map_err(|e| SettingsError::Database(e.to_string()))?;
    store.set(keys::SOURCE_LANGUAGES, &source_json)?;
    store.set(keys::TARGET_LANGUAGES, &target_json)?;

    let version = language_settings_version(store)? + 1;
    store.set(keys::LANGUAGE_SETTINGS_VERSION, &version.to_string())?;
    Ok(version)
}

fn get_string(store: &dyn SettingsStore, key: &str) -> Result<Option<String>, SettingsError> {
    store.get(key)
}

fn get_bool(store: &dyn SettingsStore, key: &str, default: bool) -> Result<bool, SettingsError> {
    Ok(store
        .get(key)?
        .map(|v| matches!(v.as_str(), "true" | "1"))
        .unwrap_or(default))
}

fn get_parsed<T: std::str::FromStr>(
    store: &dyn SettingsStore,
    key: &str,
    default: T,
) -> Result<T, SettingsError> {
    Ok(store
        .get(key)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

fn get_languages(store: &dyn SettingsStore, key: &str) -> Result<Vec<Language>, SettingsError> {
    match store.get(key)? {
        Some(json) => serde_json::from_str(&json).map_err(|_| SettingsError::InvalidValue {
            key: key.to_string(),
            value: json,
        }),
        None => Ok(Vec::new()),
    }
}
