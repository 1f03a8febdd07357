//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Hard ceiling on parallel translations regardless of settings.
pub const MAX_WORKER_CEILING: usize = 8;

/// Configuration for the background scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable/disable the background loops. When disabled, requests must be
    /// created and dispatched manually.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Cron expression for the indexing pass (library sync + stream probe).
    #[serde(default = "default_indexing_cron")]
    pub indexing_cron: String,

    /// Cron expression for the translation pass (state scan + enqueue).
    #[serde(default = "default_translation_cron")]
    pub translation_cron: String,

    /// How often the dispatcher polls for pending requests (milliseconds).
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_poll_interval_ms: u64,

    /// Media items examined per translation pass.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// How long shutdown waits for running jobs to acknowledge cancellation
    /// (milliseconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Consecutive provider rejections before the breaker trips.
    #[serde(default = "default_rejection_threshold")]
    pub provider_rejection_threshold: u32,

    /// Breaker cooldown in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub provider_cooldown_secs: u64,

    /// Daily provider call limit (0 = unlimited).
    #[serde(default)]
    pub provider_daily_limit: u32,

    /// Calls held back from the daily limit.
    #[serde(default = "default_daily_buffer")]
    pub provider_daily_buffer: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_indexing_cron() -> String {
    // Every hour.
    "0 0 * * * *".to_string()
}

fn default_translation_cron() -> String {
    // Every 15 minutes.
    "0 */15 * * * *".to_string()
}

fn default_dispatch_interval() -> u64 {
    5000
}

fn default_scan_batch_size() -> usize {
    50
}

fn default_shutdown_grace() -> u64 {
    5000
}

fn default_rejection_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_daily_buffer() -> u32 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            indexing_cron: default_indexing_cron(),
            translation_cron: default_translation_cron(),
            dispatch_poll_interval_ms: default_dispatch_interval(),
            scan_batch_size: default_scan_batch_size(),
            shutdown_grace_ms: default_shutdown_grace(),
            provider_rejection_threshold: default_rejection_threshold(),
            provider_cooldown_secs: default_cooldown_secs(),
            provider_daily_limit: 0,
            provider_daily_buffer: default_daily_buffer(),
        }
    }
}
