//! Prometheus metrics for core components.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Requests finished, by terminal status.
pub static REQUESTS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sublingo_requests_finished_total",
            "Translation requests finished",
        ),
        &["status"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Subtitle lines translated by a backend.
pub static LINES_TRANSLATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "sublingo_lines_translated_total",
        "Subtitle lines translated",
    )
    .unwrap()
});

/// Backend calls, by outcome.
pub static BACKEND_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("sublingo_backend_calls_total", "Translation backend calls"),
        &["provider", "outcome"], // "ok", "rate_limited", "invalid", "failure", "rejected"
    )
    .unwrap()
});

/// Batch fallback engagements, by kind.
pub static BATCH_FALLBACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sublingo_batch_fallbacks_total",
            "Batch alignment fallbacks engaged",
        ),
        &["mode"], // "split", "repair"
    )
    .unwrap()
});

/// Embedded streams extracted from containers.
pub static STREAMS_EXTRACTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "sublingo_streams_extracted_total",
        "Embedded subtitle streams extracted",
    )
    .unwrap()
});

/// Job durations in seconds, by terminal status.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "sublingo_job_duration_seconds",
            "Duration of translation jobs",
        )
        .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["status"],
    )
    .unwrap()
});

/// Register all metrics on the given registry.
pub fn register_all(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(REQUESTS_FINISHED.clone()))?;
    registry.register(Box::new(LINES_TRANSLATED.clone()))?;
    registry.register(Box::new(BACKEND_CALLS.clone()))?;
    registry.register(Box::new(BATCH_FALLBACKS.clone()))?;
    registry.register(Box::new(STREAMS_EXTRACTED.clone()))?;
    registry.register(Box::new(JOB_DURATION.clone()))?;
    Ok(())
}
