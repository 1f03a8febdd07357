//! Per-provider admission control: circuit breaker plus daily budget.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

/// Admission rules for translation providers.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Consecutive hard rejections before the breaker trips.
    pub rejection_threshold: u32,
    /// How long a tripped provider stays skipped.
    pub cooldown: Duration,
    /// Provider calls allowed per day (None = unlimited).
    pub daily_limit: Option<u32>,
    /// Calls held back from the daily limit as a safety margin.
    pub daily_buffer: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rejection_threshold: 3,
            cooldown: Duration::from_secs(300),
            daily_limit: None,
            daily_buffer: 10,
        }
    }
}

#[derive(Debug)]
struct ProviderState {
    cooldown_until: Option<Instant>,
    consecutive_rejections: u32,
    calls_today: u32,
    day: NaiveDate,
}

impl ProviderState {
    fn new() -> Self {
        Self {
            cooldown_until: None,
            consecutive_rejections: 0,
            calls_today: 0,
            day: Utc::now().date_naive(),
        }
    }

    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if self.day != today {
            self.day = today;
            self.calls_today = 0;
        }
    }
}

/// Tracks per-provider cooldowns and daily usage.
///
/// Lifetime is the process: a restart clears all breaker state, matching the
/// expectation that an operator restart is also a manual reset.
pub struct ProviderGuard {
    config: GuardConfig,
    providers: Mutex<HashMap<String, ProviderState>>,
}

impl ProviderGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Whether work may be dispatched to this provider right now.
    pub fn allows(&self, provider: &str) -> bool {
        let mut providers = self.providers.lock().unwrap();
        let state = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderState::new);
        state.roll_day();

        if let Some(until) = state.cooldown_until {
            if Instant::now() < until {
                return false;
            }
            state.cooldown_until = None;
            state.consecutive_rejections = 0;
            info!(provider, "provider cooldown elapsed, resuming dispatch");
        }

        if let Some(limit) = self.config.daily_limit {
            let budget = limit.saturating_sub(self.config.daily_buffer);
            if state.calls_today >= budget {
                return false;
            }
        }
        true
    }

    /// Count one dispatched job against the daily budget.
    pub fn record_call(&self, provider: &str) {
        let mut providers = self.providers.lock().unwrap();
        let state = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderState::new);
        state.roll_day();
        state.calls_today += 1;
    }

    /// A job finished without backend trouble.
    pub fn record_success(&self, provider: &str) {
        let mut providers = self.providers.lock().unwrap();
        if let Some(state) = providers.get_mut(provider) {
            state.consecutive_rejections = 0;
        }
    }

    /// The provider rejected a request outright (auth, 4xx). Repeated
    /// rejections trip the breaker.
    pub fn record_rejection(&self, provider: &str) {
        let mut providers = self.providers.lock().unwrap();
        let state = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderState::new);
        state.consecutive_rejections += 1;
        if state.consecutive_rejections >= self.config.rejection_threshold {
            state.cooldown_until = Some(Instant::now() + self.config.cooldown);
            warn!(
                provider,
                rejections = state.consecutive_rejections,
                cooldown_secs = self.config.cooldown.as_secs(),
                "provider breaker tripped"
            );
        }
    }

    /// The provider reported its daily limit; trip immediately.
    pub fn trip(&self, provider: &str) {
        let mut providers = self.providers.lock().unwrap();
        let state = providers
            .entry(provider.to_string())
            .or_insert_with(ProviderState::new);
        state.cooldown_until = Some(Instant::now() + self.config.cooldown);
        warn!(
            provider,
            cooldown_secs = self.config.cooldown.as_secs(),
            "provider breaker tripped directly"
        );
    }
}
