//! Persistence confirmation of breaches

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{ConfirmationMode, DetectionConfig};
use crate::models::{MinuteBucket, ScopeKey};

use super::sources::{bounded, EventLog};

/// Inputs of one confirmation decision
#[derive(Debug, Clone, Copy)]
pub struct Breach<'a> {
    pub scope: &'a ScopeKey,
    /// Streak after recording the current cycle
    pub streak: u32,
    /// Raw errors in the current cycle
    pub current_errors: u64,
    /// Whether the event-log trend check applies (error-rate rules and the fallback detector)
    pub trend_applies: bool,
}

/// Gate that suppresses single-cycle noise
pub struct Confirmer {
    mode: ConfirmationMode,
    required_streak: u32,
    history_buckets: u32,
    history_error_ratio: f64,
    min_history_buckets: u32,
    min_consecutive_errors: u64,
    query_timeout: Duration,
    event_log: Arc<dyn EventLog>,
}

impl Confirmer {
    pub fn new(config: &DetectionConfig, event_log: Arc<dyn EventLog>) -> Self {
        Self {
            mode: config.confirmation,
            required_streak: config.required_streak,
            history_buckets: config.history_buckets,
            history_error_ratio: config.history_error_ratio,
            min_history_buckets: config.min_history_buckets,
            min_consecutive_errors: config.min_consecutive_errors,
            query_timeout: config.query_timeout,
            event_log,
        }
    }

    /// Whether the breach is real.
    ///
    /// Rules the trend check does not apply to are gated by their streak in
    /// every mode.
    pub async fn confirm(&self, breach: Breach<'_>) -> bool {
        let streak_ok = breach.streak >= self.required_streak;

        match (self.mode, breach.trend_applies) {
            (ConfirmationMode::Streak, _) | (_, false) => streak_ok,
            (ConfirmationMode::History, true) => self.trend_confirms(&breach).await,
            (ConfirmationMode::Both, true) => streak_ok && self.trend_confirms(&breach).await,
        }
    }

    async fn trend_confirms(&self, breach: &Breach<'_>) -> bool {
        if breach.current_errors < self.min_consecutive_errors {
            debug!(
                scope = %breach.scope,
                errors = breach.current_errors,
                required = self.min_consecutive_errors,
                "Too few errors to confirm trend"
            );
            return false;
        }

        let query = self.event_log.error_trend(breach.scope, self.history_buckets);
        match bounded("event_log", self.query_timeout, query).await {
            Ok(buckets) => {
                trend_holds(&buckets, self.min_history_buckets, self.history_error_ratio)
            }
            Err(e) => {
                warn!(scope = %breach.scope, error = %e, "Trend query failed, confirming breach");
                true
            }
        }
    }
}

/// At least `min_buckets` buckets, and at least `ratio` of them contain an error
pub fn trend_holds(buckets: &[MinuteBucket], min_buckets: u32, ratio: f64) -> bool {
    if buckets.is_empty() || buckets.len() < min_buckets as usize {
        return false;
    }
    let with_errors = buckets.iter().filter(|b| b.errors > 0).count();
    with_errors as f64 / buckets.len() as f64 >= ratio
}
