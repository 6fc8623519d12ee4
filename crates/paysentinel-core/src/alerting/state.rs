//! Per-key detection state: streaks, cooldowns and recovery
//!
//! Every [`EvaluationKey`] moves through
//! `QUIET -> ACCUMULATING -> ALERTING -> COOLDOWN -> QUIET`. A key without an
//! entry is QUIET. The store is owned by one engine instance; all mutation
//! happens inside a single map entry so no guard outlives a call.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::models::ScopeKey;

/// What is being tracked for a scope key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "rule_id", rename_all = "snake_case")]
pub enum DetectorId {
    /// A configured alert rule
    Rule(Uuid),
    /// The statistical fallback detector
    Fallback,
}

impl DetectorId {
    /// Label used on metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rule(_) => "rule",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for DetectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(id) => write!(f, "rule:{id}"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// Unit of streak, cooldown and dedup tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EvaluationKey {
    pub scope: ScopeKey,
    pub detector: DetectorId,
}

impl EvaluationKey {
    pub fn new(scope: ScopeKey, detector: DetectorId) -> Self {
        Self { scope, detector }
    }
}

impl fmt::Display for EvaluationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.detector)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionStatus {
    #[default]
    Quiet,
    Accumulating,
    Alerting,
    Cooldown,
}

/// State of one evaluation key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionState {
    /// Consecutive breaching cycles
    pub streak: u32,
    /// Last cycle the condition held
    pub last_breach_at: Option<DateTime<Utc>>,
    /// Last alert emitted for the key
    pub last_alert_at: Option<DateTime<Utc>>,
    pub status: DetectionStatus,
    /// Last breach or alert; clear observations do not refresh it
    pub touched_at: DateTime<Utc>,
}

impl DetectionState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            streak: 0,
            last_breach_at: None,
            last_alert_at: None,
            status: DetectionStatus::Quiet,
            touched_at: now,
        }
    }
}

/// Concurrent map of [`DetectionState`] keyed by [`EvaluationKey`]
#[derive(Debug, Default)]
pub struct StateStore {
    states: DashMap<EvaluationKey, DetectionState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the key's state, if tracked
    pub fn get(&self, key: &EvaluationKey) -> Option<DetectionState> {
        self.states.get(key).map(|entry| entry.value().clone())
    }

    /// Current status; untracked keys are QUIET
    pub fn status(&self, key: &EvaluationKey) -> DetectionStatus {
        self.states
            .get(key)
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    /// Whether the key has alerted and not yet recovered
    pub fn is_open(&self, key: &EvaluationKey) -> bool {
        matches!(
            self.status(key),
            DetectionStatus::Alerting | DetectionStatus::Cooldown
        )
    }

    /// Drop the key's state entirely (recovery). Returns whether it was tracked.
    pub fn clear(&self, key: &EvaluationKey) -> bool {
        self.states.remove(key).is_some()
    }

    /// Record a cycle in which the condition did not hold.
    ///
    /// An accumulating streak is discarded; a key with an open alert keeps its
    /// cooldown stamp with the streak reset.
    pub fn record_clear(&self, key: &EvaluationKey) {
        self.states.remove_if(key, |_, state| {
            matches!(state.status, DetectionStatus::Quiet | DetectionStatus::Accumulating)
        });
        if let Some(mut state) = self.states.get_mut(key) {
            state.streak = 0;
        }
    }

    /// Record a breaching cycle and return the resulting streak.
    ///
    /// A streak whose previous breach is older than `expiry` restarts at 1.
    pub fn record_breach(&self, key: &EvaluationKey, now: DateTime<Utc>, expiry: Duration) -> u32 {
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(|| DetectionState::new(now));
        let state = entry.value_mut();

        let expired = state
            .last_breach_at
            .map_or(false, |at| elapsed(at, now) > expiry);
        state.streak = if expired { 1 } else { state.streak.saturating_add(1) };
        state.last_breach_at = Some(now);
        state.touched_at = now;
        if state.status == DetectionStatus::Quiet {
            state.status = DetectionStatus::Accumulating;
        }
        state.streak
    }

    /// Whether the key alerted less than `cooldown` ago
    pub fn in_cooldown(&self, key: &EvaluationKey, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.states
            .get(key)
            .and_then(|entry| entry.last_alert_at)
            .map_or(false, |at| elapsed(at, now) < cooldown)
    }

    /// Claim the key for emission. Fails if an emission is already in flight.
    pub fn begin_alert(&self, key: &EvaluationKey, now: DateTime<Utc>) -> bool {
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(|| DetectionState::new(now));
        let state = entry.value_mut();

        if state.status == DetectionStatus::Alerting {
            return false;
        }
        state.status = DetectionStatus::Alerting;
        state.touched_at = now;
        true
    }

    /// Stamp the emitted alert and move the key to COOLDOWN
    pub fn finish_alert(&self, key: &EvaluationKey, now: DateTime<Utc>) {
        let mut entry = self
            .states
            .entry(key.clone())
            .or_insert_with(|| DetectionState::new(now));
        let state = entry.value_mut();

        state.status = DetectionStatus::Cooldown;
        state.last_alert_at = Some(now);
        state.touched_at = now;
    }

    /// Remove keys untouched for longer than `ttl`; returns how many were removed
    pub fn evict_stale(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| state.status == DetectionStatus::Alerting || elapsed(state.touched_at, now) <= ttl);
        before.saturating_sub(self.states.len())
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Point-in-time copy of every tracked key, ordered by key
    pub fn snapshot(&self) -> Vec<(EvaluationKey, DetectionState)> {
        let mut entries: Vec<_> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
