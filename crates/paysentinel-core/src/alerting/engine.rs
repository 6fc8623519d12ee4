//! The periodic detection loop

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Timelike, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DetectionConfig};
use crate::error::Result;
use crate::models::{AlertType, MetricSnapshot, MetricType, Severity};

use super::aggregator::aggregate;
use super::confirmer::{Breach, Confirmer};
use super::emitter::{AlertEmitter, Detection, EmitterSettings};
use super::evaluator::{applicable_rules, RuleEvaluation, RuleEvaluator, Verdict};
use super::fallback::{FallbackDetector, FallbackEvaluation};
use super::sources::{
    bounded, AlertStore, CounterSource, EventLog, KamDirectory, Notifier, Reasoner, RuleSource,
};
use super::state::{DetectorId, EvaluationKey, StateStore};

/// External systems the engine is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub counters: Arc<dyn CounterSource>,
    pub rules: Arc<dyn RuleSource>,
    pub event_log: Arc<dyn EventLog>,
    pub alerts: Arc<dyn AlertStore>,
    pub reasoner: Option<Arc<dyn Reasoner>>,
    pub kam: Arc<dyn KamDirectory>,
    pub notifier: Arc<dyn Notifier>,
}

/// Summary of one detection cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub snapshots: usize,
    pub breaches: usize,
    pub alerts: usize,
    pub suppressed: usize,
    pub recoveries: usize,
    pub evicted: usize,
    pub failed_scopes: usize,
}

impl CycleReport {
    fn absorb(&mut self, other: CycleReport) {
        self.breaches += other.breaches;
        self.alerts += other.alerts;
        self.suppressed += other.suppressed;
        self.recoveries += other.recoveries;
    }
}

/// One detector's verdict on a scope, before state tracking
struct Observation {
    key: EvaluationKey,
    verdict: Verdict,
    current_errors: u64,
    trend_applies: bool,
    detection: Detection,
}

/// Aggregates counters, evaluates rules and the fallback detector, and emits
/// deduplicated alerts on a fixed cadence
pub struct DetectionEngine {
    detection: DetectionConfig,
    key_prefix: String,
    fallback_enabled: bool,
    counters: Arc<dyn CounterSource>,
    rules: Arc<dyn RuleSource>,
    event_log: Arc<dyn EventLog>,
    evaluator: RuleEvaluator,
    confirmer: Confirmer,
    fallback: FallbackDetector,
    emitter: AlertEmitter,
    state: Arc<StateStore>,
}

impl DetectionEngine {
    /// Create an engine with its own, empty state store
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let detection = config.detection.clone();
        let Collaborators {
            counters,
            rules,
            event_log,
            alerts,
            reasoner,
            kam,
            notifier,
        } = collaborators;

        Self {
            evaluator: RuleEvaluator::new(
                event_log.clone(),
                detection.issuer_lookback,
                detection.query_timeout,
            ),
            confirmer: Confirmer::new(&detection, event_log.clone()),
            fallback: FallbackDetector::new(&config.fallback),
            emitter: AlertEmitter::new(
                event_log.clone(),
                alerts,
                reasoner,
                kam,
                notifier,
                EmitterSettings::from_config(config),
            ),
            key_prefix: config.redis.key_prefix.clone(),
            fallback_enabled: config.fallback.enabled,
            counters,
            rules,
            event_log,
            state: Arc::new(StateStore::new()),
            detection,
        }
    }

    /// Shared handle to the detection state
    pub fn state(&self) -> Arc<StateStore> {
        self.state.clone()
    }

    /// Run cycles until `shutdown` is cancelled. A running cycle always completes.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval = ?self.detection.check_interval,
            cooldown = ?self.detection.cooldown,
            confirmation = ?self.detection.confirmation,
            "Starting detection engine"
        );

        let mut ticker = interval(self.detection.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle_at(Utc::now()).await {
                Ok(report) => debug!(?report, "Detection cycle complete"),
                Err(e) if e.is_transient() => warn!(error = %e, "Detection cycle skipped, will retry"),
                Err(e) => error!(error = %e, "Detection cycle aborted"),
            }
        }

        info!("Detection engine stopped");
    }

    /// Run one detection cycle as of `now`.
    ///
    /// Fails only when the counter store cannot be read; every other failure
    /// is contained to its scope key or collaborator.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let started = Instant::now();
        counter!("sentinel_cycles_total").increment(1);

        let entries = bounded(
            "counter_store",
            self.detection.query_timeout,
            self.counters.scan_counters(),
        )
        .await?;
        let snapshots = aggregate(entries, &self.key_prefix);
        gauge!("sentinel_snapshots").set(snapshots.len() as f64);

        let mut report = CycleReport {
            snapshots: snapshots.len(),
            ..CycleReport::default()
        };

        let outcomes: Vec<Result<CycleReport>> = stream::iter(&snapshots)
            .map(|snapshot| self.evaluate_scope(snapshot, now))
            .buffer_unordered(self.detection.max_concurrent_scopes)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(scope_report) => report.absorb(scope_report),
                Err(_) => report.failed_scopes += 1,
            }
        }

        let ttl = self.detection.cooldown * self.detection.state_ttl_factor;
        report.evicted = self.state.evict_stale(now, ttl);
        gauge!("sentinel_tracked_keys").set(self.state.len() as f64);
        histogram!("sentinel_cycle_duration_seconds").record(started.elapsed().as_secs_f64());

        if report.alerts > 0 || report.recoveries > 0 {
            info!(
                alerts = report.alerts,
                recoveries = report.recoveries,
                snapshots = report.snapshots,
                "Detection cycle produced changes"
            );
        }
        Ok(report)
    }

    async fn evaluate_scope(&self, snapshot: &MetricSnapshot, now: DateTime<Utc>) -> Result<CycleReport> {
        let scope = &snapshot.scope;
        let rules = bounded(
            "rule_store",
            self.detection.query_timeout,
            self.rules.rules_for(scope),
        )
        .await
        .map_err(|e| {
            warn!(scope = %scope, error = %e, "Rule lookup failed, skipping scope");
            e
        })?;

        let applicable = applicable_rules(rules, scope, now.hour());
        let mut report = CycleReport::default();

        if applicable.is_empty() {
            if self.fallback_enabled {
                let evaluation = self.fallback.evaluate(&snapshot.counts);
                let observation = self.fallback_observation(snapshot, evaluation);
                self.track(observation, snapshot, now, &mut report).await;
            }
            return Ok(report);
        }

        for evaluation in self.evaluator.evaluate(snapshot, applicable).await {
            let observation = self.rule_observation(snapshot, evaluation);
            self.track(observation, snapshot, now, &mut report).await;
        }
        Ok(report)
    }

    fn rule_observation(&self, snapshot: &MetricSnapshot, evaluation: RuleEvaluation) -> Observation {
        let RuleEvaluation {
            rule,
            counts,
            value,
            verdict,
        } = evaluation;

        let severity = if rule.metric_type == MetricType::ErrorRate && value > self.detection.critical_error_rate {
            Severity::Critical
        } else {
            rule.severity
        };
        let key = EvaluationKey::new(snapshot.scope.clone(), DetectorId::Rule(rule.id));

        Observation {
            verdict,
            current_errors: counts.errored,
            trend_applies: rule.metric_type == MetricType::ErrorRate,
            detection: Detection {
                key: key.clone(),
                alert_type: AlertType::for_metric(rule.metric_type),
                severity,
                metric_value: value,
                threshold_value: rule.threshold,
                affected_transactions: rule.metric_type.affected(&counts),
                note: None,
            },
            key,
        }
    }

    fn fallback_observation(&self, snapshot: &MetricSnapshot, evaluation: FallbackEvaluation) -> Observation {
        let counts = snapshot.counts;
        let key = EvaluationKey::new(snapshot.scope.clone(), DetectorId::Fallback);

        Observation {
            verdict: evaluation.verdict,
            current_errors: counts.errored,
            trend_applies: true,
            detection: Detection {
                key: key.clone(),
                alert_type: AlertType::StatisticalAnomaly,
                severity: Severity::Warning,
                metric_value: evaluation.approval_rate,
                threshold_value: self.fallback.z_threshold(),
                affected_transactions: counts.declined + counts.errored,
                note: Some(format!(
                    "approval rate {:.1}%, z-score {:.2}",
                    evaluation.approval_rate * 100.0,
                    evaluation.z_score
                )),
            },
            key,
        }
    }

    /// Apply one observation to its key's state, emitting at most one alert
    async fn track(
        &self,
        observation: Observation,
        snapshot: &MetricSnapshot,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let key = &observation.key;
        let breached = observation.verdict == Verdict::Breached;

        if !breached && self.state.is_open(key) && self.recovered(snapshot).await {
            self.state.clear(key);
            report.recoveries += 1;
            counter!("sentinel_recoveries_total").increment(1);
            info!(key = %key, "Recovered, clearing detection state");
            return;
        }

        match observation.verdict {
            Verdict::InsufficientSample => return,
            Verdict::Clear => {
                self.state.record_clear(key);
                return;
            }
            Verdict::Breached => {}
        }

        report.breaches += 1;
        counter!("sentinel_breaches_total", "detector" => key.detector.label()).increment(1);
        let streak = self.state.record_breach(key, now, self.detection.streak_expiry);

        let confirmed = self
            .confirmer
            .confirm(Breach {
                scope: &key.scope,
                streak,
                current_errors: observation.current_errors,
                trend_applies: observation.trend_applies,
            })
            .await;
        if !confirmed {
            debug!(key = %key, streak, "Breach not yet confirmed");
            return;
        }

        if self.state.in_cooldown(key, now, self.detection.cooldown) {
            report.suppressed += 1;
            counter!("sentinel_alerts_suppressed_total").increment(1);
            debug!(key = %key, "Suppressed by cooldown");
            return;
        }

        if !self.state.begin_alert(key, now) {
            return;
        }
        self.emitter.emit(&observation.detection, now).await;
        self.state.finish_alert(key, now);
        report.alerts += 1;
    }

    /// Enough recent successes to call the scope healthy again. Query failures count as not recovered.
    async fn recovered(&self, snapshot: &MetricSnapshot) -> bool {
        let threshold = self.detection.recovery_threshold;
        if snapshot.counts.succeeded < threshold {
            return false;
        }

        let query = self
            .event_log
            .recent_successes(&snapshot.scope, self.detection.recovery_window);
        match bounded("event_log", self.detection.query_timeout, query).await {
            Ok(successes) => successes >= threshold,
            Err(e) => {
                warn!(scope = %snapshot.scope, error = %e, "Recovery check failed");
                false
            }
        }
    }
}
