//! Rule resolution and threshold evaluation

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::{AlertRule, MetricSnapshot, OutcomeCounts, ScopeKey};

use super::sources::{bounded, EventLog};

/// Result of testing one rule against the current counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// `current OP threshold` holds
    Breached,
    /// The condition does not hold
    Clear,
    /// Sample below the rule's minimum; the rule did not take part in this cycle
    InsufficientSample,
}

/// One rule evaluated for one scope key
#[derive(Debug, Clone)]
pub struct RuleEvaluation {
    pub rule: AlertRule,
    /// Counts the rule was evaluated on (issuer-restricted for issuer rules)
    pub counts: OutcomeCounts,
    /// Current value of the rule's metric
    pub value: f64,
    pub verdict: Verdict,
}

impl RuleEvaluation {
    /// Test `rule` against `counts`
    pub fn of(rule: AlertRule, counts: OutcomeCounts) -> Self {
        let value = rule.metric_type.value(&counts);
        let verdict = if counts.total() < rule.min_transactions {
            Verdict::InsufficientSample
        } else if rule.check(value) {
            Verdict::Breached
        } else {
            Verdict::Clear
        };

        Self {
            rule,
            counts,
            value,
            verdict,
        }
    }
}

/// Enabled rules matching the scope and active at `hour`, most specific first
pub fn applicable_rules(rules: Vec<AlertRule>, scope: &ScopeKey, hour: u32) -> Vec<AlertRule> {
    let mut applicable: Vec<AlertRule> = rules
        .into_iter()
        .filter(|rule| rule.enabled && rule.matches_scope(scope) && rule.is_active_at(hour))
        .collect();

    applicable.sort_by(|a, b| b.specificity().cmp(&a.specificity()).then(a.id.cmp(&b.id)));
    applicable
}

/// Evaluates every applicable rule of a scope key independently
pub struct RuleEvaluator {
    event_log: Arc<dyn EventLog>,
    issuer_lookback: Duration,
    query_timeout: Duration,
}

impl RuleEvaluator {
    /// Create a new rule evaluator
    pub fn new(event_log: Arc<dyn EventLog>, issuer_lookback: Duration, query_timeout: Duration) -> Self {
        Self {
            event_log,
            issuer_lookback,
            query_timeout,
        }
    }

    /// Evaluate `rules` (already filtered by [`applicable_rules`]) against the snapshot.
    ///
    /// Issuer-filtered rules read their counts from the event log; a failed
    /// lookup leaves that rule out of the result for this cycle.
    pub async fn evaluate(&self, snapshot: &MetricSnapshot, rules: Vec<AlertRule>) -> Vec<RuleEvaluation> {
        let mut evaluations = Vec::with_capacity(rules.len());

        for rule in rules {
            let counts = match rule.issuer.as_deref() {
                None => snapshot.counts,
                Some(issuer) => match self.issuer_counts(&snapshot.scope, issuer).await {
                    Some(counts) => counts,
                    None => continue,
                },
            };

            let evaluation = RuleEvaluation::of(rule, counts);
            debug!(
                scope = %snapshot.scope,
                rule_id = %evaluation.rule.id,
                metric = %evaluation.rule.metric_type,
                value = evaluation.value,
                threshold = evaluation.rule.threshold,
                verdict = ?evaluation.verdict,
                "Evaluated rule"
            );
            evaluations.push(evaluation);
        }

        evaluations
    }

    async fn issuer_counts(&self, scope: &ScopeKey, issuer: &str) -> Option<OutcomeCounts> {
        let lookup = self.event_log.issuer_outcome_counts(scope, issuer, self.issuer_lookback);
        match bounded("event_log", self.query_timeout, lookup).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!(scope = %scope, issuer, error = %e, "Issuer counts unavailable, skipping rule");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::testing::{rule_fixture, FakeEventLog};
    use crate::models::{ActiveHours, MetricType, Operator};
    use proptest::prelude::*;

    fn snapshot(succeeded: u64, declined: u64, errored: u64) -> MetricSnapshot {
        MetricSnapshot::new(
            ScopeKey::new(Some("m-1"), "MX", "STRIPE"),
            OutcomeCounts::new(succeeded, declined, errored),
        )
    }

    fn evaluator(event_log: Arc<FakeEventLog>) -> RuleEvaluator {
        RuleEvaluator::new(event_log, Duration::from_secs(300), Duration::from_secs(1))
    }

    #[test]
    fn test_error_rate_rule_breaches() {
        let rule = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.20);
        let evaluation = RuleEvaluation::of(rule, OutcomeCounts::new(60, 5, 35));

        assert_eq!(evaluation.verdict, Verdict::Breached);
        assert!((evaluation.value - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_applicable_rules_ranked_by_specificity() {
        let scope = ScopeKey::new(Some("m-1"), "MX", "STRIPE");

        let global = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2);
        let mut country = rule_fixture(MetricType::DeclineRate, Operator::Gt, 0.3);
        country.country = Some("MX".to_string());
        let mut exact = rule_fixture(MetricType::ApprovalRate, Operator::Lt, 0.7);
        exact.tenant_id = Some("m-1".to_string());
        exact.country = Some("MX".to_string());
        exact.provider_id = Some("STRIPE".to_string());
        let mut other_country = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2);
        other_country.country = Some("BR".to_string());
        let mut disabled = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2);
        disabled.enabled = false;

        let rules = applicable_rules(
            vec![global.clone(), other_country, country.clone(), disabled, exact.clone()],
            &scope,
            12,
        );

        let ids: Vec<_> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![exact.id, country.id, global.id]);
    }

    #[test]
    fn test_inactive_hours_exclude_rule() {
        let scope = ScopeKey::new(None, "MX", "STRIPE");
        let mut rule = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2);
        rule.active_hours = Some(ActiveHours::new(9, 18).unwrap());

        assert_eq!(applicable_rules(vec![rule.clone()], &scope, 10).len(), 1);
        assert!(applicable_rules(vec![rule], &scope, 20).is_empty());
    }

    #[tokio::test]
    async fn test_every_rule_evaluated_independently() {
        let event_log = Arc::new(FakeEventLog::default());
        let rules = vec![
            rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2),
            rule_fixture(MetricType::ApprovalRate, Operator::Lt, 0.5),
            rule_fixture(MetricType::Volume, Operator::Gte, 1000.0),
        ];

        let evaluations = evaluator(event_log).evaluate(&snapshot(60, 5, 35), rules).await;

        let verdicts: Vec<_> = evaluations.iter().map(|e| e.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Breached, Verdict::Clear, Verdict::Clear]);
    }

    #[tokio::test]
    async fn test_issuer_rule_uses_issuer_counts() {
        let event_log = Arc::new(FakeEventLog::default());
        event_log.set_issuer_counts("BBVA", OutcomeCounts::new(10, 0, 50));

        let mut rule = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.5);
        rule.issuer = Some("BBVA".to_string());

        let evaluations = evaluator(event_log).evaluate(&snapshot(95, 0, 5), vec![rule]).await;

        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].verdict, Verdict::Breached);
        assert_eq!(evaluations[0].counts.errored, 50);
    }

    #[tokio::test]
    async fn test_issuer_lookup_failure_skips_rule() {
        let event_log = Arc::new(FakeEventLog::default());
        event_log.fail_queries(true);

        let mut issuer_rule = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.5);
        issuer_rule.issuer = Some("BBVA".to_string());
        let plain = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2);

        let evaluations = evaluator(event_log)
            .evaluate(&snapshot(60, 5, 35), vec![issuer_rule, plain.clone()])
            .await;

        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].rule.id, plain.id);
    }

    proptest! {
        #[test]
        fn prop_below_min_sample_never_breaches(
            succeeded in 0u64..50,
            declined in 0u64..50,
            errored in 0u64..50,
            threshold in 0.0f64..1.0,
        ) {
            let counts = OutcomeCounts::new(succeeded, declined, errored);
            let mut rule = rule_fixture(MetricType::ErrorRate, Operator::Gte, threshold);
            rule.min_transactions = counts.total() + 1;

            let evaluation = RuleEvaluation::of(rule, counts);
            prop_assert_eq!(evaluation.verdict, Verdict::InsufficientSample);
        }
    }
}
