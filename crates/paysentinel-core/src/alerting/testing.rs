//! In-memory collaborators and fixtures for engine tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    ActionType, Alert, AlertRule, AlertType, IssuerBreakdown, MetricType, MinuteBucket, Operator,
    Outcome, OutcomeCounts, ResponseCodeBreakdown, RootCause, ScopeKey, Severity, SuggestedAction,
};

use super::notifier::KamContact;
use super::reasoning::{IncidentContext, ReasoningResponse};
use super::sources::{
    AlertStore, CounterSource, EventLog, KamDirectory, Notifier, Reasoner, RuleSource,
};

pub fn rule_fixture(metric_type: MetricType, operator: Operator, threshold: f64) -> AlertRule {
    AlertRule {
        id: Uuid::new_v4(),
        name: format!("{metric_type} {} {threshold}", operator.symbol()),
        tenant_id: None,
        country: None,
        provider_id: None,
        issuer: None,
        metric_type,
        operator,
        threshold,
        min_transactions: 50,
        active_hours: None,
        severity: Severity::Warning,
        enabled: true,
        created_at: Utc::now(),
    }
}

pub fn alert_fixture() -> Alert {
    Alert {
        created_at: Utc::now(),
        severity: Severity::Warning,
        alert_type: AlertType::HighErrorRate,
        title: "STRIPE MX - High Error Rate (All transactions)".to_string(),
        scope: ScopeKey::new(Some("m-1"), "MX", "STRIPE"),
        rule_id: Some(Uuid::nil()),
        metric_value: 0.35,
        threshold_value: 0.2,
        confidence_score: 0.5,
        revenue_at_risk_usd: 980.0,
        affected_transactions: 35,
        root_cause: RootCause {
            provider: "STRIPE".to_string(),
            issue: "High Error Rate across MX (HTTP 504)".to_string(),
            scope: "All transactions".to_string(),
            response_code: Some("504".to_string()),
        },
        suggested_action: SuggestedAction {
            label: "Increase timeout or failover STRIPE".to_string(),
            action_type: ActionType::IncreaseTimeout,
        },
        sla_breach_countdown_seconds: None,
        llm_explanation: None,
    }
}

/// Buckets newest first with the given error counts
pub fn minute_buckets(errors: &[u64]) -> Vec<MinuteBucket> {
    let newest = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    errors
        .iter()
        .enumerate()
        .map(|(i, &errors)| MinuteBucket {
            minute: newest - chrono::Duration::minutes(i as i64),
            errors,
            total: errors + 20,
        })
        .collect()
}

/// Counter entries for one scope in a single minute bucket
pub fn counter_entries(scope: &ScopeKey, counts: OutcomeCounts) -> Vec<(String, i64)> {
    let prefix = match &scope.tenant_id {
        Some(tenant) => format!("stats:{tenant}:{}:{}", scope.country, scope.provider_id),
        None => format!("stats:{}:{}", scope.country, scope.provider_id),
    };
    [
        (Outcome::Succeeded, counts.succeeded),
        (Outcome::Declined, counts.declined),
        (Outcome::Error, counts.errored),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(outcome, n)| (format!("{prefix}:{}:202410161200", outcome.as_str()), n as i64))
    .collect()
}

#[derive(Default)]
pub struct FakeCounters {
    entries: Mutex<Vec<(String, i64)>>,
    fail: AtomicBool,
}

impl FakeCounters {
    pub fn set(&self, entries: Vec<(String, i64)>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CounterSource for FakeCounters {
    async fn scan_counters(&self) -> Result<Vec<(String, i64)>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Pool("counter store unreachable".to_string()));
        }
        Ok(self.entries.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeRules {
    rules: Mutex<Vec<AlertRule>>,
    fail: AtomicBool,
}

impl FakeRules {
    pub fn with(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleSource for FakeRules {
    async fn rules_for(&self, scope: &ScopeKey) -> Result<Vec<AlertRule>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::internal("rule store unreachable"));
        }
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.enabled && r.matches_scope(scope))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeEventLog {
    trend: Mutex<Vec<MinuteBucket>>,
    successes: AtomicU64,
    codes: Mutex<ResponseCodeBreakdown>,
    issuers: Mutex<Vec<IssuerBreakdown>>,
    revenue: Mutex<f64>,
    issuer_counts: Mutex<HashMap<String, OutcomeCounts>>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl FakeEventLog {
    pub fn set_trend(&self, buckets: Vec<MinuteBucket>) {
        *self.trend.lock().unwrap() = buckets;
    }

    pub fn set_successes(&self, successes: u64) {
        self.successes.store(successes, Ordering::SeqCst);
    }

    pub fn set_codes(&self, codes: &[(&str, u64)]) {
        *self.codes.lock().unwrap() = ResponseCodeBreakdown::from_rows(
            codes
                .iter()
                .map(|(code, count)| (Some(code.to_string()), *count, Vec::new())),
        );
    }

    pub fn set_issuers(&self, issuers: Vec<IssuerBreakdown>) {
        *self.issuers.lock().unwrap() = issuers;
    }

    pub fn set_revenue(&self, revenue: f64) {
        *self.revenue.lock().unwrap() = revenue;
    }

    pub fn set_issuer_counts(&self, issuer: &str, counts: OutcomeCounts) {
        self.issuer_counts
            .lock()
            .unwrap()
            .insert(issuer.to_string(), counts);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::internal("event log unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for FakeEventLog {
    async fn error_trend(&self, _scope: &ScopeKey, buckets: u32) -> Result<Vec<MinuteBucket>> {
        self.gate().await?;
        let trend = self.trend.lock().unwrap();
        Ok(trend.iter().take(buckets as usize).copied().collect())
    }

    async fn recent_successes(&self, _scope: &ScopeKey, _window: Duration) -> Result<u64> {
        self.gate().await?;
        Ok(self.successes.load(Ordering::SeqCst))
    }

    async fn response_code_breakdown(
        &self,
        _scope: &ScopeKey,
        _outcomes: &[Outcome],
        _window: Duration,
    ) -> Result<ResponseCodeBreakdown> {
        self.gate().await?;
        Ok(self.codes.lock().unwrap().clone())
    }

    async fn issuer_breakdown(
        &self,
        _scope: &ScopeKey,
        _outcomes: &[Outcome],
        _window: Duration,
        min_occurrences: u64,
    ) -> Result<Vec<IssuerBreakdown>> {
        self.gate().await?;
        Ok(self
            .issuers
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.error_count >= min_occurrences)
            .cloned()
            .collect())
    }

    async fn revenue_at_risk(&self, _scope: &ScopeKey, _outcomes: &[Outcome], _window: Duration) -> Result<f64> {
        self.gate().await?;
        Ok(*self.revenue.lock().unwrap())
    }

    async fn issuer_outcome_counts(
        &self,
        _scope: &ScopeKey,
        issuer: &str,
        _window: Duration,
    ) -> Result<OutcomeCounts> {
        self.gate().await?;
        Ok(self
            .issuer_counts
            .lock()
            .unwrap()
            .get(issuer)
            .copied()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeAlertStore {
    alerts: Mutex<Vec<(Uuid, Alert)>>,
    failures: AtomicU32,
}

impl FakeAlertStore {
    /// Fail the next `n` inserts
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<(Uuid, Alert)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertStore for FakeAlertStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<Uuid> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::internal("insert failed"));
        }
        let id = Uuid::new_v4();
        self.alerts.lock().unwrap().push((id, alert.clone()));
        Ok(id)
    }
}

#[derive(Default)]
pub struct FakeReasoner {
    response: Mutex<Option<ReasoningResponse>>,
    delay: Mutex<Option<Duration>>,
    contexts: Mutex<Vec<IncidentContext>>,
}

impl FakeReasoner {
    pub fn respond(&self, response: ReasoningResponse) {
        *self.response.lock().unwrap() = Some(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn contexts(&self) -> Vec<IncidentContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for FakeReasoner {
    async fn analyze(&self, context: &IncidentContext) -> Result<ReasoningResponse> {
        self.contexts.lock().unwrap().push(context.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::internal("no analysis"))
    }
}

#[derive(Default)]
pub struct FakeKam {
    contacts: HashMap<String, KamContact>,
}

impl FakeKam {
    pub fn with_contact(tenant_id: &str) -> Self {
        let contact = KamContact {
            merchant_id: tenant_id.to_string(),
            merchant_name: "Acme Store".to_string(),
            kam_name: "Dana".to_string(),
            kam_email: "dana@example.com".to_string(),
            slack_webhook: None,
        };
        Self {
            contacts: HashMap::from([(tenant_id.to_string(), contact)]),
        }
    }
}

#[async_trait]
impl KamDirectory for FakeKam {
    async fn contact_for(&self, tenant_id: &str) -> Result<Option<KamContact>> {
        Ok(self.contacts.get(tenant_id).cloned())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<(Uuid, Alert, Option<KamContact>)>>,
    fail: AtomicBool,
}

impl FakeNotifier {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(Uuid, Alert, Option<KamContact>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, alert_id: Uuid, alert: &Alert, contact: Option<&KamContact>) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((alert_id, alert.clone(), contact.cloned()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::internal("webhook down"));
        }
        Ok(())
    }
}
