//! Collaborator interfaces the detection engine is built against
//!
//! Each trait is one external system. Implementations return explicit
//! errors; what a failure means (fail open, degrade, abort the cycle) is
//! decided by the engine at the call site.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Alert, AlertRule, IssuerBreakdown, MinuteBucket, Outcome, OutcomeCounts, ResponseCodeBreakdown,
    ScopeKey,
};

use super::notifier::KamContact;
use super::reasoning::{IncidentContext, ReasoningResponse};

/// Shared store of windowed outcome counters
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// All resident counter keys with their integer values
    async fn scan_counters(&self) -> Result<Vec<(String, i64)>>;
}

/// Rule store
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Active rules whose filters are null or equal to the scope
    async fn rules_for(&self, scope: &ScopeKey) -> Result<Vec<AlertRule>>;
}

/// Read queries against the authoritative transaction log
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Most recent one-minute buckets, newest first
    async fn error_trend(&self, scope: &ScopeKey, buckets: u32) -> Result<Vec<MinuteBucket>>;

    /// Successful transactions within `window`
    async fn recent_successes(&self, scope: &ScopeKey, window: Duration) -> Result<u64>;

    /// Response codes of transactions with the given outcomes
    async fn response_code_breakdown(
        &self,
        scope: &ScopeKey,
        outcomes: &[Outcome],
        window: Duration,
    ) -> Result<ResponseCodeBreakdown>;

    /// Issuers with at least `min_occurrences` affected transactions
    async fn issuer_breakdown(
        &self,
        scope: &ScopeKey,
        outcomes: &[Outcome],
        window: Duration,
        min_occurrences: u64,
    ) -> Result<Vec<IssuerBreakdown>>;

    /// Summed USD amount of transactions with the given outcomes
    async fn revenue_at_risk(&self, scope: &ScopeKey, outcomes: &[Outcome], window: Duration) -> Result<f64>;

    /// Outcome counts restricted to one card issuer
    async fn issuer_outcome_counts(
        &self,
        scope: &ScopeKey,
        issuer: &str,
        window: Duration,
    ) -> Result<OutcomeCounts>;
}

/// Insert-only alert persistence
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist the alert and return its generated identifier
    async fn insert_alert(&self, alert: &Alert) -> Result<Uuid>;
}

/// Remote natural-language reasoning service
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Explain an incident
    async fn analyze(&self, context: &IncidentContext) -> Result<ReasoningResponse>;
}

/// Merchant to key-account-manager directory
#[async_trait]
pub trait KamDirectory: Send + Sync {
    /// Contact details of the tenant's KAM, if one is assigned
    async fn contact_for(&self, tenant_id: &str) -> Result<Option<KamContact>>;
}

/// Outbound alert notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Dispatch a persisted alert
    async fn notify(&self, alert_id: Uuid, alert: &Alert, contact: Option<&KamContact>) -> Result<()>;
}

/// Run a collaborator call under a deadline.
///
/// Both an elapsed deadline and an error returned by the call count towards
/// `sentinel_collaborator_failures_total{collaborator}`.
pub(crate) async fn bounded<T, F>(collaborator: &'static str, deadline: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let result = match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!("{collaborator} after {deadline:?}"))),
    };

    if result.is_err() {
        counter!("sentinel_collaborator_failures_total", "collaborator" => collaborator).increment(1);
    }
    result
}
