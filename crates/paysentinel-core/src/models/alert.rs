//! Alert data models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics::ScopeKey;
use super::rule::MetricType;

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Storage token
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of incident an alert describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Error-rate rule breach
    HighErrorRate,
    /// Decline-rate rule breach
    HighDeclineRate,
    /// Approval-rate rule breach
    LowApprovalRate,
    /// Volume rule breach
    VolumeThreshold,
    /// Deviation inferred by the statistical fallback detector
    StatisticalAnomaly,
}

impl AlertType {
    /// Alert type raised by a rule on the given metric
    pub fn for_metric(metric: MetricType) -> Self {
        match metric {
            MetricType::ErrorRate => Self::HighErrorRate,
            MetricType::DeclineRate => Self::HighDeclineRate,
            MetricType::ApprovalRate => Self::LowApprovalRate,
            MetricType::Volume => Self::VolumeThreshold,
        }
    }

    /// Storage token
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighErrorRate => "HIGH_ERROR_RATE",
            Self::HighDeclineRate => "HIGH_DECLINE_RATE",
            Self::LowApprovalRate => "LOW_APPROVAL_RATE",
            Self::VolumeThreshold => "VOLUME_THRESHOLD",
            Self::StatisticalAnomaly => "STATISTICAL_ANOMALY",
        }
    }

    /// Title-cased label for alert titles
    pub fn title(self) -> &'static str {
        match self {
            Self::HighErrorRate => "High Error Rate",
            Self::HighDeclineRate => "High Decline Rate",
            Self::LowApprovalRate => "Low Approval Rate",
            Self::VolumeThreshold => "Volume Threshold",
            Self::StatisticalAnomaly => "Statistical Anomaly",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Rotate or fix API credentials
    UpdateCredentials,
    /// Review country/compliance rules
    ReviewCompliance,
    /// Route traffic to a backup provider
    FailoverProvider,
    /// Raise timeouts or fail over
    IncreaseTimeout,
    /// Escalate to the provider's support
    ContactProvider,
    /// Escalate to the card issuer
    ContactIssuer,
    /// Stop routing traffic to the provider
    PauseTraffic,
}

impl ActionType {
    /// Storage token
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpdateCredentials => "UPDATE_CREDENTIALS",
            Self::ReviewCompliance => "REVIEW_COMPLIANCE",
            Self::FailoverProvider => "FAILOVER_PROVIDER",
            Self::IncreaseTimeout => "INCREASE_TIMEOUT",
            Self::ContactProvider => "CONTACT_PROVIDER",
            Self::ContactIssuer => "CONTACT_ISSUER",
            Self::PauseTraffic => "PAUSE_TRAFFIC",
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UPDATE_CREDENTIALS" => Ok(Self::UpdateCredentials),
            "REVIEW_COMPLIANCE" => Ok(Self::ReviewCompliance),
            "FAILOVER_PROVIDER" => Ok(Self::FailoverProvider),
            "INCREASE_TIMEOUT" => Ok(Self::IncreaseTimeout),
            "CONTACT_PROVIDER" => Ok(Self::ContactProvider),
            "CONTACT_ISSUER" => Ok(Self::ContactIssuer),
            "PAUSE_TRAFFIC" => Ok(Self::PauseTraffic),
            other => Err(format!("unknown action type '{other}'")),
        }
    }
}

/// Attributed cause of an incident
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCause {
    /// Provider the incident belongs to
    pub provider: String,
    /// What went wrong
    pub issue: String,
    /// Blast radius
    pub scope: String,
    /// Dominant response code, if any
    pub response_code: Option<String>,
}

/// Remediation suggested to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedAction {
    /// Human-readable label
    pub label: String,
    /// Remediation category
    pub action_type: ActionType,
}

/// A raised alert. Immutable once built; ownership moves to the alert store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// When the alert was raised
    pub created_at: DateTime<Utc>,

    /// Severity level
    pub severity: Severity,

    /// Kind of incident
    pub alert_type: AlertType,

    /// Human-readable title
    pub title: String,

    /// Scope the incident was detected on
    pub scope: ScopeKey,

    /// Rule that fired; None for the statistical detector
    pub rule_id: Option<Uuid>,

    /// Metric value at detection time
    pub metric_value: f64,

    /// Threshold that was crossed (z threshold for statistical alerts)
    pub threshold_value: f64,

    /// Confidence in the diagnosis, 0..=1
    pub confidence_score: f64,

    /// Amount of the affected population in the trailing window, USD
    pub revenue_at_risk_usd: f64,

    /// Transactions affected in the cycle
    pub affected_transactions: u64,

    /// Attributed cause
    pub root_cause: RootCause,

    /// Suggested remediation
    pub suggested_action: SuggestedAction,

    /// Seconds until the SLA is considered breached
    pub sla_breach_countdown_seconds: Option<u32>,

    /// Natural-language explanation from the reasoning service
    pub llm_explanation: Option<String>,
}

/// An alert as read back from the alert store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAlert {
    /// Identifier generated by the store
    pub alert_id: Uuid,

    /// The alert record
    #[serde(flatten)]
    pub alert: Alert,
}
