//! Alert rule data models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::Severity;
use super::metrics::{OutcomeCounts, ScopeKey};

/// Metric a rule is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Approvals over all transactions
    ApprovalRate,
    /// Errors over all transactions
    ErrorRate,
    /// Declines over decided transactions
    DeclineRate,
    /// Raw transaction count
    Volume,
}

impl MetricType {
    /// Current value of this metric for the given counts
    pub fn value(self, counts: &OutcomeCounts) -> f64 {
        match self {
            Self::ApprovalRate => counts.approval_rate(),
            Self::ErrorRate => counts.error_rate(),
            Self::DeclineRate => counts.decline_rate(),
            Self::Volume => counts.total() as f64,
        }
    }

    /// Transactions affected when this metric breaches
    pub fn affected(self, counts: &OutcomeCounts) -> u64 {
        match self {
            Self::ErrorRate => counts.errored,
            Self::DeclineRate => counts.declined,
            Self::ApprovalRate => counts.declined + counts.errored,
            Self::Volume => counts.total(),
        }
    }

    /// Storage token
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApprovalRate => "approval_rate",
            Self::ErrorRate => "error_rate",
            Self::DeclineRate => "decline_rate",
            Self::Volume => "volume",
        }
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approval_rate" => Ok(Self::ApprovalRate),
            "error_rate" => Ok(Self::ErrorRate),
            "decline_rate" => Ok(Self::DeclineRate),
            "volume" => Ok(Self::Volume),
            other => Err(format!("unknown metric type '{other}'")),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal to
    Gte,
    /// Less than or equal to
    Lte,
}

impl Operator {
    /// Apply `value OP threshold`
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
        }
    }

    /// Symbolic form, also the storage token
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(Self::Gt),
            "<" | "lt" => Ok(Self::Lt),
            ">=" | "gte" => Ok(Self::Gte),
            "<=" | "lte" => Ok(Self::Lte),
            other => Err(format!("unsupported operator '{other}'")),
        }
    }
}

/// Hours of the day (UTC) during which a rule applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    /// First active hour, inclusive
    pub start_hour: u8,
    /// First inactive hour, exclusive
    pub end_hour: u8,
}

impl ActiveHours {
    /// Create an active-hours window, rejecting hours outside 0..24
    pub fn new(start_hour: u8, end_hour: u8) -> Result<Self, String> {
        if start_hour > 23 || end_hour > 23 {
            return Err(format!("active hours {start_hour}-{end_hour} out of range"));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    /// Whether `hour` falls inside the window; windows may wrap midnight
    pub fn contains(&self, hour: u32) -> bool {
        let (start, end) = (u32::from(self.start_hour), u32::from(self.end_hour));
        if start == end {
            true
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

/// An alert rule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier
    pub id: Uuid,

    /// Human-readable name
    pub name: String,

    // Scope filters, None = wildcard
    /// Tenant (merchant) filter
    pub tenant_id: Option<String>,

    /// Country filter
    pub country: Option<String>,

    /// Provider filter
    pub provider_id: Option<String>,

    /// Card issuer filter
    pub issuer: Option<String>,

    // Condition
    /// Metric to monitor
    pub metric_type: MetricType,

    /// Comparison operator
    pub operator: Operator,

    /// Threshold value
    pub threshold: f64,

    /// Minimum sample size before the rule is evaluated
    pub min_transactions: u64,

    /// Optional hours during which the rule applies
    pub active_hours: Option<ActiveHours>,

    /// Alert severity
    pub severity: Severity,

    /// Whether the rule is enabled
    pub enabled: bool,

    /// When the rule was created
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    /// Number of non-wildcard filters; higher is more specific
    pub fn specificity(&self) -> u8 {
        [
            self.tenant_id.is_some(),
            self.country.is_some(),
            self.provider_id.is_some(),
            self.issuer.is_some(),
        ]
        .into_iter()
        .map(u8::from)
        .sum()
    }

    /// Null-or-equal match of the scope filters
    pub fn matches_scope(&self, scope: &ScopeKey) -> bool {
        filter_matches(self.tenant_id.as_deref(), scope.tenant_id.as_deref())
            && filter_matches(self.country.as_deref(), Some(scope.country.as_str()))
            && filter_matches(self.provider_id.as_deref(), Some(scope.provider_id.as_str()))
    }

    /// Whether the rule applies at the given UTC hour
    pub fn is_active_at(&self, hour: u32) -> bool {
        self.active_hours.map_or(true, |window| window.contains(hour))
    }

    /// Check if a value triggers this rule
    pub fn check(&self, value: f64) -> bool {
        self.operator.compare(value, self.threshold)
    }
}

fn filter_matches(filter: Option<&str>, value: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(expected) => value == Some(expected),
    }
}

/// Input for creating a new alert rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleInput {
    pub name: String,
    pub tenant_id: Option<String>,
    pub country: Option<String>,
    pub provider_id: Option<String>,
    pub issuer: Option<String>,
    pub metric_type: MetricType,
    pub operator: Operator,
    pub threshold: f64,
    pub min_transactions: Option<u64>,
    pub active_hours: Option<ActiveHours>,
    pub severity: Option<Severity>,
    pub enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rule_fixture(metric_type: MetricType, operator: Operator, threshold: f64) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            name: "test-rule".to_string(),
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

    #[rstest]
    #[case(">", 0.3, 0.2, true)]
    #[case(">", 0.2, 0.2, false)]
    #[case(">=", 0.2, 0.2, true)]
    #[case("<", 0.1, 0.2, true)]
    #[case("<=", 0.2, 0.2, true)]
    #[case("lt", 0.3, 0.2, false)]
    fn test_operator_table(
        #[case] op: &str,
        #[case] value: f64,
        #[case] threshold: f64,
        #[case] expected: bool,
    ) {
        let operator: Operator = op.parse().unwrap();
        assert_eq!(operator.compare(value, threshold), expected);
    }

    #[test]
    fn test_unsupported_operator_and_metric() {
        assert!("==".parse::<Operator>().is_err());
        assert!("!=".parse::<Operator>().is_err());
        assert!("latency_p99".parse::<MetricType>().is_err());
        assert_eq!("Error_Rate".parse::<MetricType>().unwrap(), MetricType::ErrorRate);
    }

    #[test]
    fn test_specificity_counts_filters() {
        let mut rule = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2);
        assert_eq!(rule.specificity(), 0);
        rule.country = Some("MX".to_string());
        rule.provider_id = Some("STRIPE".to_string());
        assert_eq!(rule.specificity(), 2);
        rule.issuer = Some("BBVA".to_string());
        assert_eq!(rule.specificity(), 3);
    }

    #[test]
    fn test_scope_matching_is_null_or_equal() {
        let scope = ScopeKey::new(Some("m-1"), "MX", "STRIPE");
        let legacy = ScopeKey::new(None, "MX", "STRIPE");

        let mut rule = rule_fixture(MetricType::ErrorRate, Operator::Gt, 0.2);
        assert!(rule.matches_scope(&scope));
        assert!(rule.matches_scope(&legacy));

        rule.country = Some("MX".to_string());
        assert!(rule.matches_scope(&scope));

        rule.tenant_id = Some("m-1".to_string());
        assert!(rule.matches_scope(&scope));
        assert!(!rule.matches_scope(&legacy));

        rule.provider_id = Some("DLOCAL".to_string());
        assert!(!rule.matches_scope(&scope));
    }

    #[test]
    fn test_active_hours_window() {
        let business = ActiveHours::new(9, 18).unwrap();
        assert!(business.contains(9));
        assert!(business.contains(17));
        assert!(!business.contains(18));
        assert!(!business.contains(3));

        let overnight = ActiveHours::new(22, 6).unwrap();
        assert!(overnight.contains(23));
        assert!(overnight.contains(0));
        assert!(overnight.contains(5));
        assert!(!overnight.contains(6));
        assert!(!overnight.contains(12));

        let all_day = ActiveHours::new(0, 0).unwrap();
        assert!(all_day.contains(13));

        assert!(ActiveHours::new(9, 24).is_err());
    }

    #[test]
    fn test_metric_values() {
        let counts = OutcomeCounts::new(60, 5, 35);
        assert!((MetricType::ErrorRate.value(&counts) - 0.35).abs() < 1e-9);
        assert_eq!(MetricType::Volume.value(&counts), 100.0);
        assert_eq!(MetricType::ErrorRate.affected(&counts), 35);
        assert_eq!(MetricType::ApprovalRate.affected(&counts), 40);
    }
}
