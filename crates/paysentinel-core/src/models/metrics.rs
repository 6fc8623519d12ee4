//! Outcome counters, metric snapshots and event-log breakdowns

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The (tenant, country, provider) partition metrics and rules are keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    /// Merchant/tenant; absent for counters written with the legacy key shape
    pub tenant_id: Option<String>,
    /// ISO country code
    pub country: String,
    /// Payment provider identifier
    pub provider_id: String,
}

impl ScopeKey {
    /// Create a scope key
    pub fn new(tenant_id: Option<&str>, country: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.map(String::from),
            country: country.into(),
            provider_id: provider_id.into(),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.tenant_id.as_deref().unwrap_or("*"),
            self.country,
            self.provider_id
        )
    }
}

/// Final status of a payment transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    /// Approved by the provider
    Succeeded,
    /// Declined by the issuer or provider
    Declined,
    /// Technical failure
    Error,
}

impl Outcome {
    /// Token used in counter keys and the event log
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Declined => "DECLINED",
            Self::Error => "ERROR",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCEEDED" => Ok(Self::Succeeded),
            "DECLINED" => Ok(Self::Declined),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// Transaction counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    /// Approved transactions
    pub succeeded: u64,
    /// Declined transactions
    pub declined: u64,
    /// Errored transactions
    pub errored: u64,
}

impl OutcomeCounts {
    /// Create counts from raw values
    pub fn new(succeeded: u64, declined: u64, errored: u64) -> Self {
        Self {
            succeeded,
            declined,
            errored,
        }
    }

    /// Add `count` transactions with the given outcome
    pub fn add(&mut self, outcome: Outcome, count: u64) {
        match outcome {
            Outcome::Succeeded => self.succeeded += count,
            Outcome::Declined => self.declined += count,
            Outcome::Error => self.errored += count,
        }
    }

    /// Total sample size
    pub fn total(&self) -> u64 {
        self.succeeded + self.declined + self.errored
    }

    /// Errors over all transactions
    pub fn error_rate(&self) -> f64 {
        ratio(self.errored, self.total())
    }

    /// Declines over decided (succeeded + declined) transactions
    pub fn decline_rate(&self) -> f64 {
        ratio(self.declined, self.succeeded + self.declined)
    }

    /// Approvals over all transactions
    pub fn approval_rate(&self) -> f64 {
        ratio(self.succeeded, self.total())
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Aggregated counters of one scope key for the current cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Scope the counts belong to
    pub scope: ScopeKey,
    /// Summed counts across resident minute buckets
    pub counts: OutcomeCounts,
}

impl MetricSnapshot {
    /// Create a snapshot
    pub fn new(scope: ScopeKey, counts: OutcomeCounts) -> Self {
        Self { scope, counts }
    }
}

/// One minute of the event log for trend confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteBucket {
    /// Start of the minute
    pub minute: DateTime<Utc>,
    /// Errors within the minute
    pub errors: u64,
    /// All transactions within the minute
    pub total: u64,
}

/// Response-code distribution of the affected population
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCodeBreakdown {
    /// Count per provider response code (`UNKNOWN` when absent)
    pub response_codes: BTreeMap<String, u64>,
    /// Distinct sub-statuses seen
    pub sub_statuses: Vec<String>,
    /// Code with the highest count, smallest code on ties
    pub most_common_code: Option<String>,
}

impl ResponseCodeBreakdown {
    /// Build a breakdown from `(code, count, sub_statuses)` rows
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (Option<String>, u64, Vec<String>)>,
    {
        let mut response_codes: BTreeMap<String, u64> = BTreeMap::new();
        let mut sub_statuses: Vec<String> = Vec::new();

        for (code, count, subs) in rows {
            let code = code.unwrap_or_else(|| "UNKNOWN".to_string());
            *response_codes.entry(code).or_insert(0) += count;
            sub_statuses.extend(subs.into_iter().filter(|s| !s.is_empty()));
        }

        sub_statuses.sort();
        sub_statuses.dedup();

        // BTreeMap iterates codes ascending, so the first maximum is the smallest code
        let most_common_code = response_codes
            .iter()
            .fold(None::<(&String, u64)>, |best, (code, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((code, count)),
            })
            .map(|(code, _)| code.clone());

        Self {
            response_codes,
            sub_statuses,
            most_common_code,
        }
    }
}

/// Affected transactions grouped by card issuer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerBreakdown {
    /// Issuer name from the card details
    pub issuer_name: String,
    /// Affected transactions for this issuer
    pub error_count: u64,
    /// Amount at risk for this issuer, USD
    pub revenue_at_risk: f64,
    /// Distinct sub-statuses for this issuer
    pub sub_statuses: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let counts = OutcomeCounts::new(60, 5, 35);
        assert_eq!(counts.total(), 100);
        assert!((counts.error_rate() - 0.35).abs() < 1e-9);
        assert!((counts.approval_rate() - 0.60).abs() < 1e-9);
        // declines only over decided transactions
        assert!((counts.decline_rate() - 5.0 / 65.0).abs() < 1e-9);
    }

    #[test]
    fn test_rates_on_empty_counts() {
        let counts = OutcomeCounts::default();
        assert_eq!(counts.error_rate(), 0.0);
        assert_eq!(counts.decline_rate(), 0.0);
        assert_eq!(counts.approval_rate(), 0.0);
    }

    #[test]
    fn test_outcome_tokens() {
        assert_eq!("ERROR".parse::<Outcome>().unwrap(), Outcome::Error);
        assert_eq!(Outcome::Succeeded.as_str(), "SUCCEEDED");
        assert!("FAILED".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_most_common_code_breaks_ties_deterministically() {
        let breakdown = ResponseCodeBreakdown::from_rows(vec![
            (Some("504".to_string()), 7, vec!["TIMEOUT".to_string()]),
            (Some("503".to_string()), 7, vec!["".to_string()]),
            (None, 2, vec!["TIMEOUT".to_string(), "UNAVAILABLE".to_string()]),
        ]);

        assert_eq!(breakdown.most_common_code.as_deref(), Some("503"));
        assert_eq!(breakdown.response_codes.get("UNKNOWN"), Some(&2));
        assert_eq!(breakdown.sub_statuses, vec!["TIMEOUT", "UNAVAILABLE"]);
    }

    #[test]
    fn test_empty_breakdown_has_no_code() {
        let breakdown = ResponseCodeBreakdown::from_rows(Vec::new());
        assert!(breakdown.most_common_code.is_none());
        assert!(breakdown.response_codes.is_empty());
    }

    #[test]
    fn test_scope_display() {
        let legacy = ScopeKey::new(None, "MX", "STRIPE");
        assert_eq!(legacy.to_string(), "*/MX/STRIPE");
        let scoped = ScopeKey::new(Some("m-1"), "BR", "DLOCAL");
        assert_eq!(scoped.to_string(), "m-1/BR/DLOCAL");
    }
}
