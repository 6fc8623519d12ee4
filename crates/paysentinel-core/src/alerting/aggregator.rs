//! Grouping of raw counter keys into per-scope metric snapshots

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use metrics::counter;
use tracing::debug;

use crate::models::{MetricSnapshot, Outcome, OutcomeCounts, ScopeKey};

const MINUTE_FORMAT: &str = "%Y%m%d%H%M";

/// A counter key broken into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKey {
    pub scope: ScopeKey,
    pub outcome: Outcome,
    pub minute: NaiveDateTime,
}

impl CounterKey {
    /// Parse `{prefix}:{tenant}:{country}:{provider}:{OUTCOME}:{minute}` or the
    /// tenantless legacy form `{prefix}:{country}:{provider}:{OUTCOME}:{minute}`
    pub fn parse(key: &str, prefix: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split(':').collect();
        let (tenant, country, provider, outcome, minute) = match parts.as_slice() {
            [p, tenant, country, provider, outcome, minute] if *p == prefix => {
                (Some(*tenant), *country, *provider, *outcome, *minute)
            }
            [p, country, provider, outcome, minute] if *p == prefix => {
                (None, *country, *provider, *outcome, *minute)
            }
            _ => return None,
        };

        if country.is_empty() || provider.is_empty() || tenant.is_some_and(str::is_empty) {
            return None;
        }
        let outcome = outcome.parse::<Outcome>().ok()?;
        let minute = NaiveDateTime::parse_from_str(minute, MINUTE_FORMAT).ok()?;

        Some(Self {
            scope: ScopeKey::new(tenant, country, provider),
            outcome,
            minute,
        })
    }
}

/// Sum counters per scope key across every resident minute bucket.
///
/// Keys that don't parse and negative values are skipped and counted in
/// `sentinel_malformed_counter_keys_total`. Output is ordered by scope key.
pub fn aggregate<I>(counters: I, prefix: &str) -> Vec<MetricSnapshot>
where
    I: IntoIterator<Item = (String, i64)>,
{
    let mut by_scope: BTreeMap<ScopeKey, OutcomeCounts> = BTreeMap::new();
    let mut malformed = 0u64;

    for (key, value) in counters {
        let parsed = CounterKey::parse(&key, prefix);
        match (parsed, u64::try_from(value)) {
            (Some(parsed), Ok(count)) => {
                by_scope.entry(parsed.scope).or_default().add(parsed.outcome, count);
            }
            _ => {
                debug!(key = %key, value, "Skipping malformed counter");
                malformed += 1;
            }
        }
    }

    if malformed > 0 {
        counter!("sentinel_malformed_counter_keys_total").increment(malformed);
    }

    by_scope
        .into_iter()
        .map(|(scope, counts)| MetricSnapshot::new(scope, counts))
        .collect()
}
