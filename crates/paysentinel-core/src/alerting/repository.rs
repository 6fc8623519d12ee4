//! Repositories for alert rules and raised alerts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::db::PostgresPool;
use crate::error::{Error, Result};
use crate::models::{
    ActiveHours, Alert, AlertRule, AlertRuleInput, AlertType, RootCause, ScopeKey, Severity,
    StoredAlert, SuggestedAction,
};

use super::sources::{AlertStore, RuleSource};

/// Repository for alert rules
#[derive(Clone)]
pub struct RuleRepository {
    pool: PgPool,
}

impl RuleRepository {
    /// Create a new rule repository
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    /// Create a new alert rule
    pub async fn create_rule(&self, input: AlertRuleInput) -> Result<AlertRule> {
        if !input.threshold.is_finite() {
            return Err(Error::validation("threshold must be a finite number"));
        }

        let rule = AlertRule {
            id: Uuid::new_v4(),
            name: input.name,
            tenant_id: input.tenant_id,
            country: input.country,
            provider_id: input.provider_id,
            issuer: input.issuer,
            metric_type: input.metric_type,
            operator: input.operator,
            threshold: input.threshold,
            min_transactions: input.min_transactions.unwrap_or(50),
            active_hours: input.active_hours,
            severity: input.severity.unwrap_or_default(),
            enabled: input.enabled.unwrap_or(true),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO alert_rules (
                rule_id, rule_name, merchant_id, scope_country, scope_provider, scope_issuer,
                metric_type, operator, threshold_value, min_transactions,
                active_start_hour, active_end_hour, severity, is_active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.tenant_id)
        .bind(&rule.country)
        .bind(&rule.provider_id)
        .bind(&rule.issuer)
        .bind(rule.metric_type.as_str())
        .bind(rule.operator.symbol())
        .bind(rule.threshold)
        .bind(i64::try_from(rule.min_transactions).unwrap_or(i64::MAX))
        .bind(rule.active_hours.map(|h| i16::from(h.start_hour)))
        .bind(rule.active_hours.map(|h| i16::from(h.end_hour)))
        .bind(rule.severity.as_str())
        .bind(rule.enabled)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;

        Ok(rule)
    }

    /// List all rules, including disabled and unparseable ones' valid siblings
    pub async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRuleRow>(
            r#"
            SELECT * FROM alert_rules ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(convert_rows(rows))
    }

    /// Enable or disable a rule
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE alert_rules SET is_active = $2 WHERE rule_id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("alert rule", id.to_string()));
        }
        Ok(())
    }

    /// Delete a rule
    pub async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE rule_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RuleSource for RuleRepository {
    async fn rules_for(&self, scope: &ScopeKey) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, AlertRuleRow>(
            r#"
            SELECT * FROM alert_rules
            WHERE is_active = TRUE
              AND (merchant_id IS NULL OR merchant_id = $1)
              AND (scope_country IS NULL OR scope_country = $2)
              AND (scope_provider IS NULL OR scope_provider = $3)
            "#,
        )
        .bind(&scope.tenant_id)
        .bind(&scope.country)
        .bind(&scope.provider_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(convert_rows(rows))
    }
}

fn convert_rows(rows: Vec<AlertRuleRow>) -> Vec<AlertRule> {
    rows.into_iter()
        .filter_map(|row| {
            let rule_id = row.rule_id;
            match AlertRule::try_from(row) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(rule_id = %rule_id, error = %e, "Skipping misconfigured alert rule");
                    None
                }
            }
        })
        .collect()
}

/// Repository for raised alerts
#[derive(Clone)]
pub struct AlertRepository {
    pool: PgPool,
}

impl AlertRepository {
    /// Create a new alert repository
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    /// Most recent alerts, newest first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<StoredAlert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alerts
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredAlert::try_from).collect()
    }
}

#[async_trait]
impl AlertStore for AlertRepository {
    async fn insert_alert(&self, alert: &Alert) -> Result<Uuid> {
        let root_cause = serde_json::to_value(&alert.root_cause)?;
        let suggested_action = serde_json::to_value(&alert.suggested_action)?;

        let alert_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO alerts (
                created_at, severity, alert_type, title, merchant_id, country, provider_id,
                rule_id, metric_value, threshold_value, confidence_score, revenue_at_risk_usd,
                affected_transactions, sla_breach_countdown_seconds, root_cause,
                llm_explanation, suggested_action
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING alert_id
            "#,
        )
        .bind(alert.created_at)
        .bind(alert.severity.as_str())
        .bind(alert.alert_type.as_str())
        .bind(&alert.title)
        .bind(&alert.scope.tenant_id)
        .bind(&alert.scope.country)
        .bind(&alert.scope.provider_id)
        .bind(alert.rule_id)
        .bind(alert.metric_value)
        .bind(alert.threshold_value)
        .bind(alert.confidence_score)
        .bind(alert.revenue_at_risk_usd)
        .bind(i64::try_from(alert.affected_transactions).unwrap_or(i64::MAX))
        .bind(alert.sla_breach_countdown_seconds.map(|s| i32::try_from(s).unwrap_or(i32::MAX)))
        .bind(&root_cause)
        .bind(&alert.llm_explanation)
        .bind(&suggested_action)
        .fetch_one(&self.pool)
        .await?;

        Ok(alert_id)
    }
}

// Database row types for mapping

#[derive(sqlx::FromRow)]
struct AlertRuleRow {
    rule_id: Uuid,
    rule_name: String,
    merchant_id: Option<String>,
    scope_country: Option<String>,
    scope_provider: Option<String>,
    scope_issuer: Option<String>,
    metric_type: String,
    operator: String,
    threshold_value: f64,
    min_transactions: i64,
    active_start_hour: Option<i16>,
    active_end_hour: Option<i16>,
    severity: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = Error;

    fn try_from(row: AlertRuleRow) -> Result<Self> {
        let metric_type = row.metric_type.parse().map_err(Error::config)?;
        let operator = row.operator.parse().map_err(Error::config)?;
        let severity = row.severity.parse().map_err(Error::config)?;

        let active_hours = match (row.active_start_hour, row.active_end_hour) {
            (None, None) => None,
            (Some(start), Some(end)) => {
                let start = u8::try_from(start).map_err(|_| Error::config("negative active hour"))?;
                let end = u8::try_from(end).map_err(|_| Error::config("negative active hour"))?;
                Some(ActiveHours::new(start, end).map_err(Error::config)?)
            }
            _ => return Err(Error::config("active hours need both a start and an end")),
        };

        if !row.threshold_value.is_finite() {
            return Err(Error::config("threshold is not a finite number"));
        }

        Ok(AlertRule {
            id: row.rule_id,
            name: row.rule_name,
            tenant_id: row.merchant_id,
            country: row.scope_country,
            provider_id: row.scope_provider,
            issuer: row.scope_issuer,
            metric_type,
            operator,
            threshold: row.threshold_value,
            min_transactions: u64::try_from(row.min_transactions).unwrap_or(0),
            active_hours,
            severity,
            enabled: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    alert_id: Uuid,
    created_at: DateTime<Utc>,
    severity: String,
    alert_type: String,
    title: String,
    merchant_id: Option<String>,
    country: String,
    provider_id: String,
    rule_id: Option<Uuid>,
    metric_value: f64,
    threshold_value: f64,
    confidence_score: f64,
    revenue_at_risk_usd: f64,
    affected_transactions: i64,
    sla_breach_countdown_seconds: Option<i32>,
    root_cause: serde_json::Value,
    llm_explanation: Option<String>,
    suggested_action: serde_json::Value,
}

impl TryFrom<AlertRow> for StoredAlert {
    type Error = Error;

    fn try_from(row: AlertRow) -> Result<Self> {
        let severity: Severity = row.severity.parse().unwrap_or_default();
        let alert_type: AlertType = serde_json::from_value(serde_json::Value::String(row.alert_type))?;
        let root_cause: RootCause = serde_json::from_value(row.root_cause)?;
        let suggested_action: SuggestedAction = serde_json::from_value(row.suggested_action)?;

        Ok(StoredAlert {
            alert_id: row.alert_id,
            alert: Alert {
                created_at: row.created_at,
                severity,
                alert_type,
                title: row.title,
                scope: ScopeKey {
                    tenant_id: row.merchant_id,
                    country: row.country,
                    provider_id: row.provider_id,
                },
                rule_id: row.rule_id,
                metric_value: row.metric_value,
                threshold_value: row.threshold_value,
                confidence_score: row.confidence_score,
                revenue_at_risk_usd: row.revenue_at_risk_usd,
                affected_transactions: u64::try_from(row.affected_transactions).unwrap_or(0),
                root_cause,
                suggested_action,
                sla_breach_countdown_seconds: row
                    .sla_breach_countdown_seconds
                    .and_then(|s| u32::try_from(s).ok()),
                llm_explanation: row.llm_explanation,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricType, Operator};

    fn row() -> AlertRuleRow {
        AlertRuleRow {
            rule_id: Uuid::new_v4(),
            rule_name: "MX Stripe errors".to_string(),
            merchant_id: Some("m-1".to_string()),
            scope_country: Some("MX".to_string()),
            scope_provider: Some("STRIPE".to_string()),
            scope_issuer: None,
            metric_type: "error_rate".to_string(),
            operator: ">".to_string(),
            threshold_value: 0.2,
            min_transactions: 50,
            active_start_hour: None,
            active_end_hour: None,
            severity: "critical".to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_converts_to_rule() {
        let rule = AlertRule::try_from(row()).unwrap();
        assert_eq!(rule.metric_type, MetricType::ErrorRate);
        assert_eq!(rule.operator, Operator::Gt);
        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.specificity(), 3);
        assert!(rule.active_hours.is_none());
    }

    #[test]
    fn test_unknown_metric_or_operator_is_config_error() {
        let mut bad_metric = row();
        bad_metric.metric_type = "latency_p99".to_string();
        assert!(matches!(AlertRule::try_from(bad_metric), Err(Error::Config(_))));

        let mut bad_operator = row();
        bad_operator.operator = "==".to_string();
        assert!(matches!(AlertRule::try_from(bad_operator), Err(Error::Config(_))));
    }

    #[test]
    fn test_half_open_active_hours_rejected() {
        let mut r = row();
        r.active_start_hour = Some(9);
        assert!(AlertRule::try_from(r).is_err());

        let mut r = row();
        r.active_start_hour = Some(9);
        r.active_end_hour = Some(18);
        let rule = AlertRule::try_from(r).unwrap();
        assert!(rule.is_active_at(10));
        assert!(!rule.is_active_at(20));
    }

    #[test]
    fn test_convert_rows_skips_bad_rows() {
        let mut bad = row();
        bad.metric_type = "unknown".to_string();
        let rules = convert_rows(vec![row(), bad, row()]);
        assert_eq!(rules.len(), 2);
    }
}
