//! PostgreSQL connection and event-log queries

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::alerting::{EventLog, KamContact, KamDirectory};
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{
    IssuerBreakdown, MinuteBucket, Outcome, OutcomeCounts, ResponseCodeBreakdown, ScopeKey,
};

/// Largest issuer breakdown returned to the root cause resolver
const ISSUER_BREAKDOWN_LIMIT: i64 = 5;

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Create a new PostgreSQL connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn outcome_tokens(outcomes: &[Outcome]) -> Vec<String> {
    outcomes.iter().map(|o| o.as_str().to_string()).collect()
}

fn window_secs(window: Duration) -> f64 {
    window.as_secs_f64()
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Queries against `events_log`, all scoped by tenant, provider, country and window
#[derive(Clone)]
pub struct EventLogRepository {
    pool: PgPool,
}

impl EventLogRepository {
    /// Create a new event log repository
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool.clone(),
        }
    }
}

// $1 provider, $2 country, $3 tenant (NULL = any), $4 window seconds
const SCOPE_FILTER: &str = r#"
    provider_id = $1
    AND raw_payload->>'country' = $2
    AND ($3::text IS NULL OR merchant_id = $3)
    AND created_at >= NOW() - make_interval(secs => $4)
"#;

#[async_trait]
impl EventLog for EventLogRepository {
    async fn error_trend(&self, scope: &ScopeKey, buckets: u32) -> Result<Vec<MinuteBucket>> {
        let sql = format!(
            r#"
            SELECT
                DATE_TRUNC('minute', created_at) AS minute,
                COUNT(*) FILTER (WHERE status = 'ERROR') AS errors,
                COUNT(*) AS total
            FROM events_log
            WHERE {SCOPE_FILTER}
            GROUP BY minute
            ORDER BY minute DESC
            LIMIT $5
            "#
        );

        let rows: Vec<(DateTime<Utc>, i64, i64)> = sqlx::query_as(&sql)
            .bind(&scope.provider_id)
            .bind(&scope.country)
            .bind(&scope.tenant_id)
            .bind(f64::from(buckets) * 60.0)
            .bind(i64::from(buckets))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(minute, errors, total)| MinuteBucket {
                minute,
                errors: non_negative(errors),
                total: non_negative(total),
            })
            .collect())
    }

    async fn recent_successes(&self, scope: &ScopeKey, window: Duration) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM events_log WHERE status = 'SUCCEEDED' AND {SCOPE_FILTER}"
        );

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(&scope.provider_id)
            .bind(&scope.country)
            .bind(&scope.tenant_id)
            .bind(window_secs(window))
            .fetch_one(&self.pool)
            .await?;

        Ok(non_negative(count))
    }

    async fn response_code_breakdown(
        &self,
        scope: &ScopeKey,
        outcomes: &[Outcome],
        window: Duration,
    ) -> Result<ResponseCodeBreakdown> {
        let sql = format!(
            r#"
            SELECT
                raw_payload->'provider_data'->>'response_code' AS response_code,
                COUNT(*) AS count,
                ARRAY_REMOVE(ARRAY_AGG(DISTINCT raw_payload->>'sub_status'), NULL) AS sub_statuses
            FROM events_log
            WHERE status = ANY($5) AND {SCOPE_FILTER}
            GROUP BY response_code
            "#
        );

        let rows: Vec<(Option<String>, i64, Vec<String>)> = sqlx::query_as(&sql)
            .bind(&scope.provider_id)
            .bind(&scope.country)
            .bind(&scope.tenant_id)
            .bind(window_secs(window))
            .bind(outcome_tokens(outcomes))
            .fetch_all(&self.pool)
            .await?;

        Ok(ResponseCodeBreakdown::from_rows(
            rows.into_iter()
                .map(|(code, count, subs)| (code, non_negative(count), subs)),
        ))
    }

    async fn issuer_breakdown(
        &self,
        scope: &ScopeKey,
        outcomes: &[Outcome],
        window: Duration,
        min_occurrences: u64,
    ) -> Result<Vec<IssuerBreakdown>> {
        let sql = format!(
            r#"
            SELECT
                raw_payload->'payment_method'->'detail'->'card'->>'issuer_name' AS issuer_name,
                COUNT(*) AS error_count,
                COALESCE(SUM(amount_usd), 0)::float8 AS revenue_at_risk,
                ARRAY_REMOVE(ARRAY_AGG(DISTINCT raw_payload->>'sub_status'), NULL) AS sub_statuses
            FROM events_log
            WHERE status = ANY($5)
                AND raw_payload->'payment_method'->'detail'->'card'->>'issuer_name' IS NOT NULL
                AND {SCOPE_FILTER}
            GROUP BY issuer_name
            HAVING COUNT(*) >= $6
            ORDER BY error_count DESC, issuer_name ASC
            LIMIT $7
            "#
        );

        let rows: Vec<(String, i64, f64, Vec<String>)> = sqlx::query_as(&sql)
            .bind(&scope.provider_id)
            .bind(&scope.country)
            .bind(&scope.tenant_id)
            .bind(window_secs(window))
            .bind(outcome_tokens(outcomes))
            .bind(i64::try_from(min_occurrences).unwrap_or(i64::MAX))
            .bind(ISSUER_BREAKDOWN_LIMIT)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(issuer_name, count, revenue, sub_statuses)| IssuerBreakdown {
                issuer_name,
                error_count: non_negative(count),
                revenue_at_risk: revenue,
                sub_statuses,
            })
            .collect())
    }

    async fn revenue_at_risk(&self, scope: &ScopeKey, outcomes: &[Outcome], window: Duration) -> Result<f64> {
        let sql = format!(
            "SELECT COALESCE(SUM(amount_usd), 0)::float8 FROM events_log WHERE status = ANY($5) AND {SCOPE_FILTER}"
        );

        let total: f64 = sqlx::query_scalar(&sql)
            .bind(&scope.provider_id)
            .bind(&scope.country)
            .bind(&scope.tenant_id)
            .bind(window_secs(window))
            .bind(outcome_tokens(outcomes))
            .fetch_one(&self.pool)
            .await?;

        Ok(total)
    }

    async fn issuer_outcome_counts(
        &self,
        scope: &ScopeKey,
        issuer: &str,
        window: Duration,
    ) -> Result<OutcomeCounts> {
        let sql = format!(
            r#"
            SELECT status, COUNT(*)
            FROM events_log
            WHERE raw_payload->'payment_method'->'detail'->'card'->>'issuer_name' = $5
                AND {SCOPE_FILTER}
            GROUP BY status
            "#
        );

        let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(&scope.provider_id)
            .bind(&scope.country)
            .bind(&scope.tenant_id)
            .bind(window_secs(window))
            .bind(issuer)
            .fetch_all(&self.pool)
            .await?;

        let mut counts = OutcomeCounts::default();
        for (status, count) in rows {
            if let Ok(outcome) = status.parse::<Outcome>() {
                counts.add(outcome, non_negative(count));
            }
        }
        Ok(counts)
    }
}

/// Merchant directory holding key-account-manager contacts
#[derive(Clone)]
pub struct KamRepository {
    pool: PgPool,
}

impl KamRepository {
    /// Create a new KAM repository
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool.clone(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MerchantRow {
    merchant_id: String,
    merchant_name: String,
    kam_name: Option<String>,
    kam_email: Option<String>,
    kam_slack_webhook: Option<String>,
}

#[async_trait]
impl KamDirectory for KamRepository {
    async fn contact_for(&self, tenant_id: &str) -> Result<Option<KamContact>> {
        let row = sqlx::query_as::<_, MerchantRow>(
            r#"
            SELECT merchant_id, merchant_name, kam_name, kam_email, kam_slack_webhook
            FROM merchants
            WHERE merchant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| {
            let email = r.kam_email?;
            Some(KamContact {
                merchant_id: r.merchant_id,
                merchant_name: r.merchant_name,
                kam_name: r.kam_name.unwrap_or_else(|| "Key Account Manager".to_string()),
                kam_email: email,
                slack_webhook: r.kam_slack_webhook,
            })
        }))
    }
}
