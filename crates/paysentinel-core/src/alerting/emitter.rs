//! Alert assembly, persistence and dispatch

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Alert, AlertType, IssuerBreakdown, Outcome, ResponseCodeBreakdown, Severity};

use super::reasoning::{IncidentContext, ReasoningResponse};
use super::root_cause::{self, Evidence};
use super::sources::{bounded, AlertStore, EventLog, KamDirectory, Notifier, Reasoner};
use super::state::{DetectorId, EvaluationKey};

/// Seconds until a critical incident breaches its SLA
const CRITICAL_SLA_SECONDS: u32 = 300;

/// A confirmed breach that survived cooldown
#[derive(Debug, Clone)]
pub struct Detection {
    pub key: EvaluationKey,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub metric_value: f64,
    pub threshold_value: f64,
    pub affected_transactions: u64,
    /// Appended to the cause text, e.g. the z-score of a statistical anomaly
    pub note: Option<String>,
}

/// Outcomes whose transactions count as affected for an alert type
pub fn affected_outcomes(alert_type: AlertType) -> &'static [Outcome] {
    match alert_type {
        AlertType::HighErrorRate => &[Outcome::Error],
        AlertType::HighDeclineRate => &[Outcome::Declined],
        AlertType::LowApprovalRate | AlertType::StatisticalAnomaly => &[Outcome::Declined, Outcome::Error],
        AlertType::VolumeThreshold => &[Outcome::Succeeded, Outcome::Declined, Outcome::Error],
    }
}

/// Timing and defaults used while emitting
#[derive(Debug, Clone)]
pub struct EmitterSettings {
    pub analysis_window: Duration,
    pub issuer_min_errors: u64,
    pub query_timeout: Duration,
    pub persist_retries: u32,
    pub persist_backoff: Duration,
    pub reasoning_timeout: Duration,
    pub notify_timeout: Duration,
    pub default_confidence: f64,
    pub time_window_minutes: u32,
}

impl EmitterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analysis_window: config.detection.analysis_window,
            issuer_min_errors: config.detection.issuer_min_errors,
            query_timeout: config.detection.query_timeout,
            persist_retries: config.detection.persist_retries,
            persist_backoff: Duration::from_millis(200),
            reasoning_timeout: config.reasoning.timeout,
            notify_timeout: config.notification.timeout,
            default_confidence: config.reasoning.default_confidence,
            time_window_minutes: config.reasoning.time_window_minutes,
        }
    }
}

/// Builds the final alert, persists it and hands it to the notifier
pub struct AlertEmitter {
    event_log: Arc<dyn EventLog>,
    store: Arc<dyn AlertStore>,
    reasoner: Option<Arc<dyn Reasoner>>,
    kam: Arc<dyn KamDirectory>,
    notifier: Arc<dyn Notifier>,
    settings: EmitterSettings,
}

impl AlertEmitter {
    pub fn new(
        event_log: Arc<dyn EventLog>,
        store: Arc<dyn AlertStore>,
        reasoner: Option<Arc<dyn Reasoner>>,
        kam: Arc<dyn KamDirectory>,
        notifier: Arc<dyn Notifier>,
        settings: EmitterSettings,
    ) -> Self {
        Self {
            event_log,
            store,
            reasoner,
            kam,
            notifier,
            settings,
        }
    }

    /// Emit one alert. Never fails: every collaborator degrades on its own.
    pub async fn emit(&self, detection: &Detection, now: DateTime<Utc>) -> (Uuid, Alert) {
        let scope = &detection.key.scope;
        let outcomes = affected_outcomes(detection.alert_type);
        let window = self.settings.analysis_window;
        let deadline = self.settings.query_timeout;

        let codes = bounded(
            "event_log",
            deadline,
            self.event_log.response_code_breakdown(scope, outcomes, window),
        )
        .await
        .unwrap_or_else(|e| {
            warn!(scope = %scope, error = %e, "Response code breakdown unavailable");
            ResponseCodeBreakdown::default()
        });

        let issuers = bounded(
            "event_log",
            deadline,
            self.event_log
                .issuer_breakdown(scope, outcomes, window, self.settings.issuer_min_errors),
        )
        .await
        .unwrap_or_else(|e| {
            warn!(scope = %scope, error = %e, "Issuer breakdown unavailable");
            Vec::new()
        });

        let revenue_at_risk = bounded(
            "event_log",
            deadline,
            self.event_log.revenue_at_risk(scope, outcomes, window),
        )
        .await
        .unwrap_or_else(|e| {
            warn!(scope = %scope, error = %e, "Revenue at risk unavailable");
            0.0
        });

        let (mut root_cause, mut suggested_action) = root_cause::resolve(&Evidence {
            provider: &scope.provider_id,
            country: &scope.country,
            alert_type: detection.alert_type,
            most_common_code: codes.most_common_code.as_deref(),
            issuers: &issuers,
        });
        if let Some(note) = &detection.note {
            root_cause.issue = format!("{} - {note}", root_cause.issue);
        }

        let mut confidence_score = self.settings.default_confidence;
        let mut llm_explanation = None;
        if let Some(analysis) = self
            .reason(detection, &codes, &issuers, revenue_at_risk)
            .await
        {
            if let Some(label) = analysis.recommended_action.filter(|l| !l.trim().is_empty()) {
                suggested_action.label = label;
                if let Some(action_type) = analysis.action_type.and_then(|t| t.parse().ok()) {
                    suggested_action.action_type = action_type;
                }
            }
            if let Some(confidence) = analysis.confidence.filter(|c| c.is_finite()) {
                confidence_score = confidence.clamp(0.0, 1.0);
            }
            llm_explanation = Some(analysis.explanation).filter(|e| !e.is_empty());
        }

        let alert = Alert {
            created_at: now,
            severity: detection.severity,
            alert_type: detection.alert_type,
            title: format!(
                "{} {} - {} ({})",
                scope.provider_id,
                scope.country,
                detection.alert_type.title(),
                root_cause.scope
            ),
            scope: scope.clone(),
            rule_id: match detection.key.detector {
                DetectorId::Rule(id) => Some(id),
                DetectorId::Fallback => None,
            },
            metric_value: detection.metric_value,
            threshold_value: detection.threshold_value,
            confidence_score,
            revenue_at_risk_usd: revenue_at_risk,
            affected_transactions: detection.affected_transactions,
            root_cause,
            suggested_action,
            sla_breach_countdown_seconds: (detection.severity == Severity::Critical)
                .then_some(CRITICAL_SLA_SECONDS),
            llm_explanation,
        };

        let alert_id = self.persist(&alert).await;
        counter!("sentinel_alerts_total", "severity" => alert.severity.as_str()).increment(1);
        warn!(
            alert_id = %alert_id,
            severity = %alert.severity,
            alert_type = %alert.alert_type,
            provider = %scope.provider_id,
            country = %scope.country,
            tenant = scope.tenant_id.as_deref().unwrap_or("*"),
            affected = alert.affected_transactions,
            revenue_at_risk = alert.revenue_at_risk_usd,
            "Alert triggered"
        );

        self.dispatch(alert_id, &alert).await;
        (alert_id, alert)
    }

    async fn reason(
        &self,
        detection: &Detection,
        codes: &ResponseCodeBreakdown,
        issuers: &[IssuerBreakdown],
        revenue_at_risk: f64,
    ) -> Option<ReasoningResponse> {
        let reasoner = self.reasoner.as_ref()?;
        let scope = &detection.key.scope;
        let top_issuer = issuers.first();

        let context = IncidentContext {
            provider: scope.provider_id.clone(),
            country: scope.country.clone(),
            error_count: detection.affected_transactions,
            revenue_at_risk_usd: revenue_at_risk,
            issuer_name: top_issuer.map(|i| i.issuer_name.clone()),
            sub_statuses: top_issuer
                .map(|i| i.sub_statuses.clone())
                .unwrap_or_else(|| codes.sub_statuses.clone()),
            response_codes: codes.response_codes.clone(),
            most_common_code: codes.most_common_code.clone(),
            merchant_advice_code: None,
            time_window_minutes: self.settings.time_window_minutes,
        };

        match bounded("reasoner", self.settings.reasoning_timeout, reasoner.analyze(&context)).await {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Reasoning unavailable, alerting without explanation");
                None
            }
        }
    }

    /// Insert with retries; falls back to a local identifier so the cycle continues
    async fn persist(&self, alert: &Alert) -> Uuid {
        let attempts = self.settings.persist_retries + 1;

        for attempt in 1..=attempts {
            match self.store.insert_alert(alert).await {
                Ok(id) => return id,
                Err(e) => {
                    counter!("sentinel_collaborator_failures_total", "collaborator" => "alert_store")
                        .increment(1);
                    if attempt < attempts {
                        warn!(attempt, error = %e, "Alert insert failed, retrying");
                        tokio::time::sleep(self.settings.persist_backoff * attempt).await;
                    } else {
                        error!(
                            attempts,
                            error = %e,
                            title = %alert.title,
                            "Alert could not be persisted"
                        );
                    }
                }
            }
        }

        Uuid::new_v4()
    }

    async fn dispatch(&self, alert_id: Uuid, alert: &Alert) {
        let deadline = self.settings.notify_timeout;

        let contact = match alert.scope.tenant_id.as_deref() {
            Some(tenant) => bounded("kam_directory", deadline, self.kam.contact_for(tenant))
                .await
                .unwrap_or_else(|e| {
                    warn!(tenant, error = %e, "KAM lookup failed");
                    None
                }),
            None => None,
        };

        match bounded(
            "notifier",
            deadline,
            self.notifier.notify(alert_id, alert, contact.as_ref()),
        )
        .await
        {
            Ok(()) => info!(alert_id = %alert_id, kam = contact.is_some(), "Alert dispatched"),
            Err(e) => warn!(alert_id = %alert_id, error = %e, "Alert notification failed"),
        }
        debug!(alert_id = %alert_id, "Emission complete");
    }
}
