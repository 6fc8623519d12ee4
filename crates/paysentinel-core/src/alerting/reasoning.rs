//! Client for the natural-language reasoning service

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ReasoningConfig;
use crate::error::{Error, Result};

use super::sources::Reasoner;

/// Incident summary sent to `POST {url}/analyze`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentContext {
    pub provider: String,
    pub country: String,
    pub error_count: u64,
    pub revenue_at_risk_usd: f64,
    pub issuer_name: Option<String>,
    pub sub_statuses: Vec<String>,
    pub response_codes: BTreeMap<String, u64>,
    pub most_common_code: Option<String>,
    pub merchant_advice_code: Option<String>,
    pub time_window_minutes: u32,
}

/// Analysis returned by the reasoning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub explanation: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub recommended_action: Option<String>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
}

/// HTTP implementation of [`Reasoner`]
#[derive(Clone)]
pub struct HttpReasoner {
    client: Client,
    endpoint: String,
}

impl HttpReasoner {
    /// Build a client for the service at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/analyze", base_url.trim_end_matches('/')),
        })
    }

    /// Build from configuration; `None` when no URL is configured
    pub fn from_config(config: &ReasoningConfig) -> Result<Option<Self>> {
        config
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| Self::new(url, config.timeout))
            .transpose()
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn analyze(&self, context: &IncidentContext) -> Result<ReasoningResponse> {
        let response = self.client.post(&self.endpoint).json(context).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::internal(format!("reasoning service returned {status}")));
        }

        let analysis: ReasoningResponse = response.json().await?;
        debug!(
            confidence = ?analysis.confidence,
            processing_time_ms = ?analysis.processing_time_ms,
            "Reasoning service responded"
        );
        Ok(analysis)
    }
}
