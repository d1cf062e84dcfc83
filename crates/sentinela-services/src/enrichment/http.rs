use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use sentinela_core::{Detection, EnrichmentResult};

use super::{EnrichmentItem, RiskEnricher};

/// Posts masked detections to an HTTP classifier and reads back
/// `{"confidence": f64, "recommendations": [..]}`.
pub struct HttpRiskEnricher {
    http_client: reqwest::Client,
    endpoint: String,
}

impl Debug for HttpRiskEnricher {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HttpRiskEnricher")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl HttpRiskEnricher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for risk enrichment")?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RiskEnricher for HttpRiskEnricher {
    async fn enrich(&self, detections: &[Detection]) -> Result<EnrichmentResult> {
        let items: Vec<EnrichmentItem> = detections.iter().map(EnrichmentItem::from).collect();
        let request_body = json!({ "detections": items });

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request_body)
            .send()
            .await
            .context("Failed to send request to risk classifier")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "Risk classifier request failed with status {}",
                status
            ));
        }

        let result: EnrichmentResult = response
            .json()
            .await
            .context("Failed to parse risk classifier response")?;

        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(anyhow::anyhow!(
                "Risk classifier returned confidence out of range: {}",
                result.confidence
            ));
        }

        tracing::debug!(
            confidence = result.confidence,
            recommendations = result.recommendations.len(),
            "Risk enrichment received"
        );
        Ok(result)
    }
}
