//! Semantic risk enrichment
//!
//! An optional external classifier re-scores a finished detection set. It
//! is best effort: the worker bounds every call with a timeout and carries
//! on without enrichment when the classifier fails.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use sentinela_core::{Detection, EnrichmentResult, PatternCategory, RiskLevel};

#[cfg(feature = "enrichment")]
mod http;

#[cfg(feature = "enrichment")]
pub use http::HttpRiskEnricher;

#[async_trait]
pub trait RiskEnricher: Send + Sync {
    async fn enrich(&self, detections: &[Detection]) -> Result<EnrichmentResult>;
}

/// What leaves the process for one detection. Matched values are masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentItem {
    pub pattern_name: String,
    pub category: PatternCategory,
    pub risk_level: RiskLevel,
    pub source_file: String,
    pub validated: bool,
    pub masked_value: String,
}

impl From<&Detection> for EnrichmentItem {
    fn from(detection: &Detection) -> Self {
        Self {
            pattern_name: detection.pattern_name.clone(),
            category: detection.category,
            risk_level: detection.risk_level,
            source_file: detection.source_file.display().to_string(),
            validated: detection.validated,
            masked_value: mask_value(&detection.matched_value),
        }
    }
}

/// Replaces every alphanumeric character except the last two with `*`.
pub fn mask_value(value: &str) -> String {
    let total = value.chars().filter(|c| c.is_alphanumeric()).count();
    let keep_from = total.saturating_sub(2);
    let mut seen = 0;
    value
        .chars()
        .map(|c| {
            if !c.is_alphanumeric() {
                return c;
            }
            seen += 1;
            if seen > keep_from {
                c
            } else {
                '*'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("123.456.789-09"), "***.***.***-09");
        assert_eq!(mask_value("ab"), "ab");
        assert_eq!(mask_value(""), "");
    }

    #[test]
    fn test_item_never_carries_raw_value() {
        let detection = Detection {
            pattern_name: "CPF".to_string(),
            category: PatternCategory::Document,
            matched_value: "123.456.789-09".to_string(),
            source_file: PathBuf::from("docs/ficha.txt"),
            offset: 5,
            validated: true,
            risk_level: RiskLevel::High,
            corroborated: false,
        };
        let item = EnrichmentItem::from(&detection);
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("123.456.789"));
        assert_eq!(item.source_file, "docs/ficha.txt");
    }
}
