use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

/// PII family a detection pattern belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Document,
    Personal,
    Contact,
    Financial,
    Custom,
}

impl Display for PatternCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PatternCategory::Document => write!(f, "document"),
            PatternCategory::Personal => write!(f, "personal"),
            PatternCategory::Contact => write!(f, "contact"),
            PatternCategory::Financial => write!(f, "financial"),
            PatternCategory::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for PatternCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" => Ok(PatternCategory::Document),
            "personal" => Ok(PatternCategory::Personal),
            "contact" => Ok(PatternCategory::Contact),
            "financial" => Ok(PatternCategory::Financial),
            "custom" => Ok(PatternCategory::Custom),
            _ => Err(anyhow::anyhow!("Invalid pattern category: {}", s)),
        }
    }
}

/// Sensitivity of a detection. Ordering follows severity: `Low < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// One level up, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }
}

impl Display for RiskLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(anyhow::anyhow!("Invalid risk level: {}", s)),
        }
    }
}

/// One PII occurrence found in one extracted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub pattern_name: String,
    pub category: PatternCategory,
    pub matched_value: String,
    /// Archive-relative path of the file the match came from
    pub source_file: PathBuf,
    /// Byte offset of the match in the decoded text
    pub offset: usize,
    pub validated: bool,
    pub risk_level: RiskLevel,
    /// Set when a co-located detection raised the risk level
    pub corroborated: bool,
}

/// Best-effort semantic re-scoring returned by an external classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub confidence: f64,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Everything the Detecting stage produced for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    /// Files skipped because their content is not text
    pub skipped_binary: Vec<PathBuf>,
    pub files_scanned: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentResult>,
}

impl DetectionReport {
    pub fn highest_risk(&self) -> Option<RiskLevel> {
        self.detections.iter().map(|d| d.risk_level).max()
    }

    pub fn count_at_least(&self, level: RiskLevel) -> usize {
        self.detections
            .iter()
            .filter(|d| d.risk_level >= level)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_saturates_at_critical() {
        assert_eq!(RiskLevel::Low.escalate(), RiskLevel::Medium);
        assert_eq!(RiskLevel::Medium.escalate(), RiskLevel::High);
        assert_eq!(RiskLevel::High.escalate(), RiskLevel::Critical);
        assert_eq!(RiskLevel::Critical.escalate(), RiskLevel::Critical);
    }

    #[test]
    fn risk_levels_order_by_severity() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
    }

    #[test]
    fn category_parsing_is_case_insensitive() {
        assert_eq!(
            "Document".parse::<PatternCategory>().unwrap(),
            PatternCategory::Document
        );
        assert!("biometric".parse::<PatternCategory>().is_err());
    }

    #[test]
    fn report_summaries() {
        let detection = |risk| Detection {
            pattern_name: "CPF".to_string(),
            category: PatternCategory::Document,
            matched_value: "123.456.789-09".to_string(),
            source_file: PathBuf::from("a.txt"),
            offset: 0,
            validated: true,
            risk_level: risk,
            corroborated: false,
        };
        let report = DetectionReport {
            detections: vec![detection(RiskLevel::Medium), detection(RiskLevel::Critical)],
            ..Default::default()
        };
        assert_eq!(report.highest_risk(), Some(RiskLevel::Critical));
        assert_eq!(report.count_at_least(RiskLevel::High), 1);
        assert_eq!(DetectionReport::default().highest_risk(), None);
    }
}
