//! Deterministic risk scoring.
//!
//! Each category has a base level. A detection is escalated one level when
//! the same file also holds a detection of its corroborating category: a
//! document number next to a name identifies a person, and contact or
//! financial data next to a document number is tied to that person.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use sentinela_core::{Detection, PatternCategory, RiskLevel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityTable {
    levels: HashMap<PatternCategory, RiskLevel>,
}

impl Default for SeverityTable {
    fn default() -> Self {
        let levels = HashMap::from([
            (PatternCategory::Document, RiskLevel::High),
            (PatternCategory::Financial, RiskLevel::High),
            (PatternCategory::Personal, RiskLevel::Medium),
            (PatternCategory::Contact, RiskLevel::Medium),
            (PatternCategory::Custom, RiskLevel::Low),
        ]);
        Self { levels }
    }
}

impl SeverityTable {
    pub fn with_level(mut self, category: PatternCategory, level: RiskLevel) -> Self {
        self.levels.insert(category, level);
        self
    }

    pub fn base_level(&self, category: PatternCategory) -> RiskLevel {
        self.levels.get(&category).copied().unwrap_or(RiskLevel::Low)
    }

    /// Category whose presence in the same file escalates `category`.
    pub fn corroborating_category(category: PatternCategory) -> PatternCategory {
        match category {
            PatternCategory::Document => PatternCategory::Personal,
            _ => PatternCategory::Document,
        }
    }

    /// Sets `corroborated` and escalates risk levels in place.
    ///
    /// Risk levels are expected to hold the base level on entry.
    pub fn apply_corroboration(&self, detections: &mut [Detection]) {
        let mut present: HashMap<PathBuf, HashSet<PatternCategory>> = HashMap::new();
        for detection in detections.iter() {
            present
                .entry(detection.source_file.clone())
                .or_default()
                .insert(detection.category);
        }

        for detection in detections.iter_mut() {
            let wanted = Self::corroborating_category(detection.category);
            let corroborated = present
                .get(&detection.source_file)
                .is_some_and(|categories| categories.contains(&wanted));
            if corroborated {
                detection.corroborated = true;
                detection.risk_level = detection.risk_level.escalate();
            }
        }
    }
}
