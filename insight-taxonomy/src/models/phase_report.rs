//! Phase results returned to callers
//!
//! Hard failures are returned as `Err`. Soft failures (per-item oracle or
//! persistence failures, skipped preconditions) are collected into
//! `errors` / `warnings`; a non-empty `errors` list means partial success.

use serde::{Deserialize, Serialize};

use super::taxonomy::{Category, Subcategory};

/// Soft failures collected by a phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseIssues {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PhaseIssues {
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn extend(&mut self, other: PhaseIssues) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Usage statistics for one category or subcategory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyStatistic {
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_key: Option<String>,
    pub conversation_count: usize,
    pub frequency_pct: f64,
    pub avg_confidence: f64,
}

impl From<&Category> for TaxonomyStatistic {
    fn from(category: &Category) -> Self {
        Self {
            key: category.category_key.clone(),
            name: category.name.clone(),
            parent_key: None,
            conversation_count: category.conversation_count,
            frequency_pct: category.frequency_pct,
            avg_confidence: category.avg_confidence,
        }
    }
}

impl From<&Subcategory> for TaxonomyStatistic {
    fn from(subcategory: &Subcategory) -> Self {
        Self {
            key: subcategory.subcategory_key.clone(),
            name: subcategory.name.clone(),
            parent_key: Some(subcategory.category_key.clone()),
            conversation_count: subcategory.conversation_count,
            frequency_pct: subcategory.frequency_pct,
            avg_confidence: subcategory.avg_confidence,
        }
    }
}

/// Per-bucket availability and selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub bucket: String,
    pub available: usize,
    pub sampled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleReport {
    /// `stratified` or `date_range`
    pub mode: String,
    pub total_fetched: usize,
    pub skipped_empty: usize,
    pub skipped_failed: usize,
    pub total_included: usize,
    /// Stratified only; empty for date-range samples
    pub buckets: Vec<BucketCount>,
    /// Sample loaded from an earlier run instead of re-fetched
    pub reused_existing: bool,
    #[serde(flatten)]
    pub issues: PhaseIssues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtractionReport {
    pub processed: usize,
    pub included: usize,
    pub excluded: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    #[serde(flatten)]
    pub issues: PhaseIssues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryDiscoveryReport {
    pub feature_count: usize,
    pub categories_created: usize,
    pub statistics: Vec<TaxonomyStatistic>,
    #[serde(flatten)]
    pub issues: PhaseIssues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryAssignmentReport {
    pub processed: usize,
    pub assigned: usize,
    pub failed: usize,
    pub statistics: Vec<TaxonomyStatistic>,
    #[serde(flatten)]
    pub issues: PhaseIssues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryDiscoveryReport {
    pub categories_processed: usize,
    pub categories_skipped: usize,
    pub subcategories_created: usize,
    pub statistics: Vec<TaxonomyStatistic>,
    #[serde(flatten)]
    pub issues: PhaseIssues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryAssignmentReport {
    pub processed: usize,
    pub assigned: usize,
    pub failed: usize,
    pub statistics: Vec<TaxonomyStatistic>,
    #[serde(flatten)]
    pub issues: PhaseIssues,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issues_flatten_into_report_body() {
        let mut report = FeatureExtractionReport {
            processed: 3,
            included: 2,
            ..Default::default()
        };
        report.issues.warn("conversation c3 excluded");

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["processed"], json!(3));
        assert_eq!(value["errors"], json!([]));
        assert_eq!(value["warnings"], json!(["conversation c3 excluded"]));
    }
}
