//! Taxonomy nodes and conversation assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row key for a category: `{config_id}:{index}` (0-based index)
pub fn category_key(config_id: Uuid, category_index: usize) -> String {
    format!("{}:{}", config_id, category_index)
}

/// Row key for a subcategory: `{config_id}:{category_index}:{index}`
pub fn subcategory_key(config_id: Uuid, category_index: usize, subcategory_index: usize) -> String {
    format!("{}:{}:{}", config_id, category_index, subcategory_index)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub category_key: String,
    pub config_id: Uuid,
    pub category_index: usize,
    pub name: String,
    pub summary: String,
    /// 1-based indices into the discovery digest
    pub representative_indices: Vec<usize>,
    pub conversation_count: usize,
    pub frequency_pct: f64,
    pub avg_confidence: f64,
}

impl Category {
    /// New category with zeroed statistics
    pub fn discovered(
        config_id: Uuid,
        category_index: usize,
        name: String,
        summary: String,
        representative_indices: Vec<usize>,
    ) -> Self {
        Self {
            category_key: category_key(config_id, category_index),
            config_id,
            category_index,
            name,
            summary,
            representative_indices,
            conversation_count: 0,
            frequency_pct: 0.0,
            avg_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subcategory {
    pub subcategory_key: String,
    pub config_id: Uuid,
    pub category_key: String,
    pub category_index: usize,
    pub subcategory_index: usize,
    pub name: String,
    pub summary: String,
    /// 1-based indices into the category's digest
    pub representative_indices: Vec<usize>,
    pub conversation_count: usize,
    pub frequency_pct: f64,
    pub avg_confidence: f64,
}

impl Subcategory {
    pub fn discovered(
        parent: &Category,
        subcategory_index: usize,
        name: String,
        summary: String,
        representative_indices: Vec<usize>,
    ) -> Self {
        Self {
            subcategory_key: subcategory_key(parent.config_id, parent.category_index, subcategory_index),
            config_id: parent.config_id,
            category_key: parent.category_key.clone(),
            category_index: parent.category_index,
            subcategory_index,
            name,
            summary,
            representative_indices,
            conversation_count: 0,
            frequency_pct: 0.0,
            avg_confidence: 0.0,
        }
    }
}

/// Subcategory fields merged into an existing assignment row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryAssignment {
    pub subcategory_key: String,
    pub subcategory_index: usize,
    pub confidence: f64,
    pub reasoning: String,
}

/// Assignment row keyed by (config, conversation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAssignment {
    pub config_id: Uuid,
    pub conversation_id: String,
    pub category_key: String,
    pub category_index: usize,
    pub category_confidence: f64,
    pub category_reasoning: String,
    pub subcategory: Option<SubcategoryAssignment>,
    pub updated_at: DateTime<Utc>,
}

/// Usage statistics for one taxonomy node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStatistics {
    pub conversation_count: usize,
    pub frequency_pct: f64,
    pub avg_confidence: f64,
}

impl GroupStatistics {
    /// Aggregate `(group_index, confidence)` pairs into `group_count` slots.
    ///
    /// Frequencies are relative to the number of pairs supplied, so the counts
    /// always sum to that total. Pairs with an out-of-range index are ignored.
    pub fn compute(
        group_count: usize,
        assignments: impl IntoIterator<Item = (usize, f64)>,
    ) -> Vec<GroupStatistics> {
        let mut counts = vec![0usize; group_count];
        let mut confidence_sums = vec![0.0f64; group_count];
        let mut total = 0usize;

        for (index, confidence) in assignments {
            if index >= group_count {
                continue;
            }
            counts[index] += 1;
            confidence_sums[index] += confidence;
            total += 1;
        }

        counts
            .iter()
            .zip(confidence_sums.iter())
            .map(|(&count, &sum)| GroupStatistics {
                conversation_count: count,
                frequency_pct: if total > 0 {
                    count as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
                avg_confidence: if count > 0 { sum / count as f64 } else { 0.0 },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_encode_config_and_indices() {
        let config_id = Uuid::nil();
        assert_eq!(
            category_key(config_id, 3),
            "00000000-0000-0000-0000-000000000000:3"
        );
        assert_eq!(
            subcategory_key(config_id, 3, 1),
            "00000000-0000-0000-0000-000000000000:3:1"
        );
    }

    #[test]
    fn statistics_counts_sum_to_total_and_frequencies_match() {
        let pairs = vec![(0, 0.9), (1, 0.5), (0, 0.7), (2, 1.0), (0, 0.8)];
        let stats = GroupStatistics::compute(4, pairs);

        let total: usize = stats.iter().map(|s| s.conversation_count).sum();
        assert_eq!(total, 5);
        for s in &stats {
            let expected = s.conversation_count as f64 / 5.0 * 100.0;
            assert!((s.frequency_pct - expected).abs() < 1e-9);
        }
        assert!((stats[0].avg_confidence - 0.8).abs() < 1e-9);
        assert_eq!(stats[3], GroupStatistics::default());
    }

    #[test]
    fn statistics_with_no_assignments_are_zero() {
        let stats = GroupStatistics::compute(2, Vec::new());
        assert_eq!(stats, vec![GroupStatistics::default(); 2]);
    }

    #[test]
    fn discovered_category_has_zeroed_statistics() {
        let category = Category::discovered(Uuid::nil(), 0, "Billing".into(), "s".into(), vec![1, 2]);
        assert_eq!(category.conversation_count, 0);
        assert_eq!(category.frequency_pct, 0.0);

        let sub = Subcategory::discovered(&category, 1, "Refunds".into(), "s".into(), vec![]);
        assert_eq!(sub.category_key, category.category_key);
        assert!(sub.subcategory_key.ends_with(":0:1"));
    }
}
