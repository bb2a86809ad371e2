//! Bulk deletion of a config's pipeline data

use insight_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Rows removed per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCounts {
    pub assignments: u64,
    pub subcategories: u64,
    pub categories: u64,
    pub features: u64,
    pub sampled_conversations: u64,
    pub pipeline_runs: u64,
}

impl DeletionCounts {
    pub fn total(&self) -> u64 {
        self.assignments
            + self.subcategories
            + self.categories
            + self.features
            + self.sampled_conversations
            + self.pipeline_runs
    }
}

/// Delete everything derived from a config, keeping the config itself.
///
/// Tables are cleared in dependency order (assignments, subcategories,
/// categories, features, then the sample and run) inside one transaction.
pub async fn delete_config_data(pool: &SqlitePool, config_id: Uuid) -> Result<DeletionCounts> {
    let config_id = config_id.to_string();
    let mut tx = pool.begin().await?;

    let mut counts = DeletionCounts::default();
    counts.assignments = sqlx::query("DELETE FROM conversation_assignments WHERE config_id = ?")
        .bind(&config_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    counts.subcategories = sqlx::query("DELETE FROM subcategories WHERE config_id = ?")
        .bind(&config_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    counts.categories = sqlx::query("DELETE FROM categories WHERE config_id = ?")
        .bind(&config_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    counts.features = sqlx::query("DELETE FROM conversation_features WHERE config_id = ?")
        .bind(&config_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    counts.sampled_conversations =
        sqlx::query("DELETE FROM sampled_conversations WHERE config_id = ?")
            .bind(&config_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    counts.pipeline_runs = sqlx::query("DELETE FROM pipeline_runs WHERE config_id = ?")
        .bind(&config_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    tracing::info!(
        config_id = %config_id,
        assignments = counts.assignments,
        subcategories = counts.subcategories,
        categories = counts.categories,
        features = counts.features,
        "Deleted config pipeline data"
    );

    Ok(counts)
}
