//! Category persistence

use insight_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_json, parse_uuid, to_json};
use crate::models::{Category, GroupStatistics};

/// Persist a freshly discovered category set.
///
/// Existing rows with the same key are overwritten with zeroed statistics.
/// Categories left over from an earlier discovery with a larger count are
/// removed so indices stay dense. Assignments and subcategories belong to
/// the previous category set and are deleted in the same transaction.
pub async fn replace_categories(
    pool: &SqlitePool,
    config_id: Uuid,
    categories: &[Category],
) -> Result<()> {
    let config_id_str = config_id.to_string();
    let mut prepared = Vec::with_capacity(categories.len());
    for category in categories {
        prepared.push((category, to_json(&category.representative_indices, "representative_indices")?));
    }

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM conversation_assignments WHERE config_id = ?")
        .bind(&config_id_str)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM subcategories WHERE config_id = ?")
        .bind(&config_id_str)
        .execute(&mut *tx)
        .await?;

    for (category, representative_indices) in &prepared {
        sqlx::query(
            r#"
            INSERT INTO categories (
                category_key, config_id, category_index, name, summary,
                representative_indices, conversation_count, frequency_pct, avg_confidence
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(category_key) DO UPDATE SET
                name = excluded.name,
                summary = excluded.summary,
                representative_indices = excluded.representative_indices,
                conversation_count = excluded.conversation_count,
                frequency_pct = excluded.frequency_pct,
                avg_confidence = excluded.avg_confidence
            "#,
        )
        .bind(&category.category_key)
        .bind(&config_id_str)
        .bind(category.category_index as i64)
        .bind(&category.name)
        .bind(&category.summary)
        .bind(representative_indices)
        .bind(category.conversation_count as i64)
        .bind(category.frequency_pct)
        .bind(category.avg_confidence)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM categories WHERE config_id = ? AND category_index >= ?")
        .bind(&config_id_str)
        .bind(categories.len() as i64)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Categories for a config in index order
pub async fn load_categories(pool: &SqlitePool, config_id: Uuid) -> Result<Vec<Category>> {
    let rows = sqlx::query(
        r#"
        SELECT category_key, config_id, category_index, name, summary,
               representative_indices, conversation_count, frequency_pct, avg_confidence
        FROM categories
        WHERE config_id = ?
        ORDER BY category_index
        "#,
    )
    .bind(config_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(category_from_row).collect()
}

/// Write recomputed statistics; name and summary are untouched
pub async fn update_category_statistics(
    pool: &SqlitePool,
    category_key: &str,
    stats: &GroupStatistics,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE categories
        SET conversation_count = ?, frequency_pct = ?, avg_confidence = ?
        WHERE category_key = ?
        "#,
    )
    .bind(stats.conversation_count as i64)
    .bind(stats.frequency_pct)
    .bind(stats.avg_confidence)
    .bind(category_key)
    .execute(pool)
    .await?;
    Ok(())
}

fn category_from_row(row: &SqliteRow) -> Result<Category> {
    let config_id: String = row.get("config_id");
    let representative_indices: String = row.get("representative_indices");

    Ok(Category {
        category_key: row.get("category_key"),
        config_id: parse_uuid(&config_id, "config_id")?,
        category_index: row.get::<i64, _>("category_index") as usize,
        name: row.get("name"),
        summary: row.get("summary"),
        representative_indices: parse_json(&representative_indices, "representative_indices")?,
        conversation_count: row.get::<i64, _>("conversation_count") as usize,
        frequency_pct: row.get("frequency_pct"),
        avg_confidence: row.get("avg_confidence"),
    })
}
