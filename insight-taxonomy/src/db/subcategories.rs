//! Subcategory persistence

use insight_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_json, parse_uuid, to_json};
use crate::models::{GroupStatistics, Subcategory};

const SUBCATEGORY_COLUMNS: &str = "subcategory_key, config_id, category_key, category_index, \
     subcategory_index, name, summary, representative_indices, conversation_count, \
     frequency_pct, avg_confidence";

/// Persist one category's subcategories as a batch.
///
/// Higher-indexed subcategories from an earlier discovery of the same
/// category are removed.
pub async fn replace_subcategories(
    pool: &SqlitePool,
    category_key: &str,
    subcategories: &[Subcategory],
) -> Result<()> {
    let mut prepared = Vec::with_capacity(subcategories.len());
    for subcategory in subcategories {
        prepared.push((
            subcategory,
            to_json(&subcategory.representative_indices, "representative_indices")?,
        ));
    }

    let mut tx = pool.begin().await?;

    for (subcategory, representative_indices) in &prepared {
        sqlx::query(
            r#"
            INSERT INTO subcategories (
                subcategory_key, config_id, category_key, category_index, subcategory_index,
                name, summary, representative_indices, conversation_count,
                frequency_pct, avg_confidence
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(subcategory_key) DO UPDATE SET
                name = excluded.name,
                summary = excluded.summary,
                representative_indices = excluded.representative_indices,
                conversation_count = excluded.conversation_count,
                frequency_pct = excluded.frequency_pct,
                avg_confidence = excluded.avg_confidence
            "#,
        )
        .bind(&subcategory.subcategory_key)
        .bind(subcategory.config_id.to_string())
        .bind(&subcategory.category_key)
        .bind(subcategory.category_index as i64)
        .bind(subcategory.subcategory_index as i64)
        .bind(&subcategory.name)
        .bind(&subcategory.summary)
        .bind(representative_indices)
        .bind(subcategory.conversation_count as i64)
        .bind(subcategory.frequency_pct)
        .bind(subcategory.avg_confidence)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM subcategories WHERE category_key = ? AND subcategory_index >= ?")
        .bind(category_key)
        .bind(subcategories.len() as i64)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Drop a category's subcategories and strip the subcategory columns from
/// its members' assignments. Returns the number of assignments cleared.
pub async fn clear_category_subcategories(
    pool: &SqlitePool,
    config_id: Uuid,
    category_key: &str,
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM subcategories WHERE category_key = ?")
        .bind(category_key)
        .execute(&mut *tx)
        .await?;

    let cleared = sqlx::query(
        r#"
        UPDATE conversation_assignments
        SET subcategory_key = NULL,
            subcategory_index = NULL,
            subcategory_confidence = NULL,
            subcategory_reasoning = NULL
        WHERE config_id = ? AND category_key = ? AND subcategory_key IS NOT NULL
        "#,
    )
    .bind(config_id.to_string())
    .bind(category_key)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(cleared)
}

/// All subcategories of a config, ordered by category then index
pub async fn load_subcategories(pool: &SqlitePool, config_id: Uuid) -> Result<Vec<Subcategory>> {
    let query = format!(
        "SELECT {SUBCATEGORY_COLUMNS} FROM subcategories WHERE config_id = ? \
         ORDER BY category_index, subcategory_index"
    );
    let rows = sqlx::query(&query)
        .bind(config_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(subcategory_from_row).collect()
}

pub async fn load_subcategories_for_category(
    pool: &SqlitePool,
    category_key: &str,
) -> Result<Vec<Subcategory>> {
    let query = format!(
        "SELECT {SUBCATEGORY_COLUMNS} FROM subcategories WHERE category_key = ? \
         ORDER BY subcategory_index"
    );
    let rows = sqlx::query(&query)
        .bind(category_key)
        .fetch_all(pool)
        .await?;

    rows.iter().map(subcategory_from_row).collect()
}

pub async fn update_subcategory_statistics(
    pool: &SqlitePool,
    subcategory_key: &str,
    stats: &GroupStatistics,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE subcategories
        SET conversation_count = ?, frequency_pct = ?, avg_confidence = ?
        WHERE subcategory_key = ?
        "#,
    )
    .bind(stats.conversation_count as i64)
    .bind(stats.frequency_pct)
    .bind(stats.avg_confidence)
    .bind(subcategory_key)
    .execute(pool)
    .await?;
    Ok(())
}

fn subcategory_from_row(row: &SqliteRow) -> Result<Subcategory> {
    let config_id: String = row.get("config_id");
    let representative_indices: String = row.get("representative_indices");

    Ok(Subcategory {
        subcategory_key: row.get("subcategory_key"),
        config_id: parse_uuid(&config_id, "config_id")?,
        category_key: row.get("category_key"),
        category_index: row.get::<i64, _>("category_index") as usize,
        subcategory_index: row.get::<i64, _>("subcategory_index") as usize,
        name: row.get("name"),
        summary: row.get("summary"),
        representative_indices: parse_json(&representative_indices, "representative_indices")?,
        conversation_count: row.get::<i64, _>("conversation_count") as usize,
        frequency_pct: row.get("frequency_pct"),
        avg_confidence: row.get("avg_confidence"),
    })
}
