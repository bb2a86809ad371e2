//! Conversation assignment persistence
//!
//! The row is created by category assignment and later merged with the
//! subcategory columns. Each write touches only its own column group.

use chrono::Utc;
use insight_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::{CategoryAssignment, SubcategoryAssignment};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const ASSIGNMENT_COLUMNS: &str = "config_id, conversation_id, category_key, category_index, \
     category_confidence, category_reasoning, subcategory_key, subcategory_index, \
     subcategory_confidence, subcategory_reasoning, updated_at";

/// Category columns of one assignment
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAssignmentWrite<'a> {
    pub config_id: Uuid,
    pub conversation_id: &'a str,
    pub category_key: &'a str,
    pub category_index: usize,
    pub confidence: f64,
    pub reasoning: &'a str,
}

/// Upsert the category columns.
///
/// Subcategory columns survive only while the category stays the same; a
/// conversation moved to another category loses its old subcategory.
pub async fn upsert_category_assignment(
    pool: &SqlitePool,
    write: &CategoryAssignmentWrite<'_>,
) -> Result<()> {
    let config_id = write.config_id.to_string();
    let updated_at = Utc::now().to_rfc3339();

    retry_on_lock("upsert_category_assignment", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO conversation_assignments (
                config_id, conversation_id, category_key, category_index,
                category_confidence, category_reasoning, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(config_id, conversation_id) DO UPDATE SET
                category_key = excluded.category_key,
                category_index = excluded.category_index,
                category_confidence = excluded.category_confidence,
                category_reasoning = excluded.category_reasoning,
                subcategory_key = CASE WHEN category_key = excluded.category_key
                    THEN subcategory_key ELSE NULL END,
                subcategory_index = CASE WHEN category_key = excluded.category_key
                    THEN subcategory_index ELSE NULL END,
                subcategory_confidence = CASE WHEN category_key = excluded.category_key
                    THEN subcategory_confidence ELSE NULL END,
                subcategory_reasoning = CASE WHEN category_key = excluded.category_key
                    THEN subcategory_reasoning ELSE NULL END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&config_id)
        .bind(write.conversation_id)
        .bind(write.category_key)
        .bind(write.category_index as i64)
        .bind(write.confidence)
        .bind(write.reasoning)
        .bind(&updated_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Merge subcategory columns into an existing row.
///
/// Fails with `NotFound` when the conversation has no category assignment.
pub async fn merge_subcategory_assignment(
    pool: &SqlitePool,
    config_id: Uuid,
    conversation_id: &str,
    subcategory: &SubcategoryAssignment,
) -> Result<()> {
    let config_id_str = config_id.to_string();
    let updated_at = Utc::now().to_rfc3339();

    let rows_affected = retry_on_lock("merge_subcategory_assignment", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE conversation_assignments
            SET subcategory_key = ?,
                subcategory_index = ?,
                subcategory_confidence = ?,
                subcategory_reasoning = ?,
                updated_at = ?
            WHERE config_id = ? AND conversation_id = ?
            "#,
        )
        .bind(&subcategory.subcategory_key)
        .bind(subcategory.subcategory_index as i64)
        .bind(subcategory.confidence)
        .bind(&subcategory.reasoning)
        .bind(&updated_at)
        .bind(&config_id_str)
        .bind(conversation_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if rows_affected == 0 {
        return Err(Error::NotFound(format!(
            "category assignment for conversation {}",
            conversation_id
        )));
    }
    Ok(())
}

pub async fn load_assignments(pool: &SqlitePool, config_id: Uuid) -> Result<Vec<CategoryAssignment>> {
    let query = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM conversation_assignments WHERE config_id = ? \
         ORDER BY conversation_id"
    );
    let rows = sqlx::query(&query)
        .bind(config_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(assignment_from_row).collect()
}

pub async fn load_assignments_in_category(
    pool: &SqlitePool,
    config_id: Uuid,
    category_key: &str,
) -> Result<Vec<CategoryAssignment>> {
    let query = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM conversation_assignments \
         WHERE config_id = ? AND category_key = ? ORDER BY conversation_id"
    );
    let rows = sqlx::query(&query)
        .bind(config_id.to_string())
        .bind(category_key)
        .fetch_all(pool)
        .await?;

    rows.iter().map(assignment_from_row).collect()
}

pub async fn load_assignment(
    pool: &SqlitePool,
    config_id: Uuid,
    conversation_id: &str,
) -> Result<Option<CategoryAssignment>> {
    let query = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM conversation_assignments \
         WHERE config_id = ? AND conversation_id = ?"
    );
    let row = sqlx::query(&query)
        .bind(config_id.to_string())
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| assignment_from_row(&row)).transpose()
}

fn assignment_from_row(row: &SqliteRow) -> Result<CategoryAssignment> {
    let config_id: String = row.get("config_id");
    let updated_at: String = row.get("updated_at");

    let subcategory_key: Option<String> = row.get("subcategory_key");
    let subcategory = match subcategory_key {
        Some(subcategory_key) => Some(SubcategoryAssignment {
            subcategory_key,
            subcategory_index: row
                .get::<Option<i64>, _>("subcategory_index")
                .unwrap_or_default() as usize,
            confidence: row
                .get::<Option<f64>, _>("subcategory_confidence")
                .unwrap_or_default(),
            reasoning: row
                .get::<Option<String>, _>("subcategory_reasoning")
                .unwrap_or_default(),
        }),
        None => None,
    };

    Ok(CategoryAssignment {
        config_id: parse_uuid(&config_id, "config_id")?,
        conversation_id: row.get("conversation_id"),
        category_key: row.get("category_key"),
        category_index: row.get::<i64, _>("category_index") as usize,
        category_confidence: row.get("category_confidence"),
        category_reasoning: row.get("category_reasoning"),
        subcategory,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}
