//! Sampled conversation persistence
//!
//! A config's sample is written once as a batch. Later runs reuse it rather
//! than drawing a new sample, so downstream phases see a stable work list.

use insight_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    pub conversation_id: String,
    pub ordinal: usize,
    pub message_count: usize,
    /// Length bucket, `None` for date-range samples
    pub bucket: Option<String>,
}

/// Replace the config's sample with `rows`
pub async fn replace_sample(pool: &SqlitePool, config_id: Uuid, rows: &[SampleRow]) -> Result<()> {
    let config_id = config_id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM sampled_conversations WHERE config_id = ?")
        .bind(&config_id)
        .execute(&mut *tx)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO sampled_conversations (config_id, conversation_id, ordinal, message_count, bucket)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(config_id, conversation_id) DO UPDATE SET
                ordinal = excluded.ordinal,
                message_count = excluded.message_count,
                bucket = excluded.bucket
            "#,
        )
        .bind(&config_id)
        .bind(&row.conversation_id)
        .bind(row.ordinal as i64)
        .bind(row.message_count as i64)
        .bind(&row.bucket)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Sample in ordinal order
pub async fn load_sample(pool: &SqlitePool, config_id: Uuid) -> Result<Vec<SampleRow>> {
    let rows = sqlx::query(
        r#"
        SELECT conversation_id, ordinal, message_count, bucket
        FROM sampled_conversations
        WHERE config_id = ?
        ORDER BY ordinal
        "#,
    )
    .bind(config_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SampleRow {
            conversation_id: row.get("conversation_id"),
            ordinal: row.get::<i64, _>("ordinal") as usize,
            message_count: row.get::<i64, _>("message_count") as usize,
            bucket: row.get("bucket"),
        })
        .collect())
}
