//! Conversation feature persistence

use insight_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid, to_json};
use crate::models::{ConversationFeature, Outcome};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const FEATURE_COLUMNS: &str = "f.config_id, f.conversation_id, f.primary_intent, f.features, \
     f.outcome, f.topics, f.attributes, f.semantic_string, f.transcript, f.created_at";

/// Upsert one feature row keyed by (config, conversation)
pub async fn upsert_feature(pool: &SqlitePool, feature: &ConversationFeature) -> Result<()> {
    let config_id = feature.config_id.to_string();
    let features = to_json(&feature.features, "features")?;
    let topics = to_json(&feature.topics, "topics")?;
    let attributes = to_json(&feature.attributes, "attributes")?;
    let created_at = feature.created_at.to_rfc3339();

    retry_on_lock("upsert_feature", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO conversation_features (
                config_id, conversation_id, primary_intent, features, outcome,
                topics, attributes, semantic_string, transcript, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(config_id, conversation_id) DO UPDATE SET
                primary_intent = excluded.primary_intent,
                features = excluded.features,
                outcome = excluded.outcome,
                topics = excluded.topics,
                attributes = excluded.attributes,
                semantic_string = excluded.semantic_string,
                transcript = excluded.transcript
            "#,
        )
        .bind(&config_id)
        .bind(&feature.conversation_id)
        .bind(&feature.primary_intent)
        .bind(&features)
        .bind(feature.outcome.as_str())
        .bind(&topics)
        .bind(&attributes)
        .bind(&feature.semantic_string)
        .bind(&feature.transcript)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// All feature rows for a config, in sample order.
///
/// The position in this list is the digest index used by category discovery.
pub async fn load_features(pool: &SqlitePool, config_id: Uuid) -> Result<Vec<ConversationFeature>> {
    let query = format!(
        r#"
        SELECT {FEATURE_COLUMNS}
        FROM conversation_features f
        LEFT JOIN sampled_conversations s
            ON s.config_id = f.config_id AND s.conversation_id = f.conversation_id
        WHERE f.config_id = ?
        ORDER BY COALESCE(s.ordinal, 9223372036854775807), f.conversation_id
        "#
    );

    let rows = sqlx::query(&query)
        .bind(config_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(feature_from_row).collect()
}

/// Feature rows of the conversations assigned to one category
pub async fn load_features_in_category(
    pool: &SqlitePool,
    config_id: Uuid,
    category_key: &str,
) -> Result<Vec<ConversationFeature>> {
    let query = format!(
        r#"
        SELECT {FEATURE_COLUMNS}
        FROM conversation_features f
        JOIN conversation_assignments a
            ON a.config_id = f.config_id AND a.conversation_id = f.conversation_id
        LEFT JOIN sampled_conversations s
            ON s.config_id = f.config_id AND s.conversation_id = f.conversation_id
        WHERE f.config_id = ? AND a.category_key = ?
        ORDER BY COALESCE(s.ordinal, 9223372036854775807), f.conversation_id
        "#
    );

    let rows = sqlx::query(&query)
        .bind(config_id.to_string())
        .bind(category_key)
        .fetch_all(pool)
        .await?;

    rows.iter().map(feature_from_row).collect()
}

/// Conversation ids that already have a feature row
pub async fn existing_feature_ids(pool: &SqlitePool, config_id: Uuid) -> Result<HashSet<String>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT conversation_id FROM conversation_features WHERE config_id = ?")
            .bind(config_id.to_string())
            .fetch_all(pool)
            .await?;
    Ok(ids.into_iter().collect())
}

pub async fn count_features(pool: &SqlitePool, config_id: Uuid) -> Result<usize> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversation_features WHERE config_id = ?")
            .bind(config_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(count as usize)
}

fn feature_from_row(row: &SqliteRow) -> Result<ConversationFeature> {
    let config_id: String = row.get("config_id");
    let features: String = row.get("features");
    let outcome: String = row.get("outcome");
    let topics: String = row.get("topics");
    let attributes: String = row.get("attributes");
    let created_at: String = row.get("created_at");

    Ok(ConversationFeature {
        config_id: parse_uuid(&config_id, "config_id")?,
        conversation_id: row.get("conversation_id"),
        primary_intent: row.get("primary_intent"),
        features: parse_json(&features, "features")?,
        outcome: outcome
            .parse::<Outcome>()
            .map_err(insight_common::Error::Internal)?,
        topics: parse_json(&topics, "topics")?,
        attributes: parse_json(&attributes, "attributes")?,
        semantic_string: row.get("semantic_string"),
        transcript: row.get("transcript"),
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}
