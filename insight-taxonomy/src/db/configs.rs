//! Insight config persistence

use insight_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid, to_json};
use crate::models::InsightConfig;

/// Insert a new config; configs are immutable after creation
pub async fn save_config(pool: &SqlitePool, config: &InsightConfig) -> Result<()> {
    let extraction_schema = to_json(&config.extraction_schema, "extraction_schema")?;
    let params = to_json(&config.params, "params")?;

    sqlx::query(
        r#"
        INSERT INTO insight_configs (
            config_id, question, agent_description, domain_context,
            categorization_guidance, extraction_schema, clustering_focus,
            params, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(config.config_id.to_string())
    .bind(&config.question)
    .bind(&config.agent_description)
    .bind(&config.domain_context)
    .bind(&config.categorization_guidance)
    .bind(extraction_schema)
    .bind(&config.clustering_focus)
    .bind(params)
    .bind(config.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_config(pool: &SqlitePool, config_id: Uuid) -> Result<Option<InsightConfig>> {
    let row = sqlx::query(
        r#"
        SELECT config_id, question, agent_description, domain_context,
               categorization_guidance, extraction_schema, clustering_focus,
               params, created_at
        FROM insight_configs
        WHERE config_id = ?
        "#,
    )
    .bind(config_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| config_from_row(&row)).transpose()
}

/// Load a config or fail with `NotFound`
pub async fn require_config(pool: &SqlitePool, config_id: Uuid) -> Result<InsightConfig> {
    load_config(pool, config_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("insight config {}", config_id)))
}

fn config_from_row(row: &SqliteRow) -> Result<InsightConfig> {
    let config_id: String = row.get("config_id");
    let extraction_schema: String = row.get("extraction_schema");
    let params: String = row.get("params");
    let created_at: String = row.get("created_at");

    Ok(InsightConfig {
        config_id: parse_uuid(&config_id, "config_id")?,
        question: row.get("question"),
        agent_description: row.get("agent_description"),
        domain_context: row.get("domain_context"),
        categorization_guidance: row.get("categorization_guidance"),
        extraction_schema: parse_json(&extraction_schema, "extraction_schema")?,
        clustering_focus: row.get("clustering_focus"),
        params: parse_json(&params, "params")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}
