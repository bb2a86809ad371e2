//! Pipeline run persistence

use insight_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid, to_json};
use crate::models::{PipelineRun, PipelineState, RunStatus};

pub async fn save_run(pool: &SqlitePool, run: &PipelineRun) -> Result<()> {
    let statistics = to_json(&run.statistics, "statistics")?;

    sqlx::query(
        r#"
        INSERT INTO pipeline_runs (
            config_id, state, status, last_error, statistics, started_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(config_id) DO UPDATE SET
            state = excluded.state,
            status = excluded.status,
            last_error = excluded.last_error,
            statistics = excluded.statistics,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(run.config_id.to_string())
    .bind(run.state.as_str())
    .bind(run.status.as_str())
    .bind(&run.last_error)
    .bind(statistics)
    .bind(run.started_at.to_rfc3339())
    .bind(run.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_run(pool: &SqlitePool, config_id: Uuid) -> Result<Option<PipelineRun>> {
    let row = sqlx::query(
        r#"
        SELECT config_id, state, status, last_error, statistics, started_at, updated_at
        FROM pipeline_runs
        WHERE config_id = ?
        "#,
    )
    .bind(config_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let config_id: String = row.get("config_id");
    let state: String = row.get("state");
    let status: String = row.get("status");
    let statistics: String = row.get("statistics");
    let started_at: String = row.get("started_at");
    let updated_at: String = row.get("updated_at");

    Ok(Some(PipelineRun {
        config_id: parse_uuid(&config_id, "config_id")?,
        state: state.parse::<PipelineState>().map_err(Error::Internal)?,
        status: status.parse::<RunStatus>().map_err(Error::Internal)?,
        last_error: row.get("last_error"),
        statistics: parse_json(&statistics, "statistics")?,
        started_at: parse_timestamp(&started_at, "started_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    }))
}

/// Load the config's run, creating and persisting a fresh one if absent
pub async fn get_or_create_run(pool: &SqlitePool, config_id: Uuid) -> Result<PipelineRun> {
    if let Some(run) = load_run(pool, config_id).await? {
        return Ok(run);
    }
    let run = PipelineRun::new(config_id);
    save_run(pool, &run).await?;
    Ok(run)
}
