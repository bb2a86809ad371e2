//! Database initialization
//!
//! Creates the SQLite database on first run and applies the schema. Every
//! `create_*` function is idempotent, so startup can always run the full set.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers while phase workers write
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema.
///
/// A single connection is used because every SQLite `:memory:` connection is
/// its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Apply all table definitions
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_insight_configs_table(pool).await?;
    create_sampled_conversations_table(pool).await?;
    create_conversation_features_table(pool).await?;
    create_categories_table(pool).await?;
    create_subcategories_table(pool).await?;
    create_conversation_assignments_table(pool).await?;
    create_pipeline_runs_table(pool).await?;

    Ok(())
}

async fn create_insight_configs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insight_configs (
            config_id TEXT PRIMARY KEY,
            question TEXT NOT NULL,
            agent_description TEXT NOT NULL,
            domain_context TEXT,
            categorization_guidance TEXT,
            extraction_schema TEXT NOT NULL,
            clustering_focus TEXT NOT NULL DEFAULT '',
            params TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_sampled_conversations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sampled_conversations (
            config_id TEXT NOT NULL REFERENCES insight_configs(config_id),
            conversation_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            message_count INTEGER NOT NULL,
            bucket TEXT,
            PRIMARY KEY (config_id, conversation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_conversation_features_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_features (
            config_id TEXT NOT NULL REFERENCES insight_configs(config_id),
            conversation_id TEXT NOT NULL,
            primary_intent TEXT NOT NULL,
            features TEXT NOT NULL DEFAULT '{}',
            outcome TEXT NOT NULL,
            topics TEXT NOT NULL DEFAULT '[]',
            attributes TEXT NOT NULL DEFAULT '{}',
            semantic_string TEXT NOT NULL,
            transcript TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (config_id, conversation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_categories_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            category_key TEXT PRIMARY KEY,
            config_id TEXT NOT NULL REFERENCES insight_configs(config_id),
            category_index INTEGER NOT NULL,
            name TEXT NOT NULL,
            summary TEXT NOT NULL,
            representative_indices TEXT NOT NULL DEFAULT '[]',
            conversation_count INTEGER NOT NULL DEFAULT 0,
            frequency_pct REAL NOT NULL DEFAULT 0.0,
            avg_confidence REAL NOT NULL DEFAULT 0.0,
            UNIQUE (config_id, category_index)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_subcategories_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subcategories (
            subcategory_key TEXT PRIMARY KEY,
            config_id TEXT NOT NULL REFERENCES insight_configs(config_id),
            category_key TEXT NOT NULL,
            category_index INTEGER NOT NULL,
            subcategory_index INTEGER NOT NULL,
            name TEXT NOT NULL,
            summary TEXT NOT NULL,
            representative_indices TEXT NOT NULL DEFAULT '[]',
            conversation_count INTEGER NOT NULL DEFAULT 0,
            frequency_pct REAL NOT NULL DEFAULT 0.0,
            avg_confidence REAL NOT NULL DEFAULT 0.0,
            UNIQUE (category_key, subcategory_index)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_conversation_assignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_assignments (
            config_id TEXT NOT NULL REFERENCES insight_configs(config_id),
            conversation_id TEXT NOT NULL,
            category_key TEXT NOT NULL,
            category_index INTEGER NOT NULL,
            category_confidence REAL NOT NULL,
            category_reasoning TEXT NOT NULL,
            subcategory_key TEXT,
            subcategory_index INTEGER,
            subcategory_confidence REAL,
            subcategory_reasoning TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (config_id, conversation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assignments_category ON conversation_assignments(category_key)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_pipeline_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            config_id TEXT PRIMARY KEY REFERENCES insight_configs(config_id),
            state TEXT NOT NULL,
            status TEXT NOT NULL,
            last_error TEXT,
            statistics TEXT NOT NULL DEFAULT '{}',
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
