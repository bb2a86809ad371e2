//! Database initialization tests

use insight_common::db::{create_schema, init_database, init_memory_database};
use tempfile::TempDir;

const EXPECTED_TABLES: [&str; 7] = [
    "categories",
    "conversation_assignments",
    "conversation_features",
    "insight_configs",
    "pipeline_runs",
    "sampled_conversations",
    "subcategories",
];

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_init_database_creates_file_and_tables() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("data").join("insight.db");

    let pool = init_database(&db_path).await.unwrap();

    assert!(db_path.exists());
    assert_eq!(table_names(&pool).await, EXPECTED_TABLES);
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let pool = init_memory_database().await.unwrap();

    create_schema(&pool).await.unwrap();
    create_schema(&pool).await.unwrap();

    assert_eq!(table_names(&pool).await, EXPECTED_TABLES);
}

#[tokio::test]
async fn test_reopening_existing_database_keeps_rows() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("insight.db");

    {
        let pool = init_database(&db_path).await.unwrap();
        sqlx::query(
            "INSERT INTO insight_configs (config_id, question, agent_description, extraction_schema, params, created_at)
             VALUES ('c1', 'why?', 'support bot', '{}', '{}', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM insight_configs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
