//! Database schema migrations. Every statement is idempotent.

use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One row per indexed codebase
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            identity TEXT PRIMARY KEY,
            root TEXT NOT NULL,
            collection TEXT NOT NULL,
            generation INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            last_started_at INTEGER,
            last_completed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per indexed file; chunk_ids is a JSON array in chunk order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshot_files (
            identity TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            chunk_ids TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (identity, relative_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_entries (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            file_extension TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_entries_path ON vector_entries(collection, relative_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("data/c.sqlite"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec![
                "snapshot_files",
                "snapshots",
                "vector_collections",
                "vector_entries"
            ]
        );
        pool.close().await;
    }
}
