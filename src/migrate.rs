use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::{Config, MatchMode};
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    create_schema(&pool, &config.db.table, config.db.match_mode).await?;
    pool.close().await;
    Ok(())
}

/// Create the corpus table for the given match mode. Idempotent.
///
/// `table` must already be validated as a plain identifier.
pub async fn create_schema(pool: &SqlitePool, table: &str, mode: MatchMode) -> Result<()> {
    let lookup_columns = match mode {
        MatchMode::Containment => "format_code TEXT NOT NULL",
        MatchMode::Hash => "hash_code BLOB NOT NULL,\n            hash_str TEXT NOT NULL",
    };

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT,
            title TEXT,
            malicious_code TEXT NOT NULL,
            description TEXT,
            {lookup_columns}
        )
        "#
    ))
    .execute(pool)
    .await?;

    let index = match mode {
        MatchMode::Containment => {
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_format_code ON {table}(format_code)")
        }
        MatchMode::Hash => {
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_hash_code ON {table}(hash_code)")
        }
    };
    sqlx::query(&index).execute(pool).await?;

    Ok(())
}
