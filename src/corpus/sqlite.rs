//! SQLite-backed [`CorpusStore`].
//!
//! Every lookup checks a connection out of the pool, runs a single `SELECT`
//! inside a short transaction bounded by the command timeout, and gives the
//! connection back. The timeout is enforced inside SQLite through a progress
//! handler, so a runaway scan is interrupted rather than left running. On
//! error or timeout the transaction is rolled back explicitly before the
//! connection is released, so the next borrower never inherits an aborted
//! transaction. A connection that cannot be brought back within a short grace
//! period is detached from the pool instead.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::time::{Duration, Instant};

use crate::config::{DbConfig, MatchMode};
use crate::error::StoreError;
use crate::models::{NewSample, SampleRecord};
use crate::normalize::{content_hash, normalize, HASH_LEN};

use super::CorpusStore;

/// SQLite implementation of the [`CorpusStore`] trait.
pub struct SqliteCorpus {
    pool: SqlitePool,
    table: String,
    mode: MatchMode,
    command_timeout: Duration,
    hash_sql: String,
    containment_sql: String,
}

impl SqliteCorpus {
    pub fn new(pool: SqlitePool, config: &DbConfig) -> Self {
        let table = config.table.clone();
        let hash_sql = format!(
            "SELECT id, file_name, title, malicious_code, description, hash_str \
             FROM {table} WHERE hash_code = ? ORDER BY id"
        );
        // instr() is a literal substring test; LIKE would treat % and _ in
        // stored snippets as wildcards.
        let containment_sql = format!(
            "SELECT id, file_name, title, malicious_code, description \
             FROM {table} WHERE length(format_code) > 0 AND instr(?, format_code) > 0 ORDER BY id"
        );
        Self {
            pool,
            table,
            mode: config.match_mode,
            command_timeout: config.command_timeout(),
            hash_sql,
            containment_sql,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn match_mode(&self) -> MatchMode {
        self.mode
    }

    /// Insert samples in one transaction, deriving the lookup columns from
    /// `malicious_code`. Returns the number of rows written.
    pub async fn insert_samples(&self, samples: &[NewSample]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let sql = match self.mode {
            MatchMode::Containment => format!(
                "INSERT INTO {} (file_name, title, malicious_code, description, format_code) \
                 VALUES (?, ?, ?, ?, ?)",
                self.table
            ),
            MatchMode::Hash => format!(
                "INSERT INTO {} (file_name, title, malicious_code, description, hash_code, hash_str) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                self.table
            ),
        };

        for sample in samples {
            let normalized = normalize(&sample.malicious_code);
            let query = sqlx::query(&sql)
                .bind(&sample.file_name)
                .bind(&sample.title)
                .bind(&sample.malicious_code)
                .bind(&sample.description);
            let query = match self.mode {
                MatchMode::Containment => query.bind(normalized),
                MatchMode::Hash => {
                    let digest = content_hash(&normalized);
                    query.bind(digest.to_vec()).bind(hex::encode(digest))
                }
            };
            if let Err(e) = query.execute(&mut *tx).await {
                tx.rollback().await.ok();
                return Err(e.into());
            }
        }

        tx.commit().await?;
        Ok(samples.len())
    }

    async fn fetch_in_tx<'q>(
        &self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Result<Vec<SqliteRow>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = sqlx::Connection::begin(&mut *conn).await?;

        // SQLite aborts the statement with SQLITE_INTERRUPT once the handler
        // returns false, which frees the worker thread at the deadline.
        let deadline = Instant::now() + self.command_timeout;
        tx.lock_handle()
            .await?
            .set_progress_handler(PROGRESS_OPS, move || Instant::now() < deadline);

        let fetched =
            tokio::time::timeout(self.command_timeout + UNWIND_GRACE, query.fetch_all(&mut *tx))
                .await;
        let result = match fetched {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(_)) if Instant::now() >= deadline => {
                Err(StoreError::Timeout(self.command_timeout))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                // Still running on the worker. The connection leaves the pool
                // and closes once the statement ends, so nothing waits on it.
                tracing::warn!("statement ignored interrupt; discarding its connection");
                drop(tx);
                drop(conn.detach());
                return Err(StoreError::Timeout(self.command_timeout));
            }
        };

        let commit = result.is_ok();
        match tokio::time::timeout(UNWIND_GRACE, finish(tx, commit)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // The deadline hook may still be installed.
                drop(conn.detach());
                if commit {
                    return Err(e.into());
                }
                tracing::warn!("rollback after failed lookup did not complete: {}", e);
            }
            Err(_) => {
                tracing::warn!("closing lookup transaction timed out; discarding its connection");
                drop(conn.detach());
            }
        }
        result
    }
}

/// VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1000;

/// Time an interrupted statement, and the commit or rollback after it, may
/// take beyond the command timeout.
const UNWIND_GRACE: Duration = Duration::from_millis(500);

/// Clear the deadline hook and end the transaction.
async fn finish(mut tx: Transaction<'_, Sqlite>, commit: bool) -> Result<(), sqlx::Error> {
    tx.lock_handle().await?.remove_progress_handler();
    if commit {
        tx.commit().await
    } else {
        tx.rollback().await
    }
}

fn row_to_record(row: &SqliteRow, with_hash: bool) -> SampleRecord {
    SampleRecord {
        id: row.get("id"),
        file_name: row.get("file_name"),
        title: row.get("title"),
        malicious_code: row.get("malicious_code"),
        description: row.get("description"),
        hash_str: if with_hash { row.get("hash_str") } else { None },
    }
}

#[async_trait]
impl CorpusStore for SqliteCorpus {
    async fn find_by_hash(
        &self,
        digest: &[u8; HASH_LEN],
    ) -> Result<Vec<SampleRecord>, StoreError> {
        let query = sqlx::query(&self.hash_sql).bind(digest.as_slice());
        let rows = self.fetch_in_tx(query).await?;
        Ok(rows.iter().map(|r| row_to_record(r, true)).collect())
    }

    async fn find_contained_in(
        &self,
        normalized_query: &str,
    ) -> Result<Vec<SampleRecord>, StoreError> {
        if normalized_query.is_empty() {
            return Ok(Vec::new());
        }
        let query = sqlx::query(&self.containment_sql).bind(normalized_query);
        let rows = self.fetch_in_tx(query).await?;
        Ok(rows.iter().map(|r| row_to_record(r, false)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::create_schema;
    use crate::normalize::hash_code;
    use tempfile::TempDir;

    fn db_config(tmp: &TempDir, mode: MatchMode) -> DbConfig {
        let content = format!(
            "path = \"{}\"\nmatch_mode = \"{}\"\nmin_connections = 1\nmax_connections = 4\n",
            tmp.path().join("corpus.sqlite").display(),
            mode.as_str()
        );
        toml::from_str(&content).unwrap()
    }

    async fn open(tmp: &TempDir, mode: MatchMode) -> SqliteCorpus {
        let cfg = db_config(tmp, mode);
        let pool = crate::db::connect(&cfg).await.unwrap();
        create_schema(&pool, &cfg.table, mode).await.unwrap();
        SqliteCorpus::new(pool, &cfg)
    }

    fn sample(code: &str, title: &str) -> NewSample {
        NewSample {
            file_name: Some("report.pdf".into()),
            title: Some(title.into()),
            malicious_code: code.into(),
            description: Some(format!("{} description", title)),
        }
    }

    #[tokio::test]
    async fn test_hash_lookup_ignores_whitespace() {
        let tmp = TempDir::new().unwrap();
        let corpus = open(&tmp, MatchMode::Hash).await;
        corpus
            .insert_samples(&[sample("import os\nprint('x')", "a"), sample("import sys", "b")])
            .await
            .unwrap();

        let hits = corpus
            .find_by_hash(&hash_code("import os print('x')"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title.as_deref(), Some("a"));
        assert_eq!(
            hits[0].hash_str.as_deref(),
            Some(hex::encode(hash_code("import os\nprint('x')")).as_str())
        );

        let none = corpus.find_by_hash(&hash_code("import re")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_hash_duplicates_in_id_order() {
        let tmp = TempDir::new().unwrap();
        let corpus = open(&tmp, MatchMode::Hash).await;
        corpus
            .insert_samples(&[sample("x = 1", "first"), sample("x=1", "second")])
            .await
            .unwrap();

        let hits = corpus.find_by_hash(&hash_code("x =  1")).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|h| h.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["first", "second"]);
        assert!(hits[0].id < hits[1].id);
    }

    #[tokio::test]
    async fn test_containment_is_one_directional() {
        let tmp = TempDir::new().unwrap();
        let corpus = open(&tmp, MatchMode::Containment).await;
        corpus
            .insert_samples(&[sample("import os", "short"), sample("xx import os yy", "long")])
            .await
            .unwrap();

        let hits = corpus.find_contained_in("xximportosyy").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.hash_str.is_none()));

        let hits = corpus.find_contained_in("importos").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title.as_deref(), Some("short"));
    }

    #[tokio::test]
    async fn test_containment_treats_like_wildcards_literally() {
        let tmp = TempDir::new().unwrap();
        let corpus = open(&tmp, MatchMode::Containment).await;
        corpus
            .insert_samples(&[sample("a%b", "percent"), sample("c_d", "underscore")])
            .await
            .unwrap();

        assert!(corpus.find_contained_in("aXXb").await.unwrap().is_empty());
        assert!(corpus.find_contained_in("cXd").await.unwrap().is_empty());
        assert_eq!(corpus.find_contained_in("zza%bzz").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_and_empty_sample_never_match() {
        let tmp = TempDir::new().unwrap();
        let corpus = open(&tmp, MatchMode::Containment).await;
        corpus
            .insert_samples(&[sample("   \n ", "blank"), sample("abc", "abc")])
            .await
            .unwrap();

        assert!(corpus.find_contained_in("").await.unwrap().is_empty());
        let hits = corpus.find_contained_in("zzabczz").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_lookup_after_pool_close_is_connection_loss() {
        let tmp = TempDir::new().unwrap();
        let corpus = open(&tmp, MatchMode::Containment).await;
        corpus.pool().close().await;

        let err = corpus.find_contained_in("abc").await.unwrap_err();
        assert!(err.is_connection_lost(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_slow_statement_is_interrupted_at_command_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = db_config(&tmp, MatchMode::Containment);
        cfg.max_connections = 1;
        let pool = crate::db::connect(&cfg).await.unwrap();
        create_schema(&pool, &cfg.table, MatchMode::Containment)
            .await
            .unwrap();
        let mut corpus = SqliteCorpus::new(pool, &cfg);
        corpus.command_timeout = Duration::from_millis(200);
        corpus
            .insert_samples(&[sample("abc", "abc")])
            .await
            .unwrap();

        // Counts far past the deadline and yields no rows.
        let slow = sqlx::query(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000000) \
             SELECT x FROM c WHERE x < 0",
        );
        let started = Instant::now();
        let err = corpus.fetch_in_tx(slow).await.err().expect("expected an error");
        let elapsed = started.elapsed();

        assert!(matches!(err, StoreError::Timeout(_)), "unexpected error: {}", err);
        assert!(elapsed < Duration::from_secs(2), "timeout took {:?}", elapsed);

        // The single pooled connection is usable again, without a stale deadline.
        let hits = corpus.find_contained_in("zzabczz").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_variant_lookup_is_query_error() {
        let tmp = TempDir::new().unwrap();
        let corpus = open(&tmp, MatchMode::Containment).await;

        let err = corpus.find_by_hash(&hash_code("abc")).await.unwrap_err();
        assert!(!err.is_connection_lost());
        assert!(matches!(err, StoreError::Query(_)));
    }
}
