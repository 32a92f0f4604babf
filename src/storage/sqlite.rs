//! SQLite storage backend implementation
//!
//! Implements [`KvBackend`] on top of two tables:
//!
//! - `kv_hash (key, field, value)` for hash fields
//! - `kv_zset (key, member, score)` for sorted sets, indexed on `(key, score)`
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: The collector and the agent can share one database file
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **Concurrency**: Writes are serialised by SQLite; the busy timeout absorbs
//!   contention between the collector's concurrent flush writes
//! - **Distributed**: Single-machine only

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, KvBackend, ScoreRange};
use super::error::{StorageError, StorageResult};

/// SQLite key-value backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    /// Render the score predicate for `range`, leaving infinite bounds out
    fn score_predicate(range: &ScoreRange) -> String {
        let mut predicate = String::new();
        if range.min.is_finite() {
            predicate.push_str(" AND score >= ?");
        }
        if range.max.is_finite() {
            predicate.push_str(" AND score <= ?");
        }
        predicate
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn hset(&self, key: &str, field: &str, value: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_hash (key, field, value)
            VALUES (?, ?, ?)
            ON CONFLICT (key, field) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
            .bind(key)
            .bind(field)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.try_get::<String, _>("value"))
            .transpose()
            .map_err(Into::into)
    }

    #[instrument(skip(self, fields), fields(count = fields.len()))]
    async fn hdel(&self, key: &str, fields: &[String]) -> StorageResult<usize> {
        if fields.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for field in fields {
            let result = sqlx::query("DELETE FROM kv_hash WHERE key = ? AND field = ?")
                .bind(key)
                .bind(field)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_zset (key, member, score)
            VALUES (?, ?, ?)
            ON CONFLICT (key, member) DO UPDATE SET score = excluded.score
            "#,
        )
        .bind(key)
        .bind(member)
        .bind(score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
    ) -> StorageResult<Vec<(String, f64)>> {
        let sql = format!(
            "SELECT member, score FROM kv_zset WHERE key = ?{} ORDER BY score ASC",
            Self::score_predicate(&range)
        );

        let mut query = sqlx::query(&sql).bind(key);
        if range.min.is_finite() {
            query = query.bind(range.min);
        }
        if range.max.is_finite() {
            query = query.bind(range.max);
        }

        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("member")?,
                    row.try_get::<f64, _>("score")?,
                ))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn zrem_range_by_score(&self, key: &str, range: ScoreRange) -> StorageResult<usize> {
        let sql = format!(
            "DELETE FROM kv_zset WHERE key = ?{}",
            Self::score_predicate(&range)
        );

        let mut query = sqlx::query(&sql).bind(key);
        if range.min.is_finite() {
            query = query.bind(range.min);
        }
        if range.max.is_finite() {
            query = query.bind(range.max);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
