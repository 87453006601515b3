//! SQLite-backed similarity store.
//!
//! Embeddings are stored as little-endian `f32` blobs and searched by
//! brute force, which keeps the store dependency-free for local use.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use super::distance::rank_ascending;
use super::store::{
    check_dimensions, check_query, dedupe_by_key, Neighbor, SimilarityStore, StoredRecord,
};
use crate::core::config::validation::is_sql_identifier;
use crate::core::config::DistanceMetric;
use crate::core::errors::RagError;

pub struct SqliteSimilarityStore {
    pool: SqlitePool,
    db_path: PathBuf,
    table: String,
    dimension: usize,
    metric: DistanceMetric,
    // SQLite allows one writer; upserts queue here instead of failing with SQLITE_BUSY.
    write_lock: Mutex<()>,
}

impl SqliteSimilarityStore {
    pub async fn with_path(
        db_path: PathBuf,
        table: &str,
        dimension: usize,
        metric: DistanceMetric,
        max_connections: u32,
    ) -> Result<Self, RagError> {
        if !is_sql_identifier(table) {
            return Err(RagError::Configuration(format!(
                "'{}' is not a valid table name",
                table
            )));
        }
        if dimension == 0 {
            return Err(RagError::Configuration(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            db_path,
            table: table.to_string(),
            dimension,
            metric,
            write_lock: Mutex::new(()),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn meta_table(&self) -> String {
        format!("{}_meta", self.table)
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    async fn insert_all(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        records: &[StoredRecord],
    ) -> Result<(), RagError> {
        let sql = format!(
            "INSERT INTO {} (record_key, text, source_label, embedding)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(record_key) DO UPDATE SET
                text = excluded.text,
                source_label = excluded.source_label,
                embedding = excluded.embedding",
            self.table
        );

        for record in records {
            sqlx::query(&sql)
                .bind(record.record_key())
                .bind(&record.text)
                .bind(&record.source_id)
                .bind(Self::serialize_embedding(&record.embedding))
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SimilarityStore for SqliteSimilarityStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn prepare(&self) -> Result<(), RagError> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_key TEXT NOT NULL UNIQUE,
                text TEXT NOT NULL,
                source_label TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
            self.table
        ))
        .execute(&mut *conn)
        .await?;

        let meta = self.meta_table();
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
            meta
        ))
        .execute(&mut *conn)
        .await?;

        let existing: Option<String> =
            sqlx::query_scalar(&format!("SELECT value FROM {} WHERE key = 'dimension'", meta))
                .fetch_optional(&mut *conn)
                .await?;

        match existing {
            Some(value) => {
                let stored = value.parse::<usize>().map_err(RagError::store)?;
                if stored != self.dimension {
                    return Err(RagError::Configuration(format!(
                        "table '{}' holds {}-dimensional vectors but {} were configured",
                        self.table, stored, self.dimension
                    )));
                }
            }
            None => {
                sqlx::query(&format!(
                    "INSERT INTO {} (key, value) VALUES ('dimension', ?1)",
                    meta
                ))
                .bind(self.dimension.to_string())
                .execute(&mut *conn)
                .await?;
            }
        }

        tracing::debug!(
            "SQLite store ready at {} (table {}, dim {})",
            self.db_path.display(),
            self.table,
            self.dimension
        );
        Ok(())
    }

    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize, RagError> {
        if records.is_empty() {
            return Ok(0);
        }
        check_dimensions(&records, self.dimension)?;
        let records = dedupe_by_key(records);

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if let Err(err) = self.insert_all(&mut tx, &records).await {
            tracing::warn!("Rolling back upsert of {} records: {}", records.len(), err);
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("Rollback failed: {}", rollback_err);
            }
            return Err(err);
        }

        tx.commit().await?;
        Ok(records.len())
    }

    async fn query_top_k(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        if !check_query(query, k, self.dimension)? {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT text, source_label, embedding FROM {} ORDER BY id",
            self.table
        ))
        .fetch_all(&mut *conn)
        .await?;
        drop(conn);

        let embeddings: Vec<Vec<f32>> = rows
            .iter()
            .map(|row| {
                let bytes: Vec<u8> = row.get("embedding");
                Self::deserialize_embedding(&bytes)
            })
            .collect();

        let ranked = rank_ascending(self.metric, query, &embeddings)?;

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(idx, distance)| Neighbor {
                text: rows[idx].get("text"),
                source_id: rows[idx].get("source_label"),
                distance,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<usize, RagError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
