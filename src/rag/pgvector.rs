//! PostgreSQL + pgvector similarity store.
//!
//! Ranking is delegated to the database through the metric's pgvector
//! operator; an HNSW index is created alongside the table.

use std::time::Duration;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};

use super::store::{
    check_dimensions, check_query, dedupe_by_key, Neighbor, SimilarityStore, StoredRecord,
};
use crate::core::config::validation::is_sql_identifier;
use crate::core::config::DistanceMetric;
use crate::core::errors::RagError;

pub struct PgVectorStore {
    pool: PgPool,
    table: String,
    dimension: usize,
    metric: DistanceMetric,
}

impl PgVectorStore {
    pub async fn connect(
        database_url: &str,
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

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        Ok(Self {
            pool,
            table: table.to_string(),
            dimension,
            metric,
        })
    }

    async fn insert_all(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        records: &[StoredRecord],
    ) -> Result<(), RagError> {
        let sql = format!(
            "INSERT INTO {} (record_key, text, source_label, embedding)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (record_key) DO UPDATE SET
                text = EXCLUDED.text,
                source_label = EXCLUDED.source_label,
                embedding = EXCLUDED.embedding",
            self.table
        );

        for record in records {
            sqlx::query(&sql)
                .bind(record.record_key())
                .bind(&record.text)
                .bind(&record.source_id)
                .bind(Vector::from(record.embedding.clone()))
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SimilarityStore for PgVectorStore {
    fn name(&self) -> &'static str {
        "pgvector"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn prepare(&self) -> Result<(), RagError> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&mut *conn)
            .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                record_key TEXT NOT NULL UNIQUE,
                text TEXT NOT NULL,
                source_label TEXT NOT NULL,
                embedding vector({}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table, self.dimension
        ))
        .execute(&mut *conn)
        .await?;

        // vector(n) keeps n in atttypmod
        let stored: Option<i32> = sqlx::query_scalar(
            "SELECT atttypmod FROM pg_attribute
             WHERE attrelid = to_regclass($1) AND attname = 'embedding'",
        )
        .bind(&self.table)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(stored) = stored {
            if stored > 0 && stored as usize != self.dimension {
                return Err(RagError::Configuration(format!(
                    "table '{}' holds {}-dimensional vectors but {} were configured",
                    self.table, stored, self.dimension
                )));
            }
        }

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_embedding_idx ON {table} USING hnsw (embedding {ops})",
            table = self.table,
            ops = self.metric.index_ops()
        ))
        .execute(&mut *conn)
        .await?;

        tracing::debug!(
            "pgvector table {} ready (dim {}, {:?})",
            self.table,
            self.dimension,
            self.metric
        );
        Ok(())
    }

    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize, RagError> {
        if records.is_empty() {
            return Ok(0);
        }
        check_dimensions(&records, self.dimension)?;
        let records = dedupe_by_key(records);

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

        let sql = format!(
            "SELECT text, source_label, (embedding {op} $1)::float8 AS distance
             FROM {table}
             ORDER BY embedding {op} $1, id
             LIMIT $2",
            op = self.metric.operator(),
            table = self.table
        );

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql)
            .bind(Vector::from(query.to_vec()))
            .bind(k as i64)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let distance: f64 = row.get("distance");
                Neighbor {
                    text: row.get("text"),
                    source_id: row.get("source_label"),
                    distance: distance as f32,
                }
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
        let result = sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
