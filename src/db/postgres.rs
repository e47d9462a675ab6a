//! PostgreSQL + pgvector backend for `VectorStore`.
//!
//! Embeddings only ever reach SQL as bound `pgvector::Vector` parameters,
//! built in [`to_pg_vector`]. The only interpolated DDL value is the
//! configured dimension.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime};
use pgvector::Vector;
use secrecy::ExposeSecret;
use tokio_postgres::NoTls;
use tracing::info;

use super::{IdentityMatch, NewTrustEvent, TrustEvent, VectorStore};
use crate::config::DatabaseConfig;
use crate::error::DatabaseError;

/// pgvector refuses HNSW indexes above this many dimensions.
const HNSW_MAX_DIMENSION: usize = 2000;

pub struct PgVectorStore {
    pool: Pool,
    dimension: usize,
}

impl std::fmt::Debug for PgVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgVectorStore")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

/// The single place an embedding becomes a SQL value.
fn to_pg_vector(values: &[f32]) -> Vector {
    Vector::from(values.to_vec())
}

impl PgVectorStore {
    /// Create a pool from configuration and check that a connection works.
    pub async fn connect(config: &DatabaseConfig, dimension: usize) -> Result<Self, DatabaseError> {
        let url = config.url.as_ref().ok_or_else(|| {
            DatabaseError::Pool("DATABASE_URL is required for the postgres backend".to_string())
        })?;

        let mut cfg = Config::new();
        cfg.url = Some(url.expose_secret().to_string());
        cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        let conn = pool.get().await?;
        conn.execute("SELECT 1", &[]).await?;
        info!(pool_size = config.pool_size, "Connected to PostgreSQL");

        Ok(Self::from_pool(pool, dimension))
    }

    pub fn from_pool(pool: Pool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    fn schema_sql(&self) -> String {
        let dim = self.dimension;
        let mut sql = format!(
            r#"
            CREATE EXTENSION IF NOT EXISTS vector;
            CREATE TABLE IF NOT EXISTS identity (
                address TEXT PRIMARY KEY,
                embedding vector({dim}) NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS trust_event (
                id UUID PRIMARY KEY,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                trust_score DOUBLE PRECISION NOT NULL,
                embedding vector({dim}),
                event_type TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_trust_event_from ON trust_event(from_address);
            CREATE INDEX IF NOT EXISTS idx_trust_event_to ON trust_event(to_address);
            "#
        );
        if dim <= HNSW_MAX_DIMENSION {
            sql.push_str(
                "CREATE INDEX IF NOT EXISTS idx_identity_embedding_cosine \
                 ON identity USING hnsw (embedding vector_cosine_ops);\n",
            );
        }
        sql
    }

    /// Fail fast when an existing table was created with another dimension.
    async fn check_dimension(&self, conn: &deadpool_postgres::Object) -> Result<(), DatabaseError> {
        let row = conn
            .query_opt(
                "SELECT atttypmod FROM pg_attribute \
                 WHERE attrelid = 'identity'::regclass AND attname = 'embedding'",
                &[],
            )
            .await?;
        let Some(row) = row else {
            return Err(DatabaseError::Schema(
                "identity.embedding column is missing".to_string(),
            ));
        };
        let stored: i32 = row.get(0);
        if usize::try_from(stored).ok() != Some(self.dimension) {
            return Err(DatabaseError::Schema(format!(
                "identity.embedding is vector({stored}) but EMBEDDING_DIMENSION is {}",
                self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn init(&self) -> Result<(), DatabaseError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(&self.schema_sql())
            .await
            .map_err(|e| DatabaseError::Schema(e.to_string()))?;
        self.check_dimension(&conn).await
    }

    async fn upsert_identity(&self, address: &str, embedding: &[f32]) -> Result<(), DatabaseError> {
        let conn = self.pool.get().await?;
        conn.execute(
            r#"
            INSERT INTO identity (address, embedding, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (address) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                updated_at = NOW()
            "#,
            &[&address, &to_pg_vector(embedding)],
        )
        .await?;
        Ok(())
    }

    async fn nearest_identities(
        &self,
        query: &[f32],
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<IdentityMatch>, DatabaseError> {
        let limit = i64::try_from(limit)
            .map_err(|_| DatabaseError::Query(format!("limit {limit} is out of range")))?;
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                r#"
                SELECT address, (embedding <=> $1)::float8 AS distance
                FROM identity
                WHERE $2::float8 IS NULL OR (embedding <=> $1) < $2::float8
                ORDER BY distance ASC, address ASC
                LIMIT $3
                "#,
                &[&to_pg_vector(query), &max_distance, &limit],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| IdentityMatch {
                address: row.get("address"),
                distance: row.get("distance"),
            })
            .collect())
    }

    async fn insert_trust_event(&self, event: NewTrustEvent) -> Result<TrustEvent, DatabaseError> {
        let stored = TrustEvent::from_new(event, Utc::now());
        let embedding = stored.embedding.as_deref().map(to_pg_vector);
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                r#"
                INSERT INTO trust_event
                    (id, from_address, to_address, trust_score, embedding, event_type)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING created_at
                "#,
                &[
                    &stored.id,
                    &stored.from_address,
                    &stored.to_address,
                    &stored.trust_score,
                    &embedding,
                    &stored.event_type,
                ],
            )
            .await?;
        let created_at: DateTime<Utc> = row.get("created_at");
        Ok(TrustEvent {
            created_at,
            ..stored
        })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
