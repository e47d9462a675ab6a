//! Persistence for identity embeddings and trust events.
//!
//! `VectorStore` is the seam the similarity service talks to. Two backends:
//! PostgreSQL with pgvector (`postgres` feature) and an in-process store.
//! Callers validate inputs before they reach a store; stores assume every
//! vector has the configured dimension.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{DatabaseConfig, VectorBackend, VectorConfig};
use crate::error::DatabaseError;

/// One nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityMatch {
    pub address: String,
    /// Cosine distance to the query, in `[0, 2]`.
    pub distance: f64,
}

/// A trust event before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrustEvent {
    pub from_address: String,
    pub to_address: String,
    pub trust_score: f64,
    pub embedding: Option<Vec<f32>>,
    pub event_type: String,
}

/// A stored, append-only trust event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustEvent {
    pub id: Uuid,
    pub from_address: String,
    pub to_address: String,
    pub trust_score: f64,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

impl TrustEvent {
    pub(crate) fn from_new(event: NewTrustEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_address: event.from_address,
            to_address: event.to_address,
            trust_score: event.trust_score,
            embedding: event.embedding,
            event_type: event.event_type,
            created_at,
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create tables and extensions if missing.
    async fn init(&self) -> Result<(), DatabaseError>;

    /// Insert or wholesale-replace the embedding stored for `address`.
    async fn upsert_identity(&self, address: &str, embedding: &[f32]) -> Result<(), DatabaseError>;

    /// Up to `limit` identities ordered by ascending cosine distance to
    /// `query`, ties broken by address. With `max_distance`, only rows
    /// strictly closer than it are returned.
    async fn nearest_identities(
        &self,
        query: &[f32],
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<IdentityMatch>, DatabaseError>;

    async fn insert_trust_event(&self, event: NewTrustEvent) -> Result<TrustEvent, DatabaseError>;

    fn backend_name(&self) -> &'static str;
}

/// Build the store selected by configuration and initialize its schema.
pub async fn connect_vector_store(
    database: &DatabaseConfig,
    vector: &VectorConfig,
) -> Result<Arc<dyn VectorStore>, DatabaseError> {
    let store: Arc<dyn VectorStore> = match vector.backend {
        VectorBackend::Memory => Arc::new(memory::MemoryVectorStore::new()),
        #[cfg(feature = "postgres")]
        VectorBackend::Postgres => {
            Arc::new(postgres::PgVectorStore::connect(database, vector.dimension).await?)
        }
        #[cfg(not(feature = "postgres"))]
        VectorBackend::Postgres => {
            let _ = database;
            return Err(DatabaseError::Pool(
                "postgres backend selected but the postgres feature is not compiled in"
                    .to_string(),
            ));
        }
    };
    store.init().await?;
    tracing::info!(backend = store.backend_name(), dimension = vector.dimension, "Vector store ready");
    Ok(store)
}

/// Cosine distance `1 - cos(a, b)`. Both inputs must be non-zero and of
/// equal length.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
