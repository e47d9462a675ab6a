use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{IdentityMatch, NewTrustEvent, TrustEvent, VectorStore, cosine_distance};
use crate::error::DatabaseError;

/// In-process vector store with the same ordering and filtering semantics as
/// the pgvector backend. Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    identities: RwLock<BTreeMap<String, Vec<f32>>>,
    events: RwLock<Vec<TrustEvent>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn trust_events(&self) -> Vec<TrustEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn init(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn upsert_identity(&self, address: &str, embedding: &[f32]) -> Result<(), DatabaseError> {
        self.identities
            .write()
            .await
            .insert(address.to_string(), embedding.to_vec());
        Ok(())
    }

    async fn nearest_identities(
        &self,
        query: &[f32],
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<IdentityMatch>, DatabaseError> {
        let identities = self.identities.read().await;
        let mut matches: Vec<IdentityMatch> = identities
            .iter()
            .map(|(address, embedding)| IdentityMatch {
                address: address.clone(),
                distance: cosine_distance(query, embedding),
            })
            .filter(|m| max_distance.is_none_or(|max| m.distance < max))
            .collect();
        // BTreeMap iteration is already address-ordered, so a stable sort
        // on distance keeps the address tie-break.
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn insert_trust_event(&self, event: NewTrustEvent) -> Result<TrustEvent, DatabaseError> {
        let stored = TrustEvent::from_new(event, Utc::now());
        self.events.write().await.push(stored.clone());
        Ok(stored)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
