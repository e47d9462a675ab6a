//! Identity similarity: embedding validation in front of a `VectorStore`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::auth::normalize_wallet_address;
use crate::config::VectorConfig;
use crate::db::{IdentityMatch, NewTrustEvent, TrustEvent, VectorStore};
use crate::error::{Error, ValidationError};
use crate::metrics::{EventContext, Metrics, SearchStatus};

/// An embedding that passed validation: non-empty, finite, representable as
/// `f32`, non-zero magnitude and exactly the configured dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn parse(values: &[f64], dimension: usize) -> Result<Self, ValidationError> {
        if values.is_empty() {
            return Err(ValidationError::EmptyEmbedding);
        }
        if values.len() != dimension {
            return Err(ValidationError::DimensionMismatch {
                expected: dimension,
                actual: values.len(),
            });
        }
        let mut out = Vec::with_capacity(values.len());
        let mut magnitude = 0.0f64;
        for (index, value) in values.iter().enumerate() {
            let narrowed = *value as f32;
            if !value.is_finite() || !narrowed.is_finite() {
                return Err(ValidationError::NonFiniteValue { index });
            }
            magnitude += f64::from(narrowed) * f64::from(narrowed);
            out.push(narrowed);
        }
        // Cosine distance is undefined for the zero vector.
        if magnitude == 0.0 {
            return Err(ValidationError::ZeroMagnitude);
        }
        Ok(Self(out))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

/// Query parameters as received from callers.
#[derive(Debug, Clone, Default)]
pub struct SimilarityQuery {
    pub embedding: Vec<f64>,
    pub limit: Option<i64>,
    pub threshold: Option<f64>,
}

/// Trust event input as received from callers.
#[derive(Debug, Clone, Default)]
pub struct TrustEventInput {
    pub from_address: String,
    pub to_address: String,
    pub trust_score: f64,
    pub event_type: String,
    pub embedding: Option<Vec<f64>>,
}

/// Similarity operations. Every input is validated before the store is
/// touched.
pub struct SimilarityService {
    store: Arc<dyn VectorStore>,
    dimension: usize,
    max_limit: usize,
    metrics: Metrics,
}

impl SimilarityService {
    pub fn new(store: Arc<dyn VectorStore>, config: &VectorConfig, metrics: Metrics) -> Self {
        Self {
            store,
            dimension: config.dimension,
            max_limit: config.max_limit,
            metrics,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub async fn upsert_identity_embedding(
        &self,
        address: &str,
        embedding: &[f64],
    ) -> Result<(), Error> {
        let address = required_address(address)?;
        let embedding = Embedding::parse(embedding, self.dimension)?;
        self.store
            .upsert_identity(&address, embedding.as_slice())
            .await?;
        self.metrics.record_event(EventContext::IdentityUpsert);
        debug!(%address, "Upserted identity embedding");
        Ok(())
    }

    pub async fn find_similar_identities(
        &self,
        query: SimilarityQuery,
    ) -> Result<Vec<IdentityMatch>, Error> {
        let started = Instant::now();
        let (embedding, limit) = match self.validate_query(&query) {
            Ok(validated) => validated,
            Err(err) => {
                self.metrics.observe_search(SearchStatus::Invalid, started);
                return Err(err.into());
            }
        };

        match self
            .store
            .nearest_identities(embedding.as_slice(), limit, query.threshold)
            .await
        {
            Ok(matches) => {
                self.metrics.observe_search(SearchStatus::Ok, started);
                Ok(matches)
            }
            Err(err) => {
                self.metrics.observe_search(SearchStatus::Error, started);
                error!(error = %err, "Similarity search failed");
                Err(err.into())
            }
        }
    }

    pub async fn record_trust_event(&self, input: TrustEventInput) -> Result<TrustEvent, Error> {
        let from_address = required_address(&input.from_address)?;
        let to_address = required_address(&input.to_address)?;
        if !input.trust_score.is_finite() {
            return Err(ValidationError::InvalidTrustScore.into());
        }
        let event_type = input.event_type.trim();
        if event_type.is_empty() {
            return Err(ValidationError::MissingEventType.into());
        }
        let embedding = input
            .embedding
            .as_deref()
            .map(|values| Embedding::parse(values, self.dimension))
            .transpose()?;

        let stored = self
            .store
            .insert_trust_event(NewTrustEvent {
                from_address,
                to_address,
                trust_score: input.trust_score,
                embedding: embedding.map(Embedding::into_vec),
                event_type: event_type.to_string(),
            })
            .await?;
        self.metrics.record_event(EventContext::TrustEvent);
        Ok(stored)
    }

    fn validate_query(&self, query: &SimilarityQuery) -> Result<(Embedding, usize), ValidationError> {
        let embedding = Embedding::parse(&query.embedding, self.dimension)?;
        let limit = match query.limit {
            None => self.max_limit.min(DEFAULT_LIMIT),
            Some(k) => usize::try_from(k)
                .ok()
                .filter(|k| (1..=self.max_limit).contains(k))
                .ok_or(ValidationError::InvalidLimit {
                    max: self.max_limit,
                })?,
        };
        if let Some(threshold) = query.threshold
            && (!threshold.is_finite() || threshold <= 0.0)
        {
            return Err(ValidationError::InvalidThreshold);
        }
        Ok((embedding, limit))
    }
}

/// `k` used when a query does not specify one.
pub const DEFAULT_LIMIT: usize = 10;

fn required_address(raw: &str) -> Result<String, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::MissingAddress);
    }
    normalize_wallet_address(raw).ok_or(ValidationError::InvalidAddress)
}
