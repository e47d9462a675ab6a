//! Prometheus metrics.
//!
//! Every [`Metrics`] owns its own [`Registry`]; nothing is process-global, so
//! two instances (two servers in one test binary, say) never share counters.

use std::time::Instant;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::MetricsError;

const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Outcome label for similarity searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Ok,
    Invalid,
    Error,
}

impl SearchStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

/// Timed computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Computation {
    SignatureRecovery,
    SessionSeal,
    SessionUnseal,
}

impl Computation {
    fn as_str(self) -> &'static str {
        match self {
            Self::SignatureRecovery => "signature_recovery",
            Self::SessionSeal => "session_seal",
            Self::SessionUnseal => "session_unseal",
        }
    }
}

/// Event contexts counted by `walletgate_events_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventContext {
    MessageIssued,
    Verify,
    SignOut,
    IdentityUpsert,
    TrustEvent,
    RateLimited,
}

impl EventContext {
    fn as_str(self) -> &'static str {
        match self {
            Self::MessageIssued => "message_issued",
            Self::Verify => "verify",
            Self::SignOut => "sign_out",
            Self::IdentityUpsert => "identity_upsert",
            Self::TrustEvent => "trust_event",
            Self::RateLimited => "rate_limited",
        }
    }
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    searches: IntCounterVec,
    search_duration: Histogram,
    computations: IntCounterVec,
    computation_duration: HistogramVec,
    events: IntCounterVec,
    verifications: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let searches = IntCounterVec::new(
            Opts::new(
                "walletgate_similarity_searches_total",
                "Similarity searches by status",
            ),
            &["status"],
        )?;
        let search_duration = Histogram::with_opts(
            HistogramOpts::new(
                "walletgate_similarity_search_duration_seconds",
                "Similarity search latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let computations = IntCounterVec::new(
            Opts::new("walletgate_computations_total", "Computations by kind"),
            &["kind"],
        )?;
        let computation_duration = HistogramVec::new(
            HistogramOpts::new(
                "walletgate_computation_duration_seconds",
                "Computation duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["kind"],
        )?;
        let events = IntCounterVec::new(
            Opts::new("walletgate_events_total", "Events by context"),
            &["context"],
        )?;
        let verifications = IntCounterVec::new(
            Opts::new(
                "walletgate_auth_verifications_total",
                "Sign-in verifications by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(searches.clone()))?;
        registry.register(Box::new(search_duration.clone()))?;
        registry.register(Box::new(computations.clone()))?;
        registry.register(Box::new(computation_duration.clone()))?;
        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(verifications.clone()))?;

        Ok(Self {
            registry,
            searches,
            search_duration,
            computations,
            computation_duration,
            events,
            verifications,
        })
    }

    pub fn observe_search(&self, status: SearchStatus, started: Instant) {
        self.searches.with_label_values(&[status.as_str()]).inc();
        self.search_duration
            .observe(started.elapsed().as_secs_f64());
    }

    /// Run `f`, recording its duration under `kind`.
    pub fn time<T>(&self, kind: Computation, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        let label = [kind.as_str()];
        self.computations.with_label_values(&label).inc();
        self.computation_duration
            .with_label_values(&label)
            .observe(started.elapsed().as_secs_f64());
        out
    }

    pub fn record_event(&self, context: EventContext) {
        self.events.with_label_values(&[context.as_str()]).inc();
    }

    /// `outcome` is `success` or a failure reason label.
    pub fn record_verification(&self, outcome: &str) {
        self.verifications.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of the current state.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    #[cfg(test)]
    pub(crate) fn verification_count(&self, outcome: &str) -> u64 {
        self.verifications.with_label_values(&[outcome]).get()
    }

    #[cfg(test)]
    pub(crate) fn search_count(&self, status: SearchStatus) -> u64 {
        self.searches.with_label_values(&[status.as_str()]).get()
    }
}
