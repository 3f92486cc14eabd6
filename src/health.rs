//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once the webhook is serving)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::mutate::Outcome;

/// Labels for admission outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: &'static str,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for skipped injections
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SkipLabels {
    pub reason: &'static str,
}

impl EncodeLabelSet for SkipLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("reason", self.reason).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the webhook
pub struct Metrics {
    /// Admitted requests by outcome (injected / skipped)
    pub admission_requests_total: Family<OutcomeLabels, Counter>,
    /// Skipped injections by reason
    pub skipped_injections_total: Family<SkipLabels, Counter>,
    /// Requests rejected as malformed
    pub admission_errors_total: Counter,
    /// Time spent deciding on a request
    pub admission_duration_seconds: Histogram,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let admission_requests_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "integrity_injector_admission_requests",
            "Total number of admitted pod requests by outcome",
            admission_requests_total.clone(),
        );

        let skipped_injections_total = Family::<SkipLabels, Counter>::default();
        registry.register(
            "integrity_injector_skipped_injections",
            "Total number of pods admitted without injection, by reason",
            skipped_injections_total.clone(),
        );

        let admission_errors_total = Counter::default();
        registry.register(
            "integrity_injector_admission_errors",
            "Total number of malformed admission requests",
            admission_errors_total.clone(),
        );

        let admission_duration_seconds = Histogram::new(exponential_buckets(0.0005, 2.0, 12));
        registry.register(
            "integrity_injector_admission_duration_seconds",
            "Duration of admission decisions in seconds",
            admission_duration_seconds.clone(),
        );

        Self {
            admission_requests_total,
            skipped_injections_total,
            admission_errors_total,
            admission_duration_seconds,
            registry,
        }
    }

    /// Record the outcome of an admitted request
    pub fn record_outcome(&self, outcome: &Outcome, duration_secs: f64) {
        let label = match outcome {
            Outcome::Injected { .. } => "injected",
            Outcome::Skipped(reason) => {
                self.skipped_injections_total
                    .get_or_create(&SkipLabels {
                        reason: reason.as_str(),
                    })
                    .inc();
                "skipped"
            }
        };
        self.admission_requests_total
            .get_or_create(&OutcomeLabels { outcome: label })
            .inc();
        self.admission_duration_seconds.observe(duration_secs);
    }

    /// Record a request rejected as malformed
    pub fn record_error(&self) {
        self.admission_errors_total.inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the webhook is serving
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the webhook as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the webhook listener is up.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:port`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
