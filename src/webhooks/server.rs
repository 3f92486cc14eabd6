//! Admission webhook server.
//!
//! Serves `POST /mutate` for a MutatingWebhookConfiguration on pods.
//!
//! To enable the webhook:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a MutatingWebhookConfiguration for `pods` CREATE pointing at `/mutate`
//! 3. Mount the TLS certificate secret to the injector pod at /etc/webhook/certs/

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::health::HealthState;
use crate::mutate::{
    Decision, InjectionContext, MutateError, Outcome, SkipReason, decide, decode_request,
    wants_injection,
};
use crate::secret::SecretReader;
use crate::sidecar::SidecarConfigProvider;

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Path to the sidecar template
    pub sidecar_config_file: std::path::PathBuf,
    /// Sidecar template provider
    pub provider: Arc<dyn SidecarConfigProvider>,
    /// Credentials reader, present when storage credentials are injected
    pub secrets: Option<SecretReader>,
    /// Health and metrics
    pub health: Arc<HealthState>,
}

impl WebhookState {
    pub fn new(
        config: &Config,
        provider: Arc<dyn SidecarConfigProvider>,
        secrets: Option<SecretReader>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            sidecar_config_file: config.sidecar_config_file.clone(),
            provider,
            secrets,
            health,
        }
    }
}

/// Errors that can occur when serving admission requests
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The request was not a decodable pod
    #[error(transparent)]
    Mutate(#[from] MutateError),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Mutate(_) => StatusCode::BAD_REQUEST,
            WebhookError::TlsConfig(_) | WebhookError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_pod))
        .with_state(state)
}

/// Pod mutation handler
async fn mutate_pod(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Response {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            state.health.metrics.record_error();
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            )
                .into_response();
        }
    };

    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        "Processing admission request"
    );

    let started = Instant::now();
    match review_pod(&state, &request).await {
        Ok(decision) => {
            state
                .health
                .metrics
                .record_outcome(&decision.outcome, started.elapsed().as_secs_f64());
            if let Outcome::Injected { operations } = decision.outcome {
                info!(uid = %request.uid, operations, "Integrity monitor injected");
            }
            (StatusCode::OK, Json(decision.response.into_review())).into_response()
        }
        Err(e) => {
            warn!(uid = %request.uid, error = %e, "Rejecting malformed admission request");
            state.health.metrics.record_error();
            e.into_response()
        }
    }
}

/// Decode the pod, fetch credentials if needed and run the injection decision
async fn review_pod(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Decision, WebhookError> {
    let pod = decode_request(request)?;

    let credentials = match &state.secrets {
        Some(reader) if wants_injection(&pod) => match reader.read().await {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                error!(
                    uid = %request.uid,
                    pod = ?pod.metadata.name,
                    error = %e,
                    "Failed reading storage credentials, injection skipped"
                );
                return Ok(Decision::skipped(
                    AdmissionResponse::from(request),
                    SkipReason::Credentials,
                ));
            }
        },
        _ => None,
    };

    let ctx = InjectionContext {
        provider: state.provider.as_ref(),
        sidecar_config_file: &state.sidecar_config_file,
        credentials: credentials.as_ref(),
    };
    Ok(decide(&ctx, request, &pod))
}

/// Run the webhook server with TLS
///
/// Binds to `0.0.0.0:port` and serves the `/mutate` endpoint. The health
/// state is marked ready once the TLS configuration has loaded.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    cert_path: &Path,
    key_path: &Path,
    port: u16,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;

    let health = state.health.clone();
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Webhook server listening with TLS");
    health.set_ready(true).await;

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
