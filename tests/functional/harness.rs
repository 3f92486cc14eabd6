//! In-process webhook harness.
//!
//! Builds the same router as the binary, backed by a sidecar template in a
//! temporary directory, and exchanges AdmissionReview documents with it.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use integrity_injector::config::Config;
use integrity_injector::health::HealthState;
use integrity_injector::sidecar::TemplateProvider;
use integrity_injector::webhooks::{AdmissionResponse, AdmissionReview, create_webhook_router};
use integrity_injector::WebhookState;
use kube::api::DynamicObject;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Sidecar template shipped with the deployment manifests
pub const SHIPPED_TEMPLATE: &str = include_str!("../../config/sidecar.yaml");

/// A webhook wired to a template file it owns.
pub struct Harness {
    pub state: Arc<WebhookState>,
    pub template_path: PathBuf,
    _dir: TempDir,
}

impl Harness {
    /// Harness serving the shipped template.
    pub fn new() -> Self {
        Self::with_template(SHIPPED_TEMPLATE)
    }

    /// Harness serving the given template source.
    pub fn with_template(source: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("sidecar.yaml");
        std::fs::write(&template_path, source).unwrap();
        Self::at_path(dir, template_path)
    }

    /// Harness whose template path does not exist.
    pub fn without_template() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("missing.yaml");
        Self::at_path(dir, template_path)
    }

    fn at_path(dir: TempDir, template_path: PathBuf) -> Self {
        let config = Config {
            sidecar_config_file: template_path.clone(),
            ..Config::default()
        };
        let state = Arc::new(WebhookState::new(
            &config,
            Arc::new(TemplateProvider::new()),
            None,
            Arc::new(HealthState::new()),
        ));
        Self {
            state,
            template_path,
            _dir: dir,
        }
    }

    /// POST a raw body to `/mutate`.
    pub async fn post_raw(&self, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let request = Request::post("/mutate")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = create_webhook_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    /// POST an AdmissionReview and decode the returned review's response.
    pub async fn review(&self, review: &Value) -> AdmissionResponse {
        let (status, body) = self.post_raw(serde_json::to_vec(review).unwrap()).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        let review: AdmissionReview<DynamicObject> = serde_json::from_slice(&body).unwrap();
        review.response.expect("review carries a response")
    }

    /// Current metrics in Prometheus text format.
    pub fn metrics(&self) -> String {
        self.state.health.metrics.encode()
    }
}

/// Apply the response patch to `pod`, returning the mutated pod.
pub fn apply_patch(response: &AdmissionResponse, pod: &Value) -> Value {
    let patch: json_patch::Patch =
        serde_json::from_slice(response.patch.as_ref().expect("response carries a patch"))
            .unwrap();
    let mut pod = pod.clone();
    json_patch::patch(&mut pod, &patch).unwrap();
    pod
}

/// Names of the containers in a pod document.
pub fn container_names(pod: &Value) -> Vec<String> {
    pod["spec"]["containers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect()
}

/// Value of an env var on the named container.
pub fn env_value(pod: &Value, container: &str, name: &str) -> Option<String> {
    pod["spec"]["containers"]
        .as_array()?
        .iter()
        .find(|c| c["name"] == container)?["env"]
        .as_array()?
        .iter()
        .find(|e| e["name"] == name)
        .and_then(|e| e["value"].as_str().map(str::to_string))
}
