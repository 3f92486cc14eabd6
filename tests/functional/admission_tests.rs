//! Admission contract tests.
//!
//! Every well-formed pod review is allowed. Only requests for the wrong
//! resource or with an undecodable payload are rejected.

use axum::http::StatusCode;
use integrity_injector::annotations::{
    ANNOTATION_INJECT, ANNOTATION_MONITORING_PATHS, ANNOTATION_PROCESS_IMAGE,
};
use integrity_injector::webhooks::AdmissionResponse;

use crate::common::fixtures::PodReviewBuilder;
use crate::{Harness, apply_patch, container_names};

fn assert_admitted_unchanged(response: &AdmissionResponse) {
    assert!(response.allowed);
    assert!(response.patch.is_none());
    assert!(response.patch_type.is_none());
}

#[tokio::test]
async fn test_injects_shipped_template() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web").injectable();

    let response = harness.review(&builder.build()).await;

    assert!(response.allowed);
    assert_eq!(response.uid, "0d3c6b1e-5f6a-4b8e-9c2d-7a1f0e9b8c7d");
    let pod = apply_patch(&response, &builder.pod());
    assert_eq!(container_names(&pod), ["app", "integrity-monitor"]);
    assert_eq!(pod["spec"]["volumes"][0]["name"], "integrity-monitor-state");
    assert!(harness.metrics().contains("outcome=\"injected\""));
}

#[tokio::test]
async fn test_existing_volumes_are_kept() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web").injectable().volume("data");

    let response = harness.review(&builder.build()).await;

    let pod = apply_patch(&response, &builder.pod());
    let volumes: Vec<&str> = pod["spec"]["volumes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap())
        .collect();
    assert_eq!(volumes, ["data", "integrity-monitor-state"]);
}

#[tokio::test]
async fn test_generated_name_pod_is_injected() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::generated("web-7d9f8c6b5-").injectable();

    let response = harness.review(&builder.build()).await;

    let pod = apply_patch(&response, &builder.pod());
    assert_eq!(container_names(&pod), ["app", "integrity-monitor"]);
}

#[tokio::test]
async fn test_unannotated_pod_is_admitted() {
    let harness = Harness::new();

    let response = harness.review(&PodReviewBuilder::new("web").build()).await;

    assert_admitted_unchanged(&response);
    assert!(harness.metrics().contains("reason=\"missing_annotations\""));
}

#[tokio::test]
async fn test_missing_inject_annotation_is_admitted() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web")
        .injectable()
        .without_annotation(ANNOTATION_INJECT);

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
}

#[tokio::test]
async fn test_invalid_process_image_is_admitted() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web")
        .injectable()
        .annotation(ANNOTATION_PROCESS_IMAGE, "nginx=nginx:latest,postgresql");

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
}

#[tokio::test]
async fn test_missing_monitoring_paths_is_admitted() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web")
        .injectable()
        .without_annotation(ANNOTATION_MONITORING_PATHS);

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
}

#[tokio::test]
async fn test_disabled_flag_is_admitted() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web")
        .injectable()
        .annotation(ANNOTATION_INJECT, "0");

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
    assert!(harness.metrics().contains("reason=\"disabled\""));
}

#[tokio::test]
async fn test_unparseable_flag_is_admitted() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web")
        .injectable()
        .annotation(ANNOTATION_INJECT, "enabled");

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
    assert!(harness.metrics().contains("reason=\"invalid_inject_flag\""));
}

#[tokio::test]
async fn test_missing_template_fails_open() {
    let harness = Harness::without_template();
    let builder = PodReviewBuilder::new("web").injectable();

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
    assert!(harness.metrics().contains("reason=\"config_load\""));
}

#[tokio::test]
async fn test_already_injected_pod_is_admitted() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web")
        .injectable()
        .container("integrity-monitor", "integrity-monitor:latest");

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
    assert!(harness.metrics().contains("reason=\"patch_creation\""));
}

#[tokio::test]
async fn test_pod_without_spec_is_admitted() {
    let harness = Harness::new();
    let builder = PodReviewBuilder::new("web").injectable().without_spec();

    assert_admitted_unchanged(&harness.review(&builder.build()).await);
}

#[tokio::test]
async fn test_wrong_resource_is_rejected() {
    let harness = Harness::new();
    let review = PodReviewBuilder::new("web")
        .injectable()
        .resource("deployments")
        .build();

    let (status, body) = harness.post_raw(serde_json::to_vec(&review).unwrap()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("deployments"));
    assert!(harness.metrics().contains("integrity_injector_admission_errors_total 1"));
}

#[tokio::test]
async fn test_review_without_request_is_rejected() {
    let harness = Harness::new();
    let review = serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview"
    });

    let (status, _) = harness.post_raw(serde_json::to_vec(&review).unwrap()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_json_body_is_rejected() {
    let harness = Harness::new();

    let (status, _) = harness.post_raw(b"not json".to_vec()).await;

    assert!(status.is_client_error());
}
