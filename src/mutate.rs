//! Injection decision for pod admission requests.
//!
//! Only malformed requests (wrong resource, undecodable pod) are returned as
//! errors. Every failure after that point is logged and the pod is admitted
//! unchanged, so a broken injection pipeline never blocks pod creation.

use std::collections::BTreeMap;
use std::path::Path;

use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use kube::core::GroupVersionResource;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::annotations::{ANNOTATION_INJECT, check_annotations, parse_inject_flag};
use crate::secret::MinioSecretData;
use crate::sidecar::SidecarConfigProvider;

/// Errors that reject the request itself rather than skipping injection
#[derive(Error, Debug)]
pub enum MutateError {
    /// The request is not for the core/v1 pods resource
    #[error("received unexpected resource type: {0}")]
    UnexpectedResource(String),

    /// The request carries no object
    #[error("admission request has no object")]
    MissingObject,

    /// The object could not be decoded as a Pod
    #[error("error decoding raw pod: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Why a pod was admitted without a patch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    MissingAnnotations,
    InvalidInjectFlag,
    Disabled,
    Credentials,
    ConfigLoad,
    PatchCreation,
    Serialization,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingAnnotations => "missing_annotations",
            SkipReason::InvalidInjectFlag => "invalid_inject_flag",
            SkipReason::Disabled => "disabled",
            SkipReason::Credentials => "credentials",
            SkipReason::ConfigLoad => "config_load",
            SkipReason::PatchCreation => "patch_creation",
            SkipReason::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the webhook did with an admitted pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The sidecar patch was attached
    Injected { operations: usize },
    /// The pod was admitted unchanged
    Skipped(SkipReason),
}

/// The admission response together with the outcome that produced it
#[derive(Debug)]
pub struct Decision {
    pub response: AdmissionResponse,
    pub outcome: Outcome,
}

impl Decision {
    pub fn skipped(response: AdmissionResponse, reason: SkipReason) -> Self {
        Self {
            response,
            outcome: Outcome::Skipped(reason),
        }
    }
}

/// Collaborators needed to build the sidecar patch
pub struct InjectionContext<'a> {
    /// Loads the sidecar definition
    pub provider: &'a dyn SidecarConfigProvider,
    /// Path of the sidecar template
    pub sidecar_config_file: &'a Path,
    /// Storage credentials made available to the template
    pub credentials: Option<&'a MinioSecretData>,
}

/// Check that the request targets `core/v1` pods
pub fn is_pod_resource(resource: &GroupVersionResource) -> bool {
    resource.group.is_empty() && resource.version == "v1" && resource.resource == "pods"
}

/// Decode the request object as a Pod
pub fn decode_pod(object: Option<&DynamicObject>) -> Result<Pod, MutateError> {
    let object = object.ok_or(MutateError::MissingObject)?;
    let raw = serde_json::to_value(object)?;
    Ok(serde_json::from_value(raw)?)
}

/// Validate the request and decode its pod.
///
/// These are the only failures that are returned to the caller.
pub fn decode_request(request: &AdmissionRequest<DynamicObject>) -> Result<Pod, MutateError> {
    if !is_pod_resource(&request.resource) {
        return Err(MutateError::UnexpectedResource(
            request.resource.resource.clone(),
        ));
    }
    decode_pod(request.object.as_ref())
}

/// Whether the pod's annotations ask for injection and are well-formed
pub fn wants_injection(pod: &Pod) -> bool {
    let Some(annotations) = pod.metadata.annotations.as_ref() else {
        return false;
    };
    check_annotations(annotations).is_ok()
        && annotations
            .get(ANNOTATION_INJECT)
            .is_some_and(|value| parse_inject_flag(value) == Ok(true))
}

/// Decide whether to inject the integrity monitor and build the response.
///
/// The returned response is always `allowed`; it carries a JSON patch only
/// when the sidecar was injected.
pub fn inject_integrity_monitor(
    ctx: &InjectionContext<'_>,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Decision, MutateError> {
    let pod = decode_request(request)?;
    Ok(decide(ctx, request, &pod))
}

/// Run the annotation policy and sidecar pipeline for an already decoded pod
pub fn decide(
    ctx: &InjectionContext<'_>,
    request: &AdmissionRequest<DynamicObject>,
    pod: &Pod,
) -> Decision {
    let response = AdmissionResponse::from(request);

    let pod_name = pod_name(pod, request);
    let empty = BTreeMap::new();
    let annotations = pod.metadata.annotations.as_ref().unwrap_or(&empty);
    debug!(pod = %pod_name, annotations = ?annotations, "Processing pod");

    if let Err(e) = check_annotations(annotations) {
        info!(
            pod = %pod_name,
            reason = %e,
            "Pod has no injector annotations, injection skipped"
        );
        return Decision::skipped(response, SkipReason::MissingAnnotations);
    }

    let value = annotations
        .get(ANNOTATION_INJECT)
        .map(String::as_str)
        .unwrap_or_default();
    let inject = match parse_inject_flag(value) {
        Ok(inject) => inject,
        Err(e) => {
            error!(pod = %pod_name, error = %e, "Failed to parse inject annotation value");
            return Decision::skipped(response, SkipReason::InvalidInjectFlag);
        }
    };

    if !inject {
        debug!(pod = %pod_name, "Injection disabled by annotation");
        return Decision::skipped(response, SkipReason::Disabled);
    }

    let sidecar = match ctx
        .provider
        .load(ctx.sidecar_config_file, annotations, ctx.credentials)
    {
        Ok(sidecar) => sidecar,
        Err(e) => {
            error!(pod = %pod_name, error = %e, "Failed loading sidecar config");
            return Decision::skipped(response, SkipReason::ConfigLoad);
        }
    };

    let ops = match sidecar.create_patch(pod) {
        Ok(ops) => ops,
        Err(e) => {
            error!(pod = %pod_name, error = %e, "Failed creating patch");
            return Decision::skipped(response, SkipReason::PatchCreation);
        }
    };

    let operations = ops.len();
    debug!(
        pod = %pod_name,
        patch = %serde_json::to_string(&ops).unwrap_or_default(),
        "Sidecar patches being applied"
    );

    match response.clone().with_patch(Patch(ops)) {
        Ok(patched) => Decision {
            response: patched,
            outcome: Outcome::Injected { operations },
        },
        Err(e) => {
            error!(pod = %pod_name, error = %e, "Failed patching pod");
            Decision::skipped(response, SkipReason::Serialization)
        }
    }
}

/// Pod name for logging; pods created from a controller template may only
/// have `generateName` set at admission time
fn pod_name(pod: &Pod, request: &AdmissionRequest<DynamicObject>) -> String {
    pod.metadata
        .name
        .clone()
        .or_else(|| Some(request.name.clone()).filter(|n| !n.is_empty()))
        .or_else(|| pod.metadata.generate_name.clone())
        .unwrap_or_default()
}
