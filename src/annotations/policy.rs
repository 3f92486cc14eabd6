//! Annotation policy for injection candidates.
//!
//! Checks run in a fixed order (`inject`, `process-image`, `monitoring-paths`)
//! and missing annotations are reported in that order. A malformed
//! `process-image` value aborts the check immediately.

use std::collections::BTreeMap;

use thiserror::Error;

use super::grammar::matches_process_image;
use super::{ANNOTATION_INJECT, ANNOTATION_MONITORING_PATHS, ANNOTATION_PROCESS_IMAGE};

/// Reasons a pod's annotations do not qualify it for injection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    /// `process-image` is present but does not match the grammar
    #[error("invalid process-image: invalid process-image format")]
    InvalidProcessImage,

    /// One or more required annotations are absent
    #[error("one or more required annotations are missing {:?}", .names.join(","))]
    MissingAnnotations { names: Vec<&'static str> },
}

/// Evaluate the full annotation contract on a pod's annotations
pub fn check_annotations(annotations: &BTreeMap<String, String>) -> Result<(), AnnotationError> {
    let mut missing = Vec::new();

    if !annotations.contains_key(ANNOTATION_INJECT) {
        missing.push(ANNOTATION_INJECT);
    }

    if !check_process_image(annotations)? {
        missing.push(ANNOTATION_PROCESS_IMAGE);
    }

    if !check_paths_annotations(annotations) {
        missing.push(ANNOTATION_MONITORING_PATHS);
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AnnotationError::MissingAnnotations { names: missing })
    }
}

/// Check the `process-image` annotation.
///
/// Returns `Ok(false)` when the annotation is absent, `Ok(true)` when it is
/// present and well-formed.
pub fn check_process_image(annotations: &BTreeMap<String, String>) -> Result<bool, AnnotationError> {
    match annotations.get(ANNOTATION_PROCESS_IMAGE) {
        Some(value) if matches_process_image(value) => Ok(true),
        Some(_) => Err(AnnotationError::InvalidProcessImage),
        None => Ok(false),
    }
}

/// Check whether any annotation key contains the monitoring-paths key.
///
/// This is a substring match anywhere in the key, so
/// `nginx.integrity-monitor.scnsoft.com/monitoring-paths-logs` qualifies.
pub fn check_paths_annotations(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .keys()
        .any(|key| key.contains(ANNOTATION_MONITORING_PATHS))
}

/// All annotations whose key contains the monitoring-paths key, in key order
pub fn monitoring_path_annotations(
    annotations: &BTreeMap<String, String>,
) -> impl Iterator<Item = (&String, &String)> {
    annotations
        .iter()
        .filter(|(key, _)| key.contains(ANNOTATION_MONITORING_PATHS))
}
