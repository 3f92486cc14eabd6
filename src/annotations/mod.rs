//! Pod annotation contract for integrity-monitor injection.
//!
//! All keys live under the `integrity-monitor.scnsoft.com/` prefix:
//! - `inject`: required, boolean literal (see [`flag`])
//! - `process-image`: CSV of `process=image` pairs (see [`grammar`])
//! - `monitoring-paths`: required, matched by substring on any key

pub mod flag;
pub mod grammar;
pub mod policy;

pub use flag::{InjectFlagError, parse_inject_flag};
pub use grammar::{ProcessImage, matches_process_image, parse_process_images};
pub use policy::{
    AnnotationError, check_annotations, check_paths_annotations, check_process_image,
    monitoring_path_annotations,
};

/// Annotation that enables or disables sidecar injection
pub const ANNOTATION_INJECT: &str = "integrity-monitor.scnsoft.com/inject";
/// Annotation (or key fragment) carrying the paths the sidecar watches
pub const ANNOTATION_MONITORING_PATHS: &str = "integrity-monitor.scnsoft.com/monitoring-paths";
/// Annotation mapping monitored processes to their container images
pub const ANNOTATION_PROCESS_IMAGE: &str = "integrity-monitor.scnsoft.com/process-image";
