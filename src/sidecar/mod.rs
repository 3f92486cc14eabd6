//! Sidecar configuration loading and patch generation.
//!
//! The sidecar is described by a YAML file that is rendered as a minijinja
//! template before decoding. Templates can reference:
//! - `annotations`: the pod's annotations
//! - `processes`: `[{process, image}]` parsed from the `process-image` annotation
//! - `monitoring_paths`: `[{key, value}]` for every monitoring-paths annotation
//! - `credentials`: `{user_name, user_password}` when storage credentials are injected
//!
//! Undefined variables render as empty strings, including attribute chains
//! such as `credentials.user_name` when no credentials were supplied.
//!
//! The rendered document has the shape:
//!
//! ```yaml
//! containers:
//!   - name: integrity-monitor
//!     image: registry.example.com/integrity-monitor:1.0
//! volumes:
//!   - name: integrity-monitor-state
//!     emptyDir: {}
//! ```

mod cache;

pub use cache::TemplateCache;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, Pod, Volume};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::annotations::{
    ANNOTATION_PROCESS_IMAGE, ProcessImage, monitoring_path_annotations, parse_process_images,
};
use crate::secret::MinioSecretData;

/// Errors from loading the sidecar configuration or building its patch
#[derive(Error, Debug)]
pub enum SidecarError {
    /// The template file could not be read
    #[error("failed to read sidecar config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template failed to render
    #[error("failed to render sidecar template: {0}")]
    Template(#[from] minijinja::Error),

    /// The rendered template is not a valid sidecar document
    #[error("invalid sidecar config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The rendered template defines no containers
    #[error("sidecar config defines no containers")]
    NoContainers,

    /// The pod has no spec to patch
    #[error("pod has no spec")]
    MissingPodSpec,

    /// The pod already runs a container with the sidecar's name
    #[error("pod already has container {0:?}")]
    AlreadyInjected(String),

    /// A container or volume could not be converted to JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Loads sidecar configuration for a pod
pub trait SidecarConfigProvider: Send + Sync {
    /// Load the sidecar configuration at `path` for a pod with `annotations`
    fn load(
        &self,
        path: &Path,
        annotations: &BTreeMap<String, String>,
        credentials: Option<&MinioSecretData>,
    ) -> Result<SidecarConfig, SidecarError>;
}

/// Containers and volumes to inject into a pod
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SidecarConfig {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl SidecarConfig {
    /// Build the JSON patch operations that add this sidecar to `pod`.
    ///
    /// Containers are appended to `/spec/containers`. Volumes are appended
    /// to `/spec/volumes`, or the array is created when the pod has none.
    pub fn create_patch(&self, pod: &Pod) -> Result<Vec<PatchOperation>, SidecarError> {
        let spec = pod.spec.as_ref().ok_or(SidecarError::MissingPodSpec)?;

        if let Some(existing) = self
            .containers
            .iter()
            .find(|sidecar| spec.containers.iter().any(|c| c.name == sidecar.name))
        {
            return Err(SidecarError::AlreadyInjected(existing.name.clone()));
        }

        let mut ops = Vec::with_capacity(self.containers.len() + self.volumes.len());

        for container in &self.containers {
            ops.push(add(["spec", "containers", "-"], serde_json::to_value(container)?));
        }

        if !self.volumes.is_empty() {
            if spec.volumes.is_some() {
                for volume in &self.volumes {
                    ops.push(add(["spec", "volumes", "-"], serde_json::to_value(volume)?));
                }
            } else {
                ops.push(add(["spec", "volumes"], serde_json::to_value(&self.volumes)?));
            }
        }

        Ok(ops)
    }
}

fn add<const N: usize>(tokens: [&str; N], value: serde_json::Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(tokens),
        value,
    })
}

#[derive(Serialize)]
struct MonitoringPath<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    annotations: &'a BTreeMap<String, String>,
    processes: Vec<ProcessImage>,
    monitoring_paths: Vec<MonitoringPath<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials: Option<&'a MinioSecretData>,
}

impl<'a> TemplateContext<'a> {
    fn new(
        annotations: &'a BTreeMap<String, String>,
        credentials: Option<&'a MinioSecretData>,
    ) -> Self {
        let processes = annotations
            .get(ANNOTATION_PROCESS_IMAGE)
            .map(|value| parse_process_images(value))
            .unwrap_or_default();
        let monitoring_paths = monitoring_path_annotations(annotations)
            .map(|(key, value)| MonitoringPath { key, value })
            .collect();

        Self {
            annotations,
            processes,
            monitoring_paths,
            credentials,
        }
    }
}

/// Renders a YAML sidecar template from disk
pub struct TemplateProvider {
    env: Environment<'static>,
    cache: TemplateCache,
}

impl Default for TemplateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateProvider {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        Self {
            env,
            cache: TemplateCache::new(),
        }
    }

    /// Render `source` for the given annotations and decode the result
    pub fn render(
        &self,
        source: &str,
        annotations: &BTreeMap<String, String>,
        credentials: Option<&MinioSecretData>,
    ) -> Result<SidecarConfig, SidecarError> {
        let ctx = TemplateContext::new(annotations, credentials);
        let rendered = self.env.render_str(source, &ctx)?;
        let config: SidecarConfig = serde_yaml::from_str(&rendered)?;

        if config.containers.is_empty() {
            return Err(SidecarError::NoContainers);
        }
        Ok(config)
    }
}

impl SidecarConfigProvider for TemplateProvider {
    fn load(
        &self,
        path: &Path,
        annotations: &BTreeMap<String, String>,
        credentials: Option<&MinioSecretData>,
    ) -> Result<SidecarConfig, SidecarError> {
        let source = self.cache.get(path)?;
        let config = self.render(&source, annotations, credentials)?;
        debug!(
            path = %path.display(),
            containers = config.containers.len(),
            volumes = config.volumes.len(),
            "Loaded sidecar config"
        );
        Ok(config)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::annotations::{ANNOTATION_INJECT, ANNOTATION_MONITORING_PATHS};
    use k8s_openapi::api::core::v1::PodSpec;

    const TEMPLATE: &str = r#"
containers:
  - name: integrity-monitor
    image: registry.example.com/integrity-monitor:1.0
    env:
      - name: PROCESS_IMAGES
        value: "{% for p in processes %}{{ p.process }}={{ p.image }};{% endfor %}"
      - name: MONITORING_PATHS
        value: "{% for m in monitoring_paths %}{{ m.value }};{% endfor %}"
      - name: STORAGE_USER
        value: "{{ credentials.user_name }}"
volumes:
  - name: integrity-monitor-state
    emptyDir: {}
"#;

    fn annotations() -> BTreeMap<String, String> {
        [
            (ANNOTATION_INJECT, "true"),
            (ANNOTATION_PROCESS_IMAGE, "nginx=nginx:1.25,redis=redis:7"),
            (ANNOTATION_MONITORING_PATHS, "/etc/nginx"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn env_value(config: &SidecarConfig, name: &str) -> String {
        config.containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
            .unwrap_or_default()
    }

    fn pod(containers: &[&str], volumes: Option<Vec<Volume>>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|name| Container {
                        name: name.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                volumes,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn paths(ops: &[PatchOperation]) -> Vec<String> {
        ops.iter()
            .map(|op| match op {
                PatchOperation::Add(a) => a.path.to_string(),
                other => panic!("unexpected op {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_render_template_with_annotations() {
        let provider = TemplateProvider::new();
        let config = provider.render(TEMPLATE, &annotations(), None).unwrap();

        assert_eq!(config.containers.len(), 1);
        assert_eq!(config.volumes.len(), 1);
        assert_eq!(
            env_value(&config, "PROCESS_IMAGES"),
            "nginx=nginx:1.25;redis=redis:7;"
        );
        assert_eq!(env_value(&config, "MONITORING_PATHS"), "/etc/nginx;");
        // No credentials supplied: the chained lookup renders empty
        assert_eq!(env_value(&config, "STORAGE_USER"), "");
    }

    #[test]
    fn test_render_template_with_credentials() {
        let provider = TemplateProvider::new();
        let creds = MinioSecretData {
            user_name: "admin".to_string(),
            user_password: "pw".to_string(),
        };
        let config = provider
            .render(TEMPLATE, &annotations(), Some(&creds))
            .unwrap();
        assert_eq!(env_value(&config, "STORAGE_USER"), "admin");
    }

    #[test]
    fn test_render_rejects_empty_containers() {
        let provider = TemplateProvider::new();
        let err = provider
            .render("volumes: []", &annotations(), None)
            .unwrap_err();
        assert!(matches!(err, SidecarError::NoContainers));
    }

    #[test]
    fn test_render_rejects_bad_template_syntax() {
        let provider = TemplateProvider::new();
        let err = provider
            .render("containers: {% for %}", &annotations(), None)
            .unwrap_err();
        assert!(matches!(err, SidecarError::Template(_)));
    }

    #[test]
    fn test_render_rejects_bad_yaml() {
        let provider = TemplateProvider::new();
        let err = provider
            .render("containers: [name: x", &annotations(), None)
            .unwrap_err();
        assert!(matches!(err, SidecarError::Yaml(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let provider = TemplateProvider::new();
        let err = provider
            .load(Path::new("/nonexistent/sidecar.yaml"), &annotations(), None)
            .unwrap_err();
        assert!(matches!(err, SidecarError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sidecar.yaml");
        std::fs::write(&path, TEMPLATE).unwrap();

        let provider = TemplateProvider::new();
        let config = provider.load(&path, &annotations(), None).unwrap();
        assert_eq!(config.containers[0].name, "integrity-monitor");
    }

    #[test]
    fn test_patch_creates_volumes_array() {
        let provider = TemplateProvider::new();
        let config = provider.render(TEMPLATE, &annotations(), None).unwrap();

        let ops = config.create_patch(&pod(&["app"], None)).unwrap();
        assert_eq!(paths(&ops), vec!["/spec/containers/-", "/spec/volumes"]);
    }

    #[test]
    fn test_patch_appends_to_existing_volumes() {
        let provider = TemplateProvider::new();
        let config = provider.render(TEMPLATE, &annotations(), None).unwrap();

        let existing = vec![Volume {
            name: "data".to_string(),
            ..Default::default()
        }];
        let ops = config.create_patch(&pod(&["app"], Some(existing))).unwrap();
        assert_eq!(paths(&ops), vec!["/spec/containers/-", "/spec/volumes/-"]);
    }

    #[test]
    fn test_patch_without_volumes() {
        let config = SidecarConfig {
            containers: vec![Container {
                name: "integrity-monitor".to_string(),
                ..Default::default()
            }],
            volumes: vec![],
        };
        let ops = config.create_patch(&pod(&["app"], None)).unwrap();
        assert_eq!(paths(&ops), vec!["/spec/containers/-"]);
    }

    #[test]
    fn test_patch_rejects_already_injected() {
        let provider = TemplateProvider::new();
        let config = provider.render(TEMPLATE, &annotations(), None).unwrap();

        let err = config
            .create_patch(&pod(&["app", "integrity-monitor"], None))
            .unwrap_err();
        assert!(matches!(err, SidecarError::AlreadyInjected(name) if name == "integrity-monitor"));
    }

    #[test]
    fn test_patch_requires_pod_spec() {
        let config = SidecarConfig::default();
        let err = config.create_patch(&Pod::default()).unwrap_err();
        assert!(matches!(err, SidecarError::MissingPodSpec));
    }

    #[test]
    fn test_patch_applies_to_pod_json() {
        let provider = TemplateProvider::new();
        let config = provider.render(TEMPLATE, &annotations(), None).unwrap();
        let original = pod(&["app"], None);

        let ops = config.create_patch(&original).unwrap();
        let mut doc = serde_json::to_value(&original).unwrap();
        json_patch::patch(&mut doc, &ops).unwrap();

        let patched: Pod = serde_json::from_value(doc).unwrap();
        let spec = patched.spec.unwrap();
        let names: Vec<&str> = spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["app", "integrity-monitor"]);
        assert_eq!(spec.volumes.unwrap()[0].name, "integrity-monitor-state");
    }
}
