//! Test fixtures and builder patterns for pod admission reviews.

use std::collections::BTreeMap;

use integrity_injector::annotations::{
    ANNOTATION_INJECT, ANNOTATION_MONITORING_PATHS, ANNOTATION_PROCESS_IMAGE,
};
use serde_json::{Value, json};

/// Builder for creating pod AdmissionReview test fixtures.
///
/// # Example
/// ```
/// let review = PodReviewBuilder::new("web")
///     .namespace("shop")
///     .injectable()
///     .container("app", "nginx:1.25")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct PodReviewBuilder {
    name: Option<String>,
    generate_name: Option<String>,
    namespace: String,
    uid: String,
    resource: String,
    annotations: BTreeMap<String, String>,
    containers: Vec<(String, String)>,
    volumes: Option<Vec<String>>,
    with_spec: bool,
}

impl PodReviewBuilder {
    /// Create a new builder for a pod with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            generate_name: None,
            namespace: "default".to_string(),
            uid: "0d3c6b1e-5f6a-4b8e-9c2d-7a1f0e9b8c7d".to_string(),
            resource: "pods".to_string(),
            annotations: BTreeMap::new(),
            containers: vec![("app".to_string(), "nginx:latest".to_string())],
            volumes: None,
            with_spec: true,
        }
    }

    /// Pod created from a controller template with only `generateName` set.
    pub fn generated(prefix: impl Into<String>) -> Self {
        let mut builder = Self::new("");
        builder.name = None;
        builder.generate_name = Some(prefix.into());
        builder
    }

    /// Set the namespace for the pod.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the admission request uid.
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    /// Target a resource other than `pods`.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Add an annotation.
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Remove an annotation previously added.
    pub fn without_annotation(mut self, key: &str) -> Self {
        self.annotations.remove(key);
        self
    }

    /// Add the full set of annotations that select a pod for injection.
    pub fn injectable(self) -> Self {
        self.annotation(ANNOTATION_INJECT, "true")
            .annotation(ANNOTATION_PROCESS_IMAGE, "nginx=nginx:latest")
            .annotation(ANNOTATION_MONITORING_PATHS, "/etc/nginx")
    }

    /// Replace the default container list with a single container.
    pub fn container(mut self, name: impl Into<String>, image: impl Into<String>) -> Self {
        self.containers = vec![(name.into(), image.into())];
        self
    }

    /// Add a pod volume (emptyDir).
    pub fn volume(mut self, name: impl Into<String>) -> Self {
        self.volumes.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    /// Drop `spec` from the pod object.
    pub fn without_spec(mut self) -> Self {
        self.with_spec = false;
        self
    }

    /// Build the pod object.
    pub fn pod(&self) -> Value {
        let mut metadata = json!({
            "namespace": self.namespace,
            "annotations": self.annotations,
        });
        if let Some(name) = &self.name {
            metadata["name"] = json!(name);
        }
        if let Some(prefix) = &self.generate_name {
            metadata["generateName"] = json!(prefix);
        }

        let mut pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": metadata,
        });

        if self.with_spec {
            let containers: Vec<Value> = self
                .containers
                .iter()
                .map(|(name, image)| json!({"name": name, "image": image}))
                .collect();
            let mut spec = json!({ "containers": containers });
            if let Some(volumes) = &self.volumes {
                let volumes: Vec<Value> = volumes
                    .iter()
                    .map(|name| json!({"name": name, "emptyDir": {}}))
                    .collect();
                spec["volumes"] = json!(volumes);
            }
            pod["spec"] = spec;
        }

        pod
    }

    /// Build the AdmissionReview JSON document.
    pub fn build(&self) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": self.uid,
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": self.resource},
                "namespace": self.namespace,
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "object": self.pod(),
                "dryRun": false
            }
        })
    }
}
