//! Mutating admission webhook for integrity-monitor sidecar injection.

mod server;

pub use server::{WebhookError, WebhookState, create_webhook_router, run_webhook_server};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionResponse, AdmissionReview};
