//! integrity-injector library crate
//!
//! Decides from pod annotations whether to inject the integrity-monitor
//! sidecar, and serves that decision as a mutating admission webhook.

pub mod annotations;
pub mod config;
pub mod health;
pub mod mutate;
pub mod secret;
pub mod sidecar;
pub mod webhooks;

pub use config::Config;
pub use health::HealthState;
pub use mutate::{Decision, InjectionContext, MutateError, Outcome, SkipReason, inject_integrity_monitor};
pub use webhooks::{WebhookError, WebhookState, run_webhook_server};
