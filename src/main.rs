//! integrity-injector - mutating admission webhook for integrity-monitor sidecars.
//!
//! This is the main entry point that:
//! - Parses configuration from flags and environment
//! - Initializes structured logging
//! - Creates the Kubernetes client when storage credentials are injected
//! - Starts the health server and the TLS webhook server

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use integrity_injector::annotations::grammar;
use integrity_injector::config::{Config, LogFormat, log_filter};
use integrity_injector::health::{HealthState, run_health_server};
use integrity_injector::secret::SecretReader;
use integrity_injector::sidecar::TemplateProvider;
use integrity_injector::{WebhookState, run_webhook_server};

/// Grace period for in-flight admission requests during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    // kube and axum-server may both pull in a crypto backend; pick one explicitly
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        return Err("failed to install rustls crypto provider".into());
    }

    init_tracing(config.log_format);

    info!(
        sidecar_config = %config.sidecar_config_file.display(),
        port = config.port,
        "Starting integrity-injector"
    );

    if !grammar::init() {
        return Err("failed to compile process-image grammar".into());
    }

    let secrets = if config.inject_storage_credentials {
        let client = Client::try_default().await?;
        info!(
            namespace = %config.credentials_namespace,
            secret = %config.credentials_secret,
            "Connected to Kubernetes cluster for storage credentials"
        );
        Some(SecretReader::new(
            client,
            &config.credentials_namespace,
            config.credentials_secret.clone(),
        ))
    } else {
        None
    };

    if !config.sidecar_config_file.exists() {
        warn!(
            path = %config.sidecar_config_file.display(),
            "Sidecar config file not found, pods will be admitted without injection"
        );
    }

    let health_state = Arc::new(HealthState::new());
    let state = Arc::new(WebhookState::new(
        &config,
        Arc::new(TemplateProvider::new()),
        secrets,
        health_state.clone(),
    ));

    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let webhook_handle = {
        let cert = config.tls_cert_file.clone();
        let key = config.tls_key_file.clone();
        let port = config.port;
        tokio::spawn(async move {
            if let Err(e) = run_webhook_server(state, &cert, &key, port).await {
                error!("Webhook server error: {}", e);
            }
        })
    };

    tokio::select! {
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Stop receiving new admission requests from the API server
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;
        }
    }

    info!("integrity-injector stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt().with_env_filter(log_filter(rust_log.as_deref()));
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
