//! Process configuration from command-line flags and environment variables.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::secret::{DEFAULT_SECRET_NAME, DEFAULT_SECRET_NAMESPACE};

/// Default path to the sidecar template
pub const DEFAULT_SIDECAR_CONFIG_FILE: &str = "/etc/integrity-injector/sidecar.yaml";
/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Default health server port
pub const HEALTH_PORT: u16 = 8080;
/// Log filter used when `RUST_LOG` is unset, empty or unparseable
pub const DEFAULT_LOG_FILTER: &str = "integrity_injector=info,kube=info";

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Mutating admission webhook that injects the integrity-monitor sidecar
#[derive(Parser, Clone, Debug)]
#[command(name = "integrity-injector", version, about, long_about = None)]
pub struct Config {
    /// Path to the sidecar template (YAML, minijinja syntax)
    #[arg(long, env = "SIDECAR_CFG_FILE", default_value = DEFAULT_SIDECAR_CONFIG_FILE)]
    pub sidecar_config_file: PathBuf,

    /// Path to the webhook TLS certificate (PEM)
    #[arg(long, env = "TLS_CERT_FILE", default_value = WEBHOOK_CERT_PATH)]
    pub tls_cert_file: PathBuf,

    /// Path to the webhook TLS private key (PEM)
    #[arg(long, env = "TLS_KEY_FILE", default_value = WEBHOOK_KEY_PATH)]
    pub tls_key_file: PathBuf,

    /// Port for the HTTPS admission endpoint
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = WEBHOOK_PORT)]
    pub port: u16,

    /// Port for health probes and metrics
    #[arg(long, env = "HEALTH_PORT", default_value_t = HEALTH_PORT)]
    pub health_port: u16,

    /// Read MinIO credentials for every injection and expose them to the template
    #[arg(long, env = "INJECT_STORAGE_CREDENTIALS")]
    pub inject_storage_credentials: bool,

    /// Namespace of the MinIO credentials Secret
    #[arg(long, env = "CREDENTIALS_NAMESPACE", default_value = DEFAULT_SECRET_NAMESPACE)]
    pub credentials_namespace: String,

    /// Name of the MinIO credentials Secret
    #[arg(long, env = "CREDENTIALS_SECRET", default_value = DEFAULT_SECRET_NAME)]
    pub credentials_secret: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sidecar_config_file: PathBuf::from(DEFAULT_SIDECAR_CONFIG_FILE),
            tls_cert_file: PathBuf::from(WEBHOOK_CERT_PATH),
            tls_key_file: PathBuf::from(WEBHOOK_KEY_PATH),
            port: WEBHOOK_PORT,
            health_port: HEALTH_PORT,
            inject_storage_credentials: false,
            credentials_namespace: DEFAULT_SECRET_NAMESPACE.to_string(),
            credentials_secret: DEFAULT_SECRET_NAME.to_string(),
            log_format: LogFormat::Json,
        }
    }
}

/// Build the tracing filter from a `RUST_LOG` value.
///
/// A usable value replaces the defaults entirely.
pub fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}
