//! MinIO root credentials read from a cluster Secret.
//!
//! The reader wraps a single `kube::Client` created at startup and fetches the
//! Secret on every call. Nothing is cached.

use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Namespace of the MinIO credentials Secret
pub const DEFAULT_SECRET_NAMESPACE: &str = "minio";
/// Name of the MinIO credentials Secret
pub const DEFAULT_SECRET_NAME: &str = "minio";
/// Data key holding the root user name
pub const ROOT_USER_KEY: &str = "root-user";
/// Data key holding the root password
pub const ROOT_PASSWORD_KEY: &str = "root-password";

/// Upper bound for a single Secret GET
const SECRET_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from reading the credentials Secret
#[derive(Error, Debug)]
pub enum SecretError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The GET did not finish within the timeout
    #[error("timed out after {0:?} reading secret")]
    Timeout(Duration),

    /// The Secret has no `data` section
    #[error("secret has no data")]
    NoData,

    /// A required data key is absent
    #[error("{0} key not found in secret")]
    MissingKey(&'static str),

    /// A data value is not valid UTF-8
    #[error("secret key {key} is not valid UTF-8: {source}")]
    InvalidUtf8 {
        key: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Credentials extracted from the MinIO Secret
#[derive(Clone, Serialize)]
pub struct MinioSecretData {
    pub user_name: String,
    pub user_password: String,
}

impl std::fmt::Debug for MinioSecretData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinioSecretData")
            .field("user_name", &self.user_name)
            .field("user_password", &"<redacted>")
            .finish()
    }
}

/// Reads the MinIO credentials Secret through a shared client
#[derive(Clone)]
pub struct SecretReader {
    secrets: Api<Secret>,
    name: String,
}

impl SecretReader {
    /// Create a reader for `namespace/name`
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            secrets: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }

    /// Fetch the Secret and extract the root credentials
    pub async fn read(&self) -> Result<MinioSecretData, SecretError> {
        let secret = tokio::time::timeout(SECRET_READ_TIMEOUT, self.secrets.get(&self.name))
            .await
            .map_err(|_| SecretError::Timeout(SECRET_READ_TIMEOUT))??;

        let credentials = extract_credentials(&secret)?;
        info!(
            secret = %self.name,
            username = %credentials.user_name,
            "Read MinIO credentials"
        );
        Ok(credentials)
    }
}

/// Pull `root-user` and `root-password` out of a Secret's data
pub fn extract_credentials(secret: &Secret) -> Result<MinioSecretData, SecretError> {
    let data = secret.data.as_ref().ok_or(SecretError::NoData)?;

    let field = |key: &'static str| -> Result<String, SecretError> {
        let bytes = data.get(key).ok_or(SecretError::MissingKey(key))?;
        String::from_utf8(bytes.0.clone()).map_err(|source| SecretError::InvalidUtf8 { key, source })
    };

    Ok(MinioSecretData {
        user_name: field(ROOT_USER_KEY)?,
        user_password: field(ROOT_PASSWORD_KEY)?,
    })
}
