//! Retrieval of the raw provider configuration secret.
//!
//! Production reads Google Secret Manager with the instance's service account;
//! local runs can point at a file instead.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal";
const DEFAULT_SECRET_MANAGER_URL: &str = "https://secretmanager.googleapis.com";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret location is incomplete: {0} is empty")]
    IncompleteLocation(&'static str),

    #[error("failed to setup client: {0}")]
    Token(String),

    #[error("failed to access secret version: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to access secret version {name}: httpCode:{status}")]
    Status { name: String, status: u16 },

    #[error("secret payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to read secret file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identifies one version of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretLocation {
    pub project_id: String,
    pub secret_id: String,
    pub version: String,
}

impl SecretLocation {
    pub fn new(
        project_id: impl Into<String>,
        secret_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            secret_id: secret_id.into(),
            version: version.into(),
        }
    }

    /// `projects/{project}/secrets/{secret}/versions/{version}`
    pub fn resource_name(&self) -> Result<String, SecretError> {
        if self.project_id.trim().is_empty() {
            return Err(SecretError::IncompleteLocation("project_id"));
        }
        if self.secret_id.trim().is_empty() {
            return Err(SecretError::IncompleteLocation("secret_id"));
        }
        let version = if self.version.trim().is_empty() {
            "latest"
        } else {
            self.version.as_str()
        };
        Ok(format!(
            "projects/{}/secrets/{}/versions/{}",
            self.project_id, self.secret_id, version
        ))
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, location: &SecretLocation) -> Result<Bytes, SecretError>;
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

/// Google Secret Manager over its REST API.
#[derive(Debug, Clone)]
pub struct GcpSecretManager {
    http: reqwest::Client,
    metadata_url: String,
    api_url: String,
}

impl GcpSecretManager {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_endpoints(http, DEFAULT_METADATA_URL, DEFAULT_SECRET_MANAGER_URL)
    }

    pub fn with_endpoints(
        http: reqwest::Client,
        metadata_url: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            metadata_url: metadata_url.into().trim_end_matches('/').to_string(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn access_token(&self) -> Result<String, SecretError> {
        let response = self
            .http
            .get(format!("{}{}", self.metadata_url, TOKEN_PATH))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| SecretError::Token(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SecretError::Token(format!(
                "metadata server returned httpCode:{}",
                response.status().as_u16()
            )));
        }

        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| SecretError::Token(e.to_string()))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SecretStore for GcpSecretManager {
    #[instrument(skip(self))]
    async fn fetch(&self, location: &SecretLocation) -> Result<Bytes, SecretError> {
        let name = location.resource_name()?;
        let token = self.access_token().await?;

        let response = self
            .http
            .get(format!("{}/v1/{}:access", self.api_url, name))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SecretError::Status {
                name,
                status: response.status().as_u16(),
            });
        }

        let secret: AccessSecretVersionResponse = response.json().await?;
        let data = general_purpose::STANDARD.decode(secret.payload.data)?;
        debug!(bytes = data.len(), "secret version fetched");
        Ok(Bytes::from(data))
    }
}

/// Reads the secret from a local file, ignoring the location.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn fetch(&self, _location: &SecretLocation) -> Result<Bytes, SecretError> {
        tokio::fs::read(&self.path)
            .await
            .map(Bytes::from)
            .map_err(|source| SecretError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Fixed secret bytes.
#[derive(Debug, Clone)]
pub struct StaticSecretStore(pub Bytes);

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn fetch(&self, _location: &SecretLocation) -> Result<Bytes, SecretError> {
        Ok(self.0.clone())
    }
}
