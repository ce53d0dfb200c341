use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env as std_env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::secrets::{FileSecretStore, GcpSecretManager, SecretLocation, SecretStore};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SECRET_VERSION: &str = "latest";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "MM";

/// Service configuration.
///
/// Only says where the provider secret lives and how to serve; the provider
/// credentials themselves are fetched per request (see [`crate::secrets`]).
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Cloud project holding the provider config secret (`MM_PROJECT_ID`)
    #[serde(default)]
    pub project_id: String,

    /// Secret id of the provider config (`MM_CONFIG_SECRET`)
    #[serde(default)]
    pub config_secret: String,

    /// Secret version (`MM_CONFIG_SECRET_VERSION`)
    #[serde(default = "default_secret_version")]
    pub config_secret_version: String,

    /// Upper bound for one call to the invoice provider, in seconds
    #[serde(default = "default_provider_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub provider_timeout_secs: u64,

    /// Local env-file used instead of Secret Manager
    #[serde(default)]
    pub provider_config_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            project_id: String::new(),
            config_secret: String::new(),
            config_secret_version: default_secret_version(),
            provider_timeout_secs: default_provider_timeout_secs(),
            provider_config_file: None,
        }
    }
}

impl AppConfig {
    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn secret_location(&self) -> SecretLocation {
        SecretLocation::new(
            self.project_id.clone(),
            self.config_secret.clone(),
            self.config_secret_version.clone(),
        )
    }

    /// Secret store matching this configuration: the local file when one is
    /// configured, Secret Manager otherwise.
    pub fn secret_store(&self, http: reqwest::Client) -> Arc<dyn SecretStore> {
        match &self.provider_config_file {
            Some(path) => {
                info!("Reading provider config from local file {}", path.display());
                Arc::new(FileSecretStore::new(path.clone()))
            }
            None => Arc::new(GcpSecretManager::new(http)),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_secret_version() -> String {
    DEFAULT_SECRET_VERSION.to_string()
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("ezpay_invoice={},tower_http=info", level);
    let filter_directive = std_env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(filter_directive)
            .with_file(true)
            .with_line_number(true)
            .json()
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads service configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml), when present
/// 3. Environment variables (MM_*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
}

fn load_config_from(environment: Environment) -> Result<AppConfig, AppConfigError> {
    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("host", DEFAULT_HOST)?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("config_secret_version", DEFAULT_SECRET_VERSION)?
        .set_default("provider_timeout_secs", DEFAULT_PROVIDER_TIMEOUT_SECS as i64)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(environment)
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
