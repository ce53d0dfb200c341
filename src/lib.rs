//! ezPay invoice function
//!
//! HTTP entry point that validates invoice requests against ezPay's rules,
//! encrypts them and forwards them to the ezPay e-invoice API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod handlers;
pub mod invoice;
pub mod secrets;
pub mod tracing;

use std::sync::Arc;

use axum::{middleware, Router};

use crate::secrets::SecretStore;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,
    pub secrets: Arc<dyn SecretStore>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Builds the state with the secret store the configuration selects.
    pub fn new(config: config::AppConfig) -> Result<Self, reqwest::Error> {
        let http = http_client(&config)?;
        let secrets = config.secret_store(http.clone());
        Ok(Self {
            config: Arc::new(config),
            secrets,
            http,
        })
    }

    pub fn with_secret_store(
        config: config::AppConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, reqwest::Error> {
        let http = http_client(&config)?;
        Ok(Self {
            config: Arc::new(config),
            secrets,
            http,
        })
    }
}

fn http_client(config: &config::AppConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(config.provider_timeout())
        .build()
}

/// Full application router with tracing layers applied.
pub fn app(state: AppState) -> Router {
    handlers::routes()
        .layer(tracing::configure_http_tracing())
        .layer(middleware::from_fn(tracing::request_id_middleware))
        .with_state(state)
}
