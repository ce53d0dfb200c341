//! Invoice providers.
//!
//! Every provider follows the same two-step contract: [`Provider::validate`]
//! turns the pending [`RequestPayload`] into the provider's canonical request,
//! then [`Provider::create`] submits it and hands back the raw response body.
//! Handlers only talk to `dyn Provider`, so adding a provider means adding a
//! module and a constructor here.

pub mod ezpay;
pub mod payload;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use ezpay::{config::ProviderConfig, InvoiceClient};
pub use payload::RequestPayload;

use ezpay::{
    crypto::{CipherError, PaddingError},
    validation::ValidationError,
};

/// Failures while validating or submitting an invoice.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Padding(#[from] PaddingError),

    #[error("error creating new cipher when create invoice: {0}")]
    CipherSetup(String),

    #[error("requesting ezPay API error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Non-200 answer; the body is kept so callers can still inspect it.
    #[error("httpCode:{status}")]
    ProviderStatus { status: u16, body: Bytes },

    #[error("invoice payload has not been validated")]
    NotValidated,
}

impl From<CipherError> for InvoiceError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Padding(padding) => InvoiceError::Padding(padding),
            other => InvoiceError::CipherSetup(other.to_string()),
        }
    }
}

impl InvoiceError {
    /// Provider response body, when the provider answered at all.
    pub fn response_body(&self) -> Option<&Bytes> {
        match self {
            InvoiceError::ProviderStatus { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// An e-invoicing provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Normalizes the pending payload in place. Leaves it untouched on error.
    fn validate(&mut self) -> Result<(), InvoiceError>;

    /// Submits the validated request and returns the raw response body.
    async fn create(&self) -> Result<Bytes, InvoiceError>;
}

/// Builds the ezPay provider for one request.
pub fn new_ezpay_provider(
    config: ProviderConfig,
    http: reqwest::Client,
    payload: RequestPayload,
) -> Box<dyn Provider> {
    Box::new(InvoiceClient::new(config, http, payload))
}
