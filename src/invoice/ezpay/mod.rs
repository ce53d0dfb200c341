//! ezPay e-invoice issuing client.

pub mod config;
pub mod crypto;
pub mod validation;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::{info, instrument, warn};

use self::{
    config::ProviderConfig,
    crypto::EncryptedEnvelope,
    validation::{normalize, CanonicalInvoiceRequest},
};
use super::{payload::RequestPayload, InvoiceError, Provider};

#[derive(Debug, Clone)]
enum PayloadState {
    Pending(RequestPayload),
    Canonical(CanonicalInvoiceRequest),
}

/// Issues invoices through ezPay's `invoice_issue` API.
#[derive(Debug, Clone)]
pub struct InvoiceClient {
    config: ProviderConfig,
    http: reqwest::Client,
    payload: PayloadState,
}

impl InvoiceClient {
    pub fn new(config: ProviderConfig, http: reqwest::Client, payload: RequestPayload) -> Self {
        Self {
            config,
            http,
            payload: PayloadState::Pending(payload),
        }
    }

    /// Canonical request, once [`Provider::validate`] has succeeded.
    pub fn canonical(&self) -> Option<&CanonicalInvoiceRequest> {
        match &self.payload {
            PayloadState::Canonical(request) => Some(request),
            PayloadState::Pending(_) => None,
        }
    }

    /// Encrypts `request` and posts it to the configured endpoint.
    ///
    /// The full body is read whatever the status; anything but 200 comes back
    /// as [`InvoiceError::ProviderStatus`] carrying that body.
    #[instrument(
        skip(self, request),
        fields(merchant_order_no = %request.merchant_order_no, url = %self.config.url())
    )]
    pub async fn submit(&self, request: &CanonicalInvoiceRequest) -> Result<Bytes, InvoiceError> {
        let envelope = EncryptedEnvelope::seal(request, &self.config)?;

        let response = self
            .http
            .post(self.config.url())
            .form(&envelope.form_fields())
            .send()
            .await
            .map_err(InvoiceError::Transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(InvoiceError::Transport)?;

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "ezPay rejected invoice request");
            return Err(InvoiceError::ProviderStatus {
                status: status.as_u16(),
                body,
            });
        }

        info!(bytes = body.len(), "ezPay invoice request accepted");
        Ok(body)
    }
}

#[async_trait]
impl Provider for InvoiceClient {
    fn validate(&mut self) -> Result<(), InvoiceError> {
        if let PayloadState::Pending(payload) = &self.payload {
            let request = normalize(payload, self.config.api_version())?;
            self.payload = PayloadState::Canonical(request);
        }
        Ok(())
    }

    async fn create(&self) -> Result<Bytes, InvoiceError> {
        match &self.payload {
            PayloadState::Canonical(request) => self.submit(request).await,
            PayloadState::Pending(_) => Err(InvoiceError::NotValidated),
        }
    }
}
