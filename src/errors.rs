use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::invoice::{ezpay::config::ProviderConfigError, InvoiceError};
use crate::secrets::SecretError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp of the failure
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("loading config error: {0}")]
    ConfigLoad(String),

    #[error("decoding payload error: {0}")]
    PayloadDecode(#[from] serde_json::Error),

    #[error("content type({0}) is not acceptable")]
    UnsupportedContentType(String),

    #[error("method {0} is forbidden")]
    MethodForbidden(String),

    #[error("invoice creation error: {0}")]
    InvoiceCreation(#[from] InvoiceError),

    #[error("encoding response error: {0}")]
    ResponseEncode(String),
}

impl From<SecretError> for ServiceError {
    fn from(err: SecretError) -> Self {
        ServiceError::ConfigLoad(err.to_string())
    }
}

impl From<ProviderConfigError> for ServiceError {
    fn from(err: ProviderConfigError) -> Self {
        ServiceError::ConfigLoad(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigLoad(_) | Self::ResponseEncode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PayloadDecode(_) | Self::UnsupportedContentType(_) | Self::InvoiceCreation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MethodForbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Server-side failures return generic messages so secret locations and
    /// provider settings never reach the caller.
    pub fn response_message(&self) -> String {
        match self {
            Self::ConfigLoad(_) => "loading config error".to_string(),
            Self::ResponseEncode(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
