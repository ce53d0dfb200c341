use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::{
    errors::ServiceError,
    invoice::{new_ezpay_provider, ProviderConfig, RequestPayload},
    AppState,
};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Creates an invoice from a JSON request body.
///
/// Preflight `OPTIONS` requests are answered before anything else is
/// checked. Every other method except `POST` is refused. The provider
/// configuration is fetched on each call, so rotated secrets take effect
/// without a restart.
#[instrument(skip_all, fields(method = %method))]
pub async fn create_invoice(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    if method == Method::OPTIONS {
        return Ok(preflight_response());
    }
    if method != Method::POST {
        return Err(ServiceError::MethodForbidden(method.to_string()));
    }

    let provider_config = load_provider_config(&state).await?;
    ensure_json_content_type(&headers)?;

    let payload = RequestPayload::from_json(&body)?;
    debug!(merchant_order_no = ?payload.merchant_order_no, "invoice payload decoded");

    let mut provider = new_ezpay_provider(provider_config, state.http.clone(), payload);
    provider.validate()?;
    let provider_body = provider.create().await?;

    info!("invoice created");
    json_response(&provider_body)
}

async fn load_provider_config(state: &AppState) -> Result<ProviderConfig, ServiceError> {
    let raw = state
        .secrets
        .fetch(&state.config.secret_location())
        .await?;
    Ok(ProviderConfig::from_env_file(&raw)?)
}

/// Accepts `application/json` with or without parameters such as charset.
fn ensure_json_content_type(headers: &HeaderMap) -> Result<(), ServiceError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();

    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
        Ok(())
    } else {
        Err(ServiceError::UnsupportedContentType(content_type))
    }
}

fn preflight_response() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (header::ACCESS_CONTROL_MAX_AGE, "3600"),
        ],
    )
        .into_response()
}

/// Re-encodes the provider body as JSON. Bodies that are not JSON themselves
/// are returned as a JSON string.
fn json_response(provider_body: &[u8]) -> Result<Response, ServiceError> {
    let value = serde_json::from_slice::<Value>(provider_body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(provider_body).into_owned()));
    let encoded =
        serde_json::to_vec(&value).map_err(|e| ServiceError::ResponseEncode(e.to_string()))?;

    let mut response = (StatusCode::OK, encoded).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(JSON_CONTENT_TYPE),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    Ok(response)
}
