#![allow(dead_code)]

use std::sync::Arc;

use aes::Aes256;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use bytes::Bytes;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use ezpay_invoice::{app, config::AppConfig, secrets::SecretStore, AppState};
use std::collections::HashMap;
use tower::ServiceExt;

pub const MERCHANT_ID: &str = "34818970";
pub const KEY: &str = "0123456789abcdef0123456789abcdef";
pub const IV: &str = "fedcba9876543210";
pub const ISSUE_PATH: &str = "/Api/invoice_issue";

/// Env-file secret pointing the provider at `base_url`.
pub fn provider_env_file(base_url: &str) -> Bytes {
    Bytes::from(format!(
        "# ezPay test merchant\nMerchantID={MERCHANT_ID}\nURL={base_url}{ISSUE_PATH}\nAPIVersion=1.5\nKey={KEY}\nIV={IV}\n"
    ))
}

/// Router under test, backed by the given secret store.
pub struct TestApp {
    router: Router,
}

impl TestApp {
    pub fn with_store(secrets: Arc<dyn SecretStore>) -> Self {
        let state = AppState::with_secret_store(AppConfig::default(), secrets)
            .expect("failed to build app state");
        Self { router: app(state) }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: impl Into<Body>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let request = builder.body(body.into()).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn post_json(&self, body: serde_json::Value) -> Response {
        self.request(
            Method::POST,
            "/",
            Some("application/json"),
            serde_json::to_vec(&body).expect("failed to serialize json request body"),
        )
        .await
    }
}

pub async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body")
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("response body is not JSON")
}

/// Decrypts the `PostData_` field of a form body sent to the provider and
/// returns the inner form fields.
pub fn decrypt_post_data(form_body: &[u8]) -> (HashMap<String, String>, HashMap<String, String>) {
    let outer: HashMap<String, String> = url::form_urlencoded::parse(form_body)
        .into_owned()
        .collect();
    let ciphertext = hex::decode(&outer["PostData_"]).expect("PostData_ is not hex");
    let plaintext = cbc::Decryptor::<Aes256>::new_from_slices(KEY.as_bytes(), IV.as_bytes())
        .expect("bad test key")
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .expect("ciphertext does not decrypt");
    let inner = url::form_urlencoded::parse(&plaintext)
        .into_owned()
        .collect();
    (outer, inner)
}
