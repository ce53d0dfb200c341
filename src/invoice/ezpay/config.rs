use std::collections::HashMap;
use std::fmt;

use config::{Config, ConfigError, File, FileFormat};
use thiserror::Error;

use super::validation::DEFAULT_API_VERSION;

/// Errors raised while decoding the provider configuration secret.
#[derive(Debug, Error)]
pub enum ProviderConfigError {
    #[error("provider config is not valid UTF-8")]
    NotUtf8,
    #[error("provider config could not be parsed: {0}")]
    Parse(#[from] ConfigError),
    #[error("provider config is missing {0}")]
    MissingField(&'static str),
}

/// ezPay merchant credentials and endpoint.
///
/// Decoded from an env-file (`KEY=value` per line). Keys are matched
/// case-insensitively and may use either the compact spelling (`MerchantID`,
/// `APIVersion`) or snake case (`merchant_id`, `api_version`).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    merchant_id: String,
    url: String,
    api_version: String,
    key: String,
    iv: String,
}

impl ProviderConfig {
    pub fn new(
        merchant_id: impl Into<String>,
        url: impl Into<String>,
        api_version: impl Into<String>,
        key: impl Into<String>,
        iv: impl Into<String>,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            url: url.into(),
            api_version: api_version.into(),
            key: key.into(),
            iv: iv.into(),
        }
    }

    /// Decodes env-file bytes as fetched from the secret store.
    pub fn from_env_file(raw: &[u8]) -> Result<Self, ProviderConfigError> {
        let text = std::str::from_utf8(raw).map_err(|_| ProviderConfigError::NotUtf8)?;
        let entries: HashMap<String, String> = Config::builder()
            .add_source(File::from_str(text, FileFormat::Ini))
            .build()?
            .try_deserialize()?;

        let mut config = ProviderConfig::default();
        for (name, value) in entries {
            let slot = match fold_key(&name).as_str() {
                "merchantid" => &mut config.merchant_id,
                "url" => &mut config.url,
                "apiversion" => &mut config.api_version,
                "key" => &mut config.key,
                "iv" => &mut config.iv,
                _ => continue,
            };
            *slot = value;
        }

        for (name, value) in [
            ("merchant_id", &config.merchant_id),
            ("url", &config.url),
            ("key", &config.key),
            ("iv", &config.iv),
        ] {
            if value.trim().is_empty() {
                return Err(ProviderConfigError::MissingField(name));
            }
        }
        Ok(config)
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Configured API version, or `"1.4"` when none is set.
    pub fn api_version(&self) -> &str {
        if self.api_version.is_empty() {
            DEFAULT_API_VERSION
        } else {
            &self.api_version
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn iv(&self) -> &str {
        &self.iv
    }
}

/// `MerchantID`, `MERCHANT_ID` and `merchant_id` all fold to `merchantid`.
fn fold_key(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("merchant_id", &self.merchant_id)
            .field("url", &self.url)
            .field("api_version", &self.api_version)
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}
