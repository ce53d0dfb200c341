//! `PostData_` encryption: PKCS#7 padding followed by AES-CBC, hex encoded.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

use super::config::ProviderConfig;
use super::validation::CanonicalInvoiceRequest;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

const AES_128_KEY_LENGTH: usize = 16;
const AES_192_KEY_LENGTH: usize = 24;
const AES_256_KEY_LENGTH: usize = 32;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaddingError {
    #[error("invalid blocksize")]
    InvalidBlockSize,
    #[error("invalid PKCS7 data (empty or not padded)")]
    InvalidData,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid AES key length {0}: expected 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),
    #[error("invalid IV length {0}: expected 16 bytes")]
    InvalidIvLength(usize),
    #[error(transparent)]
    Padding(#[from] PaddingError),
}

/// Pads `data` to a multiple of `block_size`; every pad byte holds the pad length.
///
/// A full block of padding is appended when `data` is already aligned.
pub fn pkcs7_padding(data: &[u8], block_size: usize) -> Result<Vec<u8>, PaddingError> {
    if block_size == 0 || block_size > u8::MAX as usize {
        return Err(PaddingError::InvalidBlockSize);
    }
    if data.is_empty() {
        return Err(PaddingError::InvalidData);
    }
    let pad = block_size - data.len() % block_size;
    let mut padded = Vec::with_capacity(data.len() + pad);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad, pad as u8);
    Ok(padded)
}

/// Encrypts `plaintext` with AES-CBC; the key length selects AES-128/192/256.
pub fn encrypt_cbc(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    if !matches!(
        key.len(),
        AES_128_KEY_LENGTH | AES_192_KEY_LENGTH | AES_256_KEY_LENGTH
    ) {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }
    if iv.len() != BLOCK_SIZE {
        return Err(CipherError::InvalidIvLength(iv.len()));
    }

    let padded = pkcs7_padding(plaintext, BLOCK_SIZE)?;
    let invalid_iv = |_| CipherError::InvalidIvLength(iv.len());

    let ciphertext = match key.len() {
        AES_128_KEY_LENGTH => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_iv)?
            .encrypt_padded_vec_mut::<NoPadding>(&padded),
        AES_192_KEY_LENGTH => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_iv)?
            .encrypt_padded_vec_mut::<NoPadding>(&padded),
        _ => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_iv)?
            .encrypt_padded_vec_mut::<NoPadding>(&padded),
    };
    Ok(ciphertext)
}

/// Outer form body posted to ezPay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub merchant_id: String,
    /// Hex-encoded ciphertext of the URL-encoded canonical request.
    pub post_data: String,
}

impl EncryptedEnvelope {
    pub fn seal(
        request: &CanonicalInvoiceRequest,
        config: &ProviderConfig,
    ) -> Result<Self, CipherError> {
        let ciphertext = encrypt_cbc(
            request.encode_form().as_bytes(),
            config.key().as_bytes(),
            config.iv().as_bytes(),
        )?;
        Ok(Self {
            merchant_id: config.merchant_id().to_string(),
            post_data: hex::encode(ciphertext),
        })
    }

    pub fn form_fields(&self) -> [(&'static str, &str); 2] {
        [
            ("MerchantID_", self.merchant_id.as_str()),
            ("PostData_", self.post_data.as_str()),
        ]
    }
}
