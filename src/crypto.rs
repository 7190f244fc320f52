//! Access token encryption using AES-256-GCM
//!
//! Ciphertexts are laid out as `0x01 | nonce(12) | ciphertext+tag` and are bound
//! to the owning integration through additional authenticated data. Payloads
//! without the version marker are treated as legacy plaintext.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::integration::Model as IntegrationModel;

const VERSION_ENCRYPTED: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;
const MIN_ENCRYPTED_LEN: usize = HEADER_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// 32-byte AES key wiped from memory on drop.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Encrypt `plaintext` under `key`, binding it to `aad`.
pub fn encrypt_bytes(key: &CryptoKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = key
        .cipher()
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.push(VERSION_ENCRYPTED);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a payload produced by [`encrypt_bytes`]; legacy plaintext is returned as-is.
pub fn decrypt_bytes(key: &CryptoKey, aad: &[u8], payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let Some(&version) = payload.first() else {
        return Err(CryptoError::EmptyCiphertext);
    };
    if version != VERSION_ENCRYPTED {
        return Ok(payload.to_vec());
    }
    if payload.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&payload[1..HEADER_LEN]);
    key.cipher()
        .decrypt(
            nonce,
            Payload {
                msg: &payload[HEADER_LEN..],
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Whether `payload` carries the encrypted-format version marker.
pub fn is_encrypted_payload(payload: &[u8]) -> bool {
    payload.len() >= MIN_ENCRYPTED_LEN && payload[0] == VERSION_ENCRYPTED
}

/// Encrypts an access token for storage under the given AAD.
pub fn encrypt_token(key: &CryptoKey, aad: &str, token: &str) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, aad.as_bytes(), token.as_bytes())
}

/// Returns the plaintext access token of an integration.
pub fn decrypt_integration_token(
    key: &CryptoKey,
    integration: &IntegrationModel,
) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(
        key,
        integration.token_aad().as_bytes(),
        &integration.access_token_ciphertext,
    )?;
    String::from_utf8(bytes).map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
}
