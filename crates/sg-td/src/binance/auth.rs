//! Binance request signing.
//!
//! Binance futures accepts two signing methods:
//!
//! 1. **HMAC-SHA256**: the standard method. The secret key is the string
//!    provided by Binance; the signature is lowercase hex.
//! 2. **Ed25519**: for Ed25519 API keys. The private key is loaded from a
//!    PKCS#8 PEM file; the signature is Base64.
//!
//! Both produce a `signature` parameter appended to the URL-encoded query.

use anyhow::{Context, Result};
use base64::Engine;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signer, SigningKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signing method for authenticated REST requests.
pub enum RequestSigner {
    Hmac { secret: String },
    Ed25519 { key: Box<SigningKey> },
}

impl RequestSigner {
    /// HMAC-SHA256 signer over the API secret.
    pub fn hmac(secret: impl Into<String>) -> Self {
        Self::Hmac { secret: secret.into() }
    }

    /// Ed25519 signer from a PEM-encoded PKCS#8 private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM cannot be parsed or the key is invalid.
    pub fn ed25519_from_pem(private_key_pem: &str) -> Result<Self> {
        let key = SigningKey::from_pkcs8_pem(private_key_pem)
            .context("failed to parse Ed25519 private key from PEM")?;
        Ok(Self::Ed25519 { key: Box::new(key) })
    }

    /// Sign `message` and return the encoded signature.
    pub fn sign(&self, message: &str) -> String {
        match self {
            Self::Hmac { secret } => hmac_sha256_sign(secret, message),
            Self::Ed25519 { key } => {
                let signature = key.sign(message.as_bytes());
                base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
            }
        }
    }

    /// Label for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Hmac { .. } => "hmac-sha256",
            Self::Ed25519 { .. } => "ed25519",
        }
    }
}

/// Compute an HMAC-SHA256 signature and return it as a lowercase hex string.
pub fn hmac_sha256_sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build a URL-encoded, signed query string.
///
/// Joins `params` with `&`, signs the result and appends
/// `&signature=<url-encoded signature>`. `params` must already include
/// `timestamp`.
pub fn build_signed_query(params: &[(&str, &str)], signer: &RequestSigner) -> String {
    let query: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let signature = signer.sign(&query);
    format!("{query}&signature={}", urlencoding::encode(&signature))
}
