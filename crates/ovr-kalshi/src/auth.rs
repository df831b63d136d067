//! Request signing for the Kalshi trade API.
//!
//! Every REST call and the WebSocket handshake carry three headers:
//! `KALSHI-ACCESS-KEY`, `KALSHI-ACCESS-TIMESTAMP` (ms since epoch) and
//! `KALSHI-ACCESS-SIGNATURE` (base64). The signature covers
//! `timestamp_ms || METHOD || path` with the query string stripped.
//!
//! The PEM key loaded at startup selects the algorithm: Ed25519 keys sign
//! directly, RSA keys sign RSA-PSS with SHA-256 (not PKCS#1 v1.5).

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::pkcs8::DecodePrivateKey as _;
use ed25519_dalek::Signer as _;
use rsa::pkcs1::DecodeRsaPrivateKey as _;
use rsa::pkcs8::DecodePrivateKey as _;
use rsa::Pss;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

/// Errors raised while loading the key or signing a request.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read private key {path}: {source}")]
    KeyRead {
        path: String,
        source: std::io::Error,
    },

    #[error("private key is neither Ed25519 nor RSA PEM: {0}")]
    KeyParse(String),

    #[error("signing failed: {0}")]
    Sign(String),
}

enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    Rsa(rsa::RsaPrivateKey),
}

impl SigningKey {
    fn kind(&self) -> &'static str {
        match self {
            SigningKey::Ed25519(_) => "ed25519",
            SigningKey::Rsa(_) => "rsa-pss",
        }
    }
}

/// Signed-header generator, loaded once at bootstrap.
///
/// Signing is CPU-bound but cheap (well under a millisecond), so it stays
/// synchronous and can run inline on the order path.
pub struct KalshiAuth {
    api_key_id: String,
    key: SigningKey,
}

impl KalshiAuth {
    /// Load a PEM private key from disk and detect its algorithm.
    pub fn from_pem_file(api_key_id: impl Into<String>, path: &Path) -> Result<Self, AuthError> {
        let pem = std::fs::read_to_string(path).map_err(|source| AuthError::KeyRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(api_key_id, &pem)
    }

    /// Parse a PEM private key. Tries Ed25519 PKCS#8, RSA PKCS#8, RSA PKCS#1.
    pub fn from_pem(api_key_id: impl Into<String>, pem: &str) -> Result<Self, AuthError> {
        let key = if let Ok(k) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
            SigningKey::Ed25519(k)
        } else if let Ok(k) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
            SigningKey::Rsa(k)
        } else {
            match rsa::RsaPrivateKey::from_pkcs1_pem(pem) {
                Ok(k) => SigningKey::Rsa(k),
                Err(e) => return Err(AuthError::KeyParse(e.to_string())),
            }
        };

        let auth = Self {
            api_key_id: api_key_id.into(),
            key,
        };
        info!(key_type = auth.key.kind(), "exchange auth initialized");
        Ok(auth)
    }

    /// Build signed headers for one request.
    ///
    /// `path` must be the full URL path including the API prefix
    /// (e.g. `/trade-api/v2/portfolio/orders`); any query string is stripped
    /// before signing, matching the exchange's verification.
    pub fn signed_headers(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis().to_string();
        let sign_path = path.split('?').next().unwrap_or(path);
        let message = format!("{timestamp_ms}{}{sign_path}", method.to_uppercase());
        let signature = self.sign(message.as_bytes())?;

        Ok(vec![
            ("KALSHI-ACCESS-KEY", self.api_key_id.clone()),
            ("KALSHI-ACCESS-TIMESTAMP", timestamp_ms),
            ("KALSHI-ACCESS-SIGNATURE", signature),
        ])
    }

    fn sign(&self, message: &[u8]) -> Result<String, AuthError> {
        let sig = match &self.key {
            SigningKey::Ed25519(k) => k.sign(message).to_bytes().to_vec(),
            SigningKey::Rsa(k) => {
                let digest = Sha256::digest(message);
                k.sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &digest)
                    .map_err(|e| AuthError::Sign(e.to_string()))?
            }
        };
        Ok(BASE64.encode(sig))
    }
}

impl std::fmt::Debug for KalshiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiAuth")
            .field("api_key_id", &self.api_key_id)
            .field("key_type", &self.key.kind())
            .finish()
    }
}
