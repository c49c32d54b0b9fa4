//! HS256 session tokens issued by the login service.
//!
//! Compact JWS: `base64url(header).base64url(claims).base64url(hmac)`.
//! Verification is local; no round trip to the login service.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Resolves a presented session credential to a local user id.
pub trait SessionAuthenticator: Send + Sync {
    /// `None` when the credential is missing, malformed, forged, or expired.
    fn validate(&self, credential: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Local user id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// Signs and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct SessionTokenVerifier {
    secret: Vec<u8>,
}

impl SessionTokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.len() < 16 {
            return Err(anyhow!(
                "Session secret must be at least 16 bytes, got {}",
                secret.len()
            ));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| anyhow!("Invalid HMAC key: {}", e))
    }

    /// Issue a token for `local_user_id` valid for `ttl`.
    pub fn issue(&self, local_user_id: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: local_user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        let header = Header {
            alg: "HS256".to_string(),
            typ: Some("JWT".to_string()),
        };

        let signing_input = format!(
            "{}.{}",
            B64URL.encode(serde_json::to_vec(&header)?),
            B64URL.encode(serde_json::to_vec(&claims)?)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = B64URL.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let header: Header = serde_json::from_slice(&B64URL.decode(header_b64).ok()?).ok()?;
        if header.alg != "HS256" {
            debug!(alg = %header.alg, "Rejecting session token with unsupported alg");
            return None;
        }

        let signature = B64URL.decode(sig_b64).ok()?;
        let mut mac = self.mac().ok()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        // Constant-time comparison
        mac.verify_slice(&signature).ok()?;

        let claims: SessionClaims =
            serde_json::from_slice(&B64URL.decode(claims_b64).ok()?).ok()?;
        if claims.exp <= Utc::now().timestamp() || claims.sub.is_empty() {
            return None;
        }

        Some(claims)
    }
}

impl SessionAuthenticator for SessionTokenVerifier {
    fn validate(&self, credential: &str) -> Option<String> {
        self.verify(credential).map(|claims| claims.sub)
    }
}
