//! Access token issuance
//!
//! Production tokens are minted by a trusted external signer; the session
//! layer only needs something that turns `(room, user)` into a token string.

use anyhow::{ensure, Result};
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Issues room access tokens
#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, room_name: &str, user_id: &str) -> Result<String>;
}

/// Claims carried by a development token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub room: String,
    pub iat: i64,
    pub exp: i64,
}

/// Unsigned token issuer for local and demo use
///
/// Encodes the claims as base64url JSON. Backends that verify signatures will
/// reject these; the loopback backend accepts any non-empty token.
#[derive(Debug, Clone)]
pub struct DevTokenIssuer {
    issuer: String,
    ttl: Duration,
}

impl DevTokenIssuer {
    pub fn new(issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Decode a token produced by this issuer
    pub fn decode(token: &str) -> Result<TokenClaims> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(token)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Default for DevTokenIssuer {
    fn default() -> Self {
        Self::new("lark-voice", Duration::from_secs(6 * 60 * 60))
    }
}

#[async_trait::async_trait]
impl TokenIssuer for DevTokenIssuer {
    async fn issue(&self, room_name: &str, user_id: &str) -> Result<String> {
        ensure!(!room_name.is_empty(), "room name must not be empty");
        ensure!(!user_id.is_empty(), "user id must not be empty");

        let iat = Utc::now().timestamp();
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            room: room_name.to_string(),
            iat,
            exp: iat + self.ttl.as_secs() as i64,
        };

        let payload = serde_json::to_vec(&claims)?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload))
    }
}
