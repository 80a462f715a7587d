//! Connection Authentication
//!
//! Tokens are issued elsewhere; the server only checks HS256 signatures and
//! standard claims. With no secret configured the server runs in guest mode
//! and every connection gets a fresh player id.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::components::PlayerId;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected `iss`. Any issuer when unset.
    pub issuer: Option<String>,
    /// Expected `aud`. Not checked when unset.
    pub audience: Option<String>,
    /// HS256 secret. Guest mode when unset.
    pub secret: Option<String>,
    /// Skip expiry checks (tests only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_ISSUER`, `AUTH_AUDIENCE`, `AUTH_SECRET` and `AUTH_SKIP_EXPIRY`.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            secret: std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty()),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Whether tokens are required.
    pub fn is_guest_mode(&self) -> bool {
        self.secret.is_none()
    }
}

/// Claims read from a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user id at the issuer.
    pub sub: String,
    /// Expiry (unix seconds). 0 means none.
    #[serde(default)]
    pub exp: u64,
    /// Issued at.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Stable player id for this subject.
    pub fn player_id(&self) -> PlayerId {
        let hash = Sha256::new()
            .chain_update(b"rps-arena-player:")
            .chain_update(self.sub.as_bytes())
            .finalize();
        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        PlayerId::new(id)
    }
}

/// Who a connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// Player id used for sessions and command ownership.
    pub player_id: PlayerId,
    /// No token was checked.
    pub guest: bool,
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token required but none given.
    #[error("token required")]
    MissingToken,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Resolve a connection's identity.
///
/// Guest mode ignores any token and assigns a fresh id.
pub fn authenticate(token: Option<&str>, config: &AuthConfig) -> Result<Identity, AuthError> {
    let Some(secret) = config.secret.as_deref() else {
        return Ok(Identity { player_id: PlayerId::generate(), guest: true });
    };
    let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
    let claims = validate_token(token, secret, config)?;
    Ok(Identity { player_id: claims.player_id(), guest: false })
}

/// Check an HS256 token and return its claims.
pub fn validate_token(token: &str, secret: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = HashSet::new();
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match config.audience {
        Some(ref audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    let claims = decode::<TokenClaims>(token, &key, &validation)
        .map_err(map_jwt_error)?
        .claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // jsonwebtoken skips exp when the claim is absent from required_spec_claims
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
