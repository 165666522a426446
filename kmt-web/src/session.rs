//! Session tokens and cookies
//!
//! Tokens are HS256 JWTs signed with the configured secret. Expiry is
//! checked against an explicit `now` so it can be exercised in tests.

use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use kmt_common::db::Role;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SESSION_COOKIE_NAME: &str = "fekm_session";

const MAX_TOKEN_LEN: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl From<jsonwebtoken::errors::Error> for SessionError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidAlgorithm => SessionError::UnsupportedAlgorithm,
            ErrorKind::InvalidSignature => SessionError::BadSignature,
            ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::Malformed,
        }
    }
}

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies session tokens and renders the session cookie
#[derive(Clone)]
pub struct SessionSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    secure: bool,
}

impl SessionSigner {
    pub fn new(secret: &str, ttl_days: i64, secure: bool) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is compared in verify_at against the caller's clock
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs: ttl_days.saturating_mul(24 * 60 * 60),
            secure,
        }
    }

    pub fn sign(&self, user_id: &str, email: &str, role: Role) -> Result<String, SessionError> {
        self.sign_at(user_id, email, role, chrono::Utc::now().timestamp())
    }

    pub fn sign_at(
        &self,
        user_id: &str,
        email: &str,
        role: Role,
        now: i64,
    ) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Encoding(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<SessionClaims, SessionError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(SessionError::Malformed);
        }
        let claims =
            jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &self.validation)?
                .claims;

        if claims.sub.is_empty() || claims.email.is_empty() {
            return Err(SessionError::Malformed);
        }
        if claims.exp <= now {
            return Err(SessionError::Expired);
        }

        Ok(claims)
    }

    /// `Set-Cookie` value carrying a fresh token
    pub fn session_cookie(&self, token: &str) -> String {
        self.cookie(token, self.ttl_secs)
    }

    /// `Set-Cookie` value that removes the session cookie
    pub fn clear_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: i64) -> String {
        let mut parts = vec![
            format!("{}={}", SESSION_COOKIE_NAME, value),
            "Path=/".to_string(),
            "HttpOnly".to_string(),
            "SameSite=Lax".to_string(),
            format!("Max-Age={}", max_age),
        ];
        if self.secure {
            parts.push("Secure".to_string());
        }
        parts.join("; ")
    }
}

/// Value of cookie `name` from the request's `Cookie` header(s)
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .find_map(|pair| {
            pair.strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
        })
}
