//! Request body validation
//!
//! [`ValidJson`] deserializes the body (any content type, like a plain
//! `req.json()`) and runs [`Validate`]. Failures come back as 400 with
//! `{"error": {"formErrors": [...], "fieldErrors": {"field": [...]}}}`.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

use crate::error::ApiError;

/// Collected validation failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrors {
    pub form_errors: Vec<String>,
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error about the body as a whole
    pub fn form(message: impl Into<String>) -> Self {
        Self {
            form_errors: vec![message.into()],
            field_errors: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.form_errors.is_empty() && self.field_errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// String must be non-empty
    pub fn require(&mut self, field: &str, value: &str) {
        if value.is_empty() {
            self.add(field, "Required");
        }
    }

    /// String length (in characters) must be within `min..=max`
    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) {
        let len = value.chars().count();
        if len < min {
            self.add(field, format!("Must contain at least {} character(s)", min));
        } else if len > max {
            self.add(field, format!("Must contain at most {} character(s)", max));
        }
    }

    pub fn non_negative(&mut self, field: &str, value: i64) {
        if value < 0 {
            self.add(field, "Must be greater than or equal to 0");
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if !is_valid_email(value) {
            self.add(field, "Invalid email");
        }
    }
}

/// Types that can check their own invariants after deserialization
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// JSON body extractor that validates before the handler runs
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        parse_valid(&bytes).map(ValidJson)
    }
}

/// Deserialize a JSON body and validate it
///
/// For handlers that must do work (e.g. rate limiting) before looking at the
/// body; everything else uses [`ValidJson`].
pub fn parse_valid<T>(bytes: &[u8]) -> Result<T, ApiError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(bytes)
        .map_err(|e| ApiError::Validation(ValidationErrors::form(format!("Invalid body: {}", e))))?;

    value.validate().map_err(ApiError::Validation)?;

    Ok(value)
}

/// Minimal structural email check: `local@domain.tld`, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

/// Treat `?beltId=` the same as an absent parameter
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
