//! Password hashing (bcrypt), run off the async executor

use crate::error::{ApiError, ApiResult};

/// Hash a password with the configured bcrypt cost
pub async fn hash_password(password: String, cost: u32) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("bcrypt: {}", e)))
}

/// Check a password against a stored hash. Unparseable hashes (e.g. the
/// placeholder left on deleted accounts) never match.
pub async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| ApiError::Internal(format!("verify task failed: {}", e)))
}
