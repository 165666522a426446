//! Authentication: register, login, logout, session gate
//!
//! The session cookie carries a signed token; the user behind it is reloaded
//! from the database on every request, so deleted accounts and role changes
//! take effect immediately.

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use kmt_common::db::{Role, User};

use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::password::{hash_password, verify_password};
use crate::rate_limit::client_ip;
use crate::session::{cookie_value, SESSION_COOKIE_NAME};
use crate::validation::{parse_valid, Validate, ValidationErrors};
use crate::AppState;

/// Authenticated user, inserted into request extensions by [`require_session`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.email("email", &normalize_email(&self.email));
        errors.length("password", &self.password, 8, 200);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.email("email", &normalize_email(&self.email));
        errors.length("password", &self.password, 1, 200);
        errors.into_result()
    }
}

/// Emails are compared trimmed and lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let ip = client_ip(&headers);
    if !state.rate_limits.allow_register(&ip) {
        warn!(ip = %ip, "Registration rate limit hit");
        return Err(ApiError::TooManyRequests);
    }

    let request: RegisterRequest = parse_valid(&body)?;
    let email = normalize_email(&request.email);

    if find_live_user_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::Conflict("Email already in use".to_string()));
    }

    let password_hash = hash_password(request.password, state.bcrypt_cost).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, password_hash, role, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, email, password_hash, role, created_at, last_login, deleted_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&email)
    .bind(&password_hash)
    .bind(Role::User)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict("Email already in use".to_string())
        } else {
            ApiError::Database(e)
        }
    })?;

    info!(user_id = %user.id, "User registered");
    session_response(&state, user.into())
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let ip = client_ip(&headers);
    if !state.rate_limits.allow_login(&ip) {
        warn!(ip = %ip, "Login rate limit hit");
        return Err(ApiError::TooManyRequests);
    }

    let request: LoginRequest = parse_valid(&body)?;
    let email = normalize_email(&request.email);

    let user = find_live_user_by_email(&state.db, &email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(request.password, user.password_hash.clone()).await? {
        return Err(ApiError::InvalidCredentials);
    }

    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    info!(user_id = %user.id, "User logged in");
    session_response(&state, user.into())
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, state.sessions.clear_cookie())],
        Json(json!({ "ok": true })),
    )
}

/// GET /api/auth/me
///
/// Public: `{"user": null}` without a valid session.
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<serde_json::Value>> {
    let user = current_user(&state, &headers).await?;
    Ok(Json(json!({ "user": user })))
}

fn session_response(state: &AppState, user: CurrentUser) -> ApiResult<Response> {
    let token = state
        .sessions
        .sign(&user.id, &user.email, user.role)
        .map_err(|e| ApiError::Internal(format!("session signing failed: {}", e)))?;

    Ok((
        [(header::SET_COOKIE, state.sessions.session_cookie(&token))],
        Json(json!({ "ok": true, "user": user })),
    )
        .into_response())
}

async fn find_live_user_by_email(db: &SqlitePool, email: &str) -> ApiResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, password_hash, role, created_at, last_login, deleted_at
        FROM users
        WHERE email = ? AND deleted_at IS NULL
        "#,
    )
    .bind(email)
    .fetch_optional(db)
    .await?;

    Ok(user)
}

/// Resolve the session cookie to a live user
pub async fn current_user(state: &AppState, headers: &HeaderMap) -> ApiResult<Option<CurrentUser>> {
    let Some(token) = cookie_value(headers, SESSION_COOKIE_NAME) else {
        return Ok(None);
    };
    let claims = match state.sessions.verify(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected session token");
            return Ok(None);
        }
    };

    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, password_hash, role, created_at, last_login, deleted_at
        FROM users
        WHERE id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(&claims.sub)
    .fetch_optional(&state.db)
    .await?;

    Ok(user.map(CurrentUser::from))
}

/// Session gate for protected routes: 401 without a valid session
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = current_user(&state, request.headers())
        .await?
        .ok_or(ApiError::Unauthorized)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Admin gate, layered inside [`require_session`]: 403 for non-admins
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    match request.extensions().get::<CurrentUser>() {
        Some(user) if user.is_admin() => Ok(next.run(request).await),
        Some(user) => {
            warn!(user_id = %user.id, path = %request.uri().path(), "Non-admin denied");
            Err(ApiError::Forbidden)
        }
        None => Err(ApiError::Unauthorized),
    }
}

/// Create an admin account, or promote an existing one and reset its password
pub async fn ensure_admin(
    db: &SqlitePool,
    email: &str,
    password: &str,
    bcrypt_cost: u32,
) -> ApiResult<CurrentUser> {
    let email = normalize_email(email);
    let mut errors = ValidationErrors::new();
    errors.email("email", &email);
    errors.length("password", password, 8, 200);
    errors.into_result().map_err(ApiError::Validation)?;

    let password_hash = hash_password(password.to_string(), bcrypt_cost).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, password_hash, role, created_at)
        VALUES (?, ?, ?, 'ADMIN', ?)
        ON CONFLICT(email) DO UPDATE SET
            password_hash = excluded.password_hash,
            role = 'ADMIN'
        RETURNING id, email, password_hash, role, created_at, last_login, deleted_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&email)
    .bind(&password_hash)
    .bind(Utc::now())
    .fetch_one(db)
    .await?;

    info!(user_id = %user.id, "Admin account ready");
    Ok(user.into())
}
