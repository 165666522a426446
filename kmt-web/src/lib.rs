//! kmt-web library - Krav Maga progress tracker HTTP service
//!
//! JSON API over the belt → module → technique curriculum: per-user
//! progress, search, video workflow and the admin back office.

use std::sync::Arc;

use axum::Router;
use kmt_common::config::ServerConfig;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod audit;
pub mod error;
pub mod import;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod validation;

use rate_limit::AuthRateLimits;
use session::SessionSigner;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Session token signer / cookie renderer
    pub sessions: Arc<SessionSigner>,
    /// Login/register throttling
    pub rate_limits: Arc<AuthRateLimits>,
    /// bcrypt cost for new password hashes
    pub bcrypt_cost: u32,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, config: &ServerConfig) -> Self {
        Self {
            db,
            sessions: Arc::new(SessionSigner::new(
                &config.auth_secret,
                config.session_days,
                config.secure_cookies,
            )),
            rate_limits: Arc::new(AuthRateLimits::new()),
            bcrypt_cost: config.bcrypt_cost,
        }
    }
}

/// Build application router
///
/// Public: health, `/api/auth/*`. Everything else under `/api` requires a
/// session; admin routes additionally require the ADMIN role.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{delete, get, post};

    // Admin routes (session + ADMIN role)
    let admin = Router::new()
        .route(
            "/api/admin/belts",
            get(api::admin::list_belts).post(api::admin::upsert_belt),
        )
        .route(
            "/api/admin/belt-contents",
            get(api::admin::get_belt_content).post(api::admin::upsert_belt_content),
        )
        .route("/api/admin/import", post(api::admin::import))
        .route(
            "/api/videos/link-coach",
            post(api::videos::link_coach).delete(api::videos::unlink_coach),
        )
        .layer(middleware::from_fn(api::auth::require_admin));

    // Protected routes (require a valid session)
    let protected = Router::new()
        .route("/api/belts", get(api::curriculum::list_belts))
        .route("/api/belts/:belt_id", get(api::curriculum::get_belt))
        .route("/api/modules/:module_id", get(api::curriculum::get_module))
        .route("/api/techniques/:technique_id", get(api::curriculum::get_technique))
        .route("/api/progress", post(api::progress::upsert_progress))
        .route("/api/to-work", get(api::progress::to_work))
        .route("/api/dashboard", get(api::progress::dashboard))
        .route("/api/search", get(api::search::search))
        .route(
            "/api/preferences",
            get(api::account::get_preferences).post(api::account::set_preferences),
        )
        .route("/api/me", delete(api::account::delete_account))
        .route("/api/me/export", get(api::account::export_data))
        .route("/api/videos/presign", post(api::videos::presign))
        .route("/api/videos/complete", post(api::videos::complete))
        .route(
            "/api/videos/link-user",
            post(api::videos::link_user).delete(api::videos::unlink_user),
        )
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_session,
        ));

    // Public routes (no authentication)
    let public = Router::new()
        .route("/api/auth/register", post(api::auth::register))
        .route("/api/auth/login", post(api::auth::login))
        .route("/api/auth/logout", post(api::auth::logout))
        .route("/api/auth/me", get(api::auth::me))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
