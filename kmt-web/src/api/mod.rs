//! HTTP API handlers for kmt-web

pub mod account;
pub mod admin;
pub mod auth;
pub mod curriculum;
pub mod health;
pub mod progress;
pub mod search;
pub mod videos;

pub use health::health_routes;

use serde::Serialize;

/// `{id, code, name}` belt reference embedded in responses
#[derive(Debug, Clone, Serialize)]
pub struct BeltRef {
    pub id: String,
    pub code: String,
    pub name: String,
}

/// `{id, title}` reference embedded in responses
#[derive(Debug, Clone, Serialize)]
pub struct TitledRef {
    pub id: String,
    pub title: String,
}
