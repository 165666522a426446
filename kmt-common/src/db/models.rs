//! Database models
//!
//! Row structs map 1:1 onto tables (`sqlx::FromRow`, snake_case columns) and
//! serialize with camelCase keys for the JSON API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::mastery::Mastery;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Lifecycle of an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    Processing,
    Ready,
    Failed,
}

/// Personal video slots a student can fill per technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoSlot {
    Beginner,
    Progress,
}

/// Why an upload is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadPurpose {
    Coach,
    UserBeginner,
    UserProgress,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Belt {
    pub id: String,
    pub code: String,
    pub name: String,
    pub order_index: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BeltContent {
    pub belt_id: String,
    pub content_rich: String,
    pub source_ref: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub belt_id: String,
    pub title: String,
    pub order_index: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Technique {
    pub id: String,
    pub module_id: String,
    pub title: String,
    pub order_index: i64,
    pub description_rich: Option<String>,
    pub keywords: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    pub user_id: String,
    pub default_belt_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VideoAsset {
    pub id: String,
    pub provider: String,
    pub storage_key: String,
    pub status: VideoStatus,
    pub format: String,
    pub size: i64,
    pub created_by_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Coach reference video attached to a technique
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueVideoLink {
    pub technique_id: String,
    pub video_asset_id: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}
