//! Account self-service: preferences, data export, account deletion

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use kmt_common::db::{User, UserPreference, VideoAsset, VideoSlot, VideoStatus};
use kmt_common::Mastery;

use super::auth::CurrentUser;
use super::TitledRef;
use crate::error::{ApiError, ApiResult};
use crate::validation::{ValidJson, Validate, ValidationErrors};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    pub preferences: Option<UserPreference>,
}

/// GET /api/preferences
pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<PreferencesResponse>> {
    let preferences = sqlx::query_as::<_, UserPreference>(
        "SELECT user_id, default_belt_id, updated_at FROM user_preferences WHERE user_id = ?",
    )
    .bind(&user.id)
    .fetch_optional(&state.db)
    .await?;

    Ok(Json(PreferencesResponse { preferences }))
}

/// `defaultBeltId` must be present; `null` clears it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesRequest {
    #[serde(deserialize_with = "required_nullable")]
    pub default_belt_id: Option<String>,
}

fn required_nullable<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

impl Validate for PreferencesRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(belt_id) = &self.default_belt_id {
            errors.require("defaultBeltId", belt_id);
        }
        errors.into_result()
    }
}

/// POST /api/preferences
pub async fn set_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ValidJson(request): ValidJson<PreferencesRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(belt_id) = &request.default_belt_id {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM belts WHERE id = ?")
            .bind(belt_id)
            .fetch_optional(&state.db)
            .await?;
        if exists.is_none() {
            let mut errors = ValidationErrors::new();
            errors.add("defaultBeltId", "Unknown belt");
            return Err(ApiError::Validation(errors));
        }
    }

    let preferences = sqlx::query_as::<_, UserPreference>(
        r#"
        INSERT INTO user_preferences (user_id, default_belt_id, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            default_belt_id = excluded.default_belt_id,
            updated_at = excluded.updated_at
        RETURNING user_id, default_belt_id, updated_at
        "#,
    )
    .bind(&user.id)
    .bind(&request.default_belt_id)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "ok": true, "preferences": preferences })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTechnique {
    pub id: String,
    pub title: String,
    pub module_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedProgress {
    pub technique_id: String,
    pub mastery: Mastery,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub technique: ExportedTechnique,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedVideo {
    pub id: String,
    pub slot: VideoSlot,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub technique: TitledRef,
    pub video: VideoAsset,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub user: User,
    pub preferences: Option<UserPreference>,
    pub progresses: Vec<ExportedProgress>,
    pub videos: Vec<ExportedVideo>,
}

#[derive(sqlx::FromRow)]
struct ProgressExportRow {
    technique_id: String,
    mastery: Mastery,
    notes: Option<String>,
    updated_at: DateTime<Utc>,
    technique_title: String,
    module_id: String,
}

#[derive(sqlx::FromRow)]
struct VideoExportRow {
    id: String,
    slot: VideoSlot,
    is_active: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    technique_id: String,
    technique_title: String,
    asset_id: String,
    provider: String,
    storage_key: String,
    status: VideoStatus,
    format: String,
    size: i64,
    created_by_user_id: Option<String>,
    asset_created_at: DateTime<Utc>,
}

/// GET /api/me/export
///
/// Everything stored about the caller, soft-deleted videos included.
pub async fn export_data(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Json<ExportResponse>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, password_hash, role, created_at, last_login, deleted_at
        FROM users WHERE id = ?
        "#,
    )
    .bind(&current.id)
    .fetch_one(&state.db)
    .await?;

    let preferences = sqlx::query_as::<_, UserPreference>(
        "SELECT user_id, default_belt_id, updated_at FROM user_preferences WHERE user_id = ?",
    )
    .bind(&current.id)
    .fetch_optional(&state.db)
    .await?;

    let progresses = sqlx::query_as::<_, ProgressExportRow>(
        r#"
        SELECT p.technique_id, p.mastery, p.notes, p.updated_at,
               t.title AS technique_title, t.module_id
        FROM user_technique_progress p
        JOIN techniques t ON t.id = p.technique_id
        WHERE p.user_id = ?
        ORDER BY p.updated_at DESC
        "#,
    )
    .bind(&current.id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(|r| ExportedProgress {
        technique: ExportedTechnique {
            id: r.technique_id.clone(),
            title: r.technique_title,
            module_id: r.module_id,
        },
        technique_id: r.technique_id,
        mastery: r.mastery,
        notes: r.notes,
        updated_at: r.updated_at,
    })
    .collect();

    let videos = sqlx::query_as::<_, VideoExportRow>(
        r#"
        SELECT v.id, v.slot, v.is_active, v.deleted_at, v.created_at,
               t.id AS technique_id, t.title AS technique_title,
               a.id AS asset_id, a.provider, a.storage_key, a.status, a.format, a.size,
               a.created_by_user_id, a.created_at AS asset_created_at
        FROM user_technique_videos v
        JOIN techniques t ON t.id = v.technique_id
        JOIN video_assets a ON a.id = v.video_asset_id
        WHERE v.user_id = ?
        ORDER BY v.created_at DESC
        "#,
    )
    .bind(&current.id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(|r| ExportedVideo {
        id: r.id,
        slot: r.slot,
        is_active: r.is_active,
        deleted_at: r.deleted_at,
        created_at: r.created_at,
        technique: TitledRef {
            id: r.technique_id,
            title: r.technique_title,
        },
        video: VideoAsset {
            id: r.asset_id,
            provider: r.provider,
            storage_key: r.storage_key,
            status: r.status,
            format: r.format,
            size: r.size,
            created_by_user_id: r.created_by_user_id,
            created_at: r.asset_created_at,
        },
    })
    .collect();

    Ok(Json(ExportResponse {
        user,
        preferences,
        progresses,
        videos,
    }))
}

/// Email an anonymised account is rewritten to
pub fn anonymised_email(user_id: &str) -> String {
    format!("deleted_{}@example.invalid", user_id)
}

/// DELETE /api/me
///
/// Soft-deletes videos, wipes per-user learning state and anonymises the
/// account in one transaction, then clears the session cookie.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Response> {
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        UPDATE user_technique_videos
        SET is_active = 0, deleted_at = ?
        WHERE user_id = ? AND deleted_at IS NULL
        "#,
    )
    .bind(now)
    .bind(&user.id)
    .execute(&mut *tx)
    .await?;

    for table in ["user_technique_progress", "user_preferences", "user_technique_views"] {
        sqlx::query(&format!("DELETE FROM {} WHERE user_id = ?", table))
            .bind(&user.id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, password_hash = 'deleted', role = 'USER', deleted_at = ?
        WHERE id = ?
        "#,
    )
    .bind(anonymised_email(&user.id))
    .bind(now)
    .bind(&user.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(user_id = %user.id, "Account deleted and anonymised");

    Ok((
        [(header::SET_COOKIE, state.sessions.clear_cookie())],
        Json(json!({ "ok": true })),
    )
        .into_response())
}
