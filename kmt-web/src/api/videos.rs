//! Video workflow: upload registration, completion, technique links
//!
//! Uploads go straight to object storage; this service only records the
//! asset and hands back its storage key. No upload URL is signed here, so
//! `uploadUrl` is always null.

use axum::{extract::State, Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use kmt_common::db::{TechniqueVideoLink, UploadPurpose, VideoSlot, VideoStatus};

use super::auth::CurrentUser;
use crate::audit::{self, log_admin_action};
use crate::error::{ApiError, ApiResult};
use crate::validation::{ValidJson, Validate, ValidationErrors};
use crate::AppState;

const STORAGE_PROVIDER: &str = "S3";

/// Object key for a new upload
pub fn storage_key(user_id: &str, asset_id: &Uuid) -> String {
    format!("uploads/{}/{}", user_id, asset_id)
}

async fn technique_exists(state: &AppState, technique_id: &str) -> ApiResult<bool> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM techniques WHERE id = ?")
        .bind(technique_id)
        .fetch_optional(&state.db)
        .await?;
    Ok(row.is_some())
}

/// Owner of an asset, `None` when the asset does not exist
async fn asset_owner(state: &AppState, asset_id: &str) -> ApiResult<Option<Option<String>>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT created_by_user_id FROM video_assets WHERE id = ?")
            .bind(asset_id)
            .fetch_optional(&state.db)
            .await?;
    Ok(row.map(|(owner,)| owner))
}

/// 404 for a missing asset, 403 unless the caller owns it or is admin
async fn ensure_asset_access(state: &AppState, user: &CurrentUser, asset_id: &str) -> ApiResult<()> {
    let owner = asset_owner(state, asset_id).await?.ok_or(ApiError::NotFound)?;
    if user.is_admin() || owner.as_deref() == Some(user.id.as_str()) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub purpose: UploadPurpose,
    pub technique_id: String,
    pub content_type: String,
    pub size: i64,
}

impl Validate for PresignRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("techniqueId", &self.technique_id);
        errors.length("contentType", &self.content_type, 1, 200);
        if self.size <= 0 {
            errors.add("size", "Must be greater than 0");
        }
        errors.into_result()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub asset_id: String,
    pub upload_url: Option<String>,
    pub storage_key: String,
}

/// POST /api/videos/presign
pub async fn presign(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ValidJson(request): ValidJson<PresignRequest>,
) -> ApiResult<Json<PresignResponse>> {
    if request.purpose == UploadPurpose::Coach && !user.is_admin() {
        return Err(ApiError::Forbidden);
    }
    if !technique_exists(&state, &request.technique_id).await? {
        return Err(ApiError::NotFound);
    }

    let asset_id = Uuid::new_v4();
    let key = storage_key(&user.id, &asset_id);

    sqlx::query(
        r#"
        INSERT INTO video_assets
            (id, provider, storage_key, status, format, size, created_by_user_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(asset_id.to_string())
    .bind(STORAGE_PROVIDER)
    .bind(&key)
    .bind(VideoStatus::Processing)
    .bind(&request.content_type)
    .bind(request.size)
    .bind(&user.id)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    info!(
        user_id = %user.id,
        asset_id = %asset_id,
        purpose = ?request.purpose,
        size = request.size,
        "Video upload registered"
    );

    Ok(Json(PresignResponse {
        asset_id: asset_id.to_string(),
        upload_url: None,
        storage_key: key,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub asset_id: String,
    pub status: Option<VideoStatus>,
}

impl Validate for CompleteRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("assetId", &self.asset_id);
        if self.status == Some(VideoStatus::Processing) {
            errors.add("status", "Must be READY or FAILED");
        }
        errors.into_result()
    }
}

/// POST /api/videos/complete
pub async fn complete(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ValidJson(request): ValidJson<CompleteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ensure_asset_access(&state, &user, &request.asset_id).await?;

    let status = request.status.unwrap_or(VideoStatus::Ready);
    sqlx::query("UPDATE video_assets SET status = ? WHERE id = ?")
        .bind(status)
        .bind(&request.asset_id)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "asset": { "id": request.asset_id, "status": status }
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUserRequest {
    pub technique_id: String,
    pub slot: VideoSlot,
    pub asset_id: String,
}

impl Validate for LinkUserRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("techniqueId", &self.technique_id);
        errors.require("assetId", &self.asset_id);
        errors.into_result()
    }
}

/// POST /api/videos/link-user
///
/// Replaces whatever live video occupies the slot.
pub async fn link_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ValidJson(request): ValidJson<LinkUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if !technique_exists(&state, &request.technique_id).await? {
        return Err(ApiError::NotFound);
    }
    ensure_asset_access(&state, &user, &request.asset_id).await?;

    let (id,): (String,) = sqlx::query_as(
        r#"
        INSERT INTO user_technique_videos
            (id, user_id, technique_id, slot, video_asset_id, is_active, deleted_at, created_at)
        VALUES (?, ?, ?, ?, ?, 1, NULL, ?)
        ON CONFLICT(user_id, technique_id, slot) WHERE deleted_at IS NULL DO UPDATE SET
            video_asset_id = excluded.video_asset_id,
            is_active = 1
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(&request.technique_id)
    .bind(request.slot)
    .bind(&request.asset_id)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "userVideo": { "id": id } })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkUserRequest {
    pub technique_id: String,
    pub slot: VideoSlot,
}

impl Validate for UnlinkUserRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("techniqueId", &self.technique_id);
        errors.into_result()
    }
}

/// DELETE /api/videos/link-user
pub async fn unlink_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ValidJson(request): ValidJson<UnlinkUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    sqlx::query(
        r#"
        UPDATE user_technique_videos
        SET deleted_at = ?, is_active = 0
        WHERE user_id = ? AND technique_id = ? AND slot = ? AND deleted_at IS NULL
        "#,
    )
    .bind(Utc::now())
    .bind(&user.id)
    .bind(&request.technique_id)
    .bind(request.slot)
    .execute(&state.db)
    .await?;

    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCoachRequest {
    pub technique_id: String,
    pub asset_id: String,
}

impl Validate for LinkCoachRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("techniqueId", &self.technique_id);
        errors.require("assetId", &self.asset_id);
        errors.into_result()
    }
}

/// POST /api/videos/link-coach (admin)
pub async fn link_coach(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    ValidJson(request): ValidJson<LinkCoachRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if !technique_exists(&state, &request.technique_id).await? {
        return Err(ApiError::NotFound);
    }
    if asset_owner(&state, &request.asset_id).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    let link = sqlx::query_as::<_, TechniqueVideoLink>(
        r#"
        INSERT INTO technique_video_links (technique_id, video_asset_id, is_active, updated_at)
        VALUES (?, ?, 1, ?)
        ON CONFLICT(technique_id) DO UPDATE SET
            video_asset_id = excluded.video_asset_id,
            is_active = 1,
            updated_at = excluded.updated_at
        RETURNING technique_id, video_asset_id, is_active, updated_at
        "#,
    )
    .bind(&request.technique_id)
    .bind(&request.asset_id)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    log_admin_action(
        &state.db,
        &admin.id,
        audit::UPSERT_COACH_VIDEO,
        Some(json!({ "techniqueId": link.technique_id, "assetId": link.video_asset_id })),
    )
    .await;

    Ok(Json(json!({ "ok": true, "link": link })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkCoachRequest {
    pub technique_id: String,
}

impl Validate for UnlinkCoachRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("techniqueId", &self.technique_id);
        errors.into_result()
    }
}

/// DELETE /api/videos/link-coach (admin)
pub async fn unlink_coach(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    ValidJson(request): ValidJson<UnlinkCoachRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    sqlx::query(
        "UPDATE technique_video_links SET is_active = 0, updated_at = ? WHERE technique_id = ?",
    )
    .bind(Utc::now())
    .bind(&request.technique_id)
    .execute(&state.db)
    .await?;

    log_admin_action(
        &state.db,
        &admin.id,
        audit::DISABLE_COACH_VIDEO,
        Some(json!({ "techniqueId": request.technique_id })),
    )
    .await;

    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            storage_key("user-1", &id),
            "uploads/user-1/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_presign_rejects_empty_uploads() {
        let request: PresignRequest = serde_json::from_value(json!({
            "purpose": "USER_BEGINNER",
            "techniqueId": "t1",
            "contentType": "video/mp4",
            "size": 0
        }))
        .unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors.contains_key("size"));
    }

    #[test]
    fn test_complete_rejects_processing_status() {
        let request: CompleteRequest =
            serde_json::from_value(json!({ "assetId": "a1", "status": "PROCESSING" })).unwrap();
        assert!(request.validate().is_err());

        let request: CompleteRequest = serde_json::from_value(json!({ "assetId": "a1" })).unwrap();
        assert!(request.validate().is_ok());
    }
}
