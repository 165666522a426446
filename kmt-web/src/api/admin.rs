//! Admin back office: belts, belt content, bulk import
//!
//! All routes sit behind the admin gate. Writes are recorded in the audit log.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use kmt_common::db::curriculum::{self, BeltUpsert};
use kmt_common::db::{Belt, BeltContent};

use super::auth::CurrentUser;
use super::BeltRef;
use crate::audit::{self, log_admin_action};
use crate::error::{ApiError, ApiResult};
use crate::import::{import_curriculum, ImportPayload, ImportSummary};
use crate::validation::{non_empty, ValidJson, Validate, ValidationErrors};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct BeltsResponse {
    pub belts: Vec<Belt>,
}

/// GET /api/admin/belts
///
/// Inactive belts included.
pub async fn list_belts(State(state): State<AppState>) -> ApiResult<Json<BeltsResponse>> {
    let belts = sqlx::query_as::<_, Belt>(
        r#"
        SELECT id, code, name, order_index, is_active, created_at, updated_at
        FROM belts
        ORDER BY order_index ASC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(BeltsResponse { belts }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeltRequest {
    pub code: String,
    pub name: String,
    pub order_index: i64,
    pub is_active: Option<bool>,
}

impl Validate for BeltRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("code", &self.code);
        errors.require("name", &self.name);
        errors.non_negative("orderIndex", self.order_index);
        errors.into_result()
    }
}

/// POST /api/admin/belts
pub async fn upsert_belt(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    ValidJson(request): ValidJson<BeltRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let belt = curriculum::upsert_belt(
        &state.db,
        &BeltUpsert {
            code: request.code,
            name: request.name,
            order_index: request.order_index,
            is_active: request.is_active.unwrap_or(true),
        },
    )
    .await?;

    log_admin_action(
        &state.db,
        &admin.id,
        audit::UPSERT_BELT,
        Some(json!({ "beltId": belt.id, "code": belt.code })),
    )
    .await;

    Ok(Json(json!({ "belt": belt })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeltContentQuery {
    pub belt_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BeltContentResponse {
    pub belt: BeltRef,
    pub content: Option<BeltContent>,
}

async fn find_belt(state: &AppState, belt_id: &str) -> ApiResult<BeltRef> {
    let (id, code, name): (String, String, String) =
        sqlx::query_as("SELECT id, code, name FROM belts WHERE id = ?")
            .bind(belt_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or(ApiError::NotFound)?;
    Ok(BeltRef { id, code, name })
}

/// GET /api/admin/belt-contents?beltId=
pub async fn get_belt_content(
    State(state): State<AppState>,
    Query(query): Query<BeltContentQuery>,
) -> ApiResult<Json<BeltContentResponse>> {
    let belt_id = non_empty(query.belt_id)
        .ok_or_else(|| ApiError::BadRequest("beltId required".to_string()))?;
    let belt = find_belt(&state, &belt_id).await?;

    let content = sqlx::query_as::<_, BeltContent>(
        r#"
        SELECT belt_id, content_rich, source_ref, updated_by, updated_at
        FROM belt_contents
        WHERE belt_id = ?
        "#,
    )
    .bind(&belt.id)
    .fetch_optional(&state.db)
    .await?;

    Ok(Json(BeltContentResponse { belt, content }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeltContentRequest {
    pub belt_id: String,
    pub content_rich: String,
    pub source_ref: Option<String>,
}

impl Validate for BeltContentRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("beltId", &self.belt_id);
        errors.require("contentRich", &self.content_rich);
        errors.into_result()
    }
}

/// POST /api/admin/belt-contents
pub async fn upsert_belt_content(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    ValidJson(request): ValidJson<BeltContentRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let belt = find_belt(&state, &request.belt_id).await?;

    let content = curriculum::upsert_belt_content(
        &state.db,
        &belt.id,
        &request.content_rich,
        request.source_ref.as_deref(),
        Some(admin.email.as_str()),
    )
    .await?;

    log_admin_action(
        &state.db,
        &admin.id,
        audit::UPSERT_BELT_CONTENT,
        Some(json!({ "beltId": belt.id })),
    )
    .await;

    Ok(Json(json!({ "beltContent": content })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportQuery {
    pub dry_run: Option<String>,
}

impl ImportQuery {
    /// Only the literal `dryRun=1` requests a dry run
    pub fn is_dry_run(&self) -> bool {
        self.dry_run.as_deref() == Some("1")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub ok: bool,
    pub dry_run: bool,
    pub result: ImportSummary,
}

/// POST /api/admin/import[?dryRun=1]
pub async fn import(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    Query(query): Query<ImportQuery>,
    ValidJson(payload): ValidJson<ImportPayload>,
) -> ApiResult<Json<ImportResponse>> {
    let dry_run = query.is_dry_run();
    let result = import_curriculum(&state.db, &payload, dry_run).await?;

    if !dry_run {
        log_admin_action(
            &state.db,
            &admin.id,
            audit::IMPORT_CURRICULUM,
            Some(serde_json::to_value(result).unwrap_or_default()),
        )
        .await;
        info!(admin_id = %admin.id, "Curriculum imported");
    }

    Ok(Json(ImportResponse {
        ok: true,
        dry_run,
        result,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_flag() {
        let q = |v: Option<&str>| ImportQuery {
            dry_run: v.map(str::to_string),
        };
        assert!(q(Some("1")).is_dry_run());
        assert!(!q(Some("true")).is_dry_run());
        assert!(!q(Some("0")).is_dry_run());
        assert!(!q(None).is_dry_run());
    }

    #[test]
    fn test_belt_request_validation() {
        let request = BeltRequest {
            code: String::new(),
            name: "Jaune".to_string(),
            order_index: -1,
            is_active: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors.contains_key("code"));
        assert!(errors.field_errors.contains_key("orderIndex"));
        assert!(!errors.field_errors.contains_key("name"));
    }
}
