//! Curriculum browsing: belts, modules, techniques
//!
//! Only active rows are visible; a technique is visible when it, its module
//! and its belt are all active.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

use kmt_common::db::{VideoSlot, VideoStatus};
use kmt_common::{Mastery, ProgressSummary};

use super::auth::CurrentUser;
use super::{BeltRef, TitledRef};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeltCard {
    pub id: String,
    pub code: String,
    pub name: String,
    pub order_index: i64,
    pub has_content: bool,
    pub progress: ProgressSummary,
}

#[derive(Debug, Serialize)]
pub struct BeltListResponse {
    pub belts: Vec<BeltCard>,
}

#[derive(sqlx::FromRow)]
struct BeltCardRow {
    id: String,
    code: String,
    name: String,
    order_index: i64,
    has_content: bool,
}

/// GET /api/belts
pub async fn list_belts(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<BeltListResponse>> {
    let rows = sqlx::query_as::<_, BeltCardRow>(
        r#"
        SELECT b.id, b.code, b.name, b.order_index,
               EXISTS (SELECT 1 FROM belt_contents c WHERE c.belt_id = b.id) AS has_content
        FROM belts b
        WHERE b.is_active = 1
        ORDER BY b.order_index ASC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let levels = sqlx::query_as::<_, (String, Mastery)>(
        r#"
        SELECT m.belt_id, COALESCE(p.mastery, 'NOT_SEEN')
        FROM techniques t
        JOIN modules m ON m.id = t.module_id
        LEFT JOIN user_technique_progress p
               ON p.technique_id = t.id AND p.user_id = ?
        WHERE t.is_active = 1 AND m.is_active = 1
        "#,
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;
    let by_belt = group_levels(levels);

    let belts = rows
        .into_iter()
        .map(|row| {
            let progress = summary_for(&by_belt, &row.id);
            BeltCard {
                id: row.id,
                code: row.code,
                name: row.name,
                order_index: row.order_index,
                has_content: row.has_content,
                progress,
            }
        })
        .collect();

    Ok(Json(BeltListResponse { belts }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCard {
    pub id: String,
    pub title: String,
    pub order_index: i64,
    pub progress: ProgressSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeltDetail {
    pub id: String,
    pub code: String,
    pub name: String,
    pub order_index: i64,
    pub content_rich: Option<String>,
    pub modules: Vec<ModuleCard>,
}

#[derive(Debug, Serialize)]
pub struct BeltDetailResponse {
    pub belt: BeltDetail,
}

#[derive(sqlx::FromRow)]
struct BeltDetailRow {
    id: String,
    code: String,
    name: String,
    order_index: i64,
    content_rich: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ModuleRow {
    id: String,
    title: String,
    order_index: i64,
}

/// GET /api/belts/:belt_id
pub async fn get_belt(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(belt_id): Path<String>,
) -> ApiResult<Json<BeltDetailResponse>> {
    let belt = sqlx::query_as::<_, BeltDetailRow>(
        r#"
        SELECT b.id, b.code, b.name, b.order_index, c.content_rich
        FROM belts b
        LEFT JOIN belt_contents c ON c.belt_id = b.id
        WHERE b.id = ? AND b.is_active = 1
        "#,
    )
    .bind(&belt_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(ApiError::NotFound)?;

    let modules = sqlx::query_as::<_, ModuleRow>(
        r#"
        SELECT id, title, order_index
        FROM modules
        WHERE belt_id = ? AND is_active = 1
        ORDER BY order_index ASC
        "#,
    )
    .bind(&belt.id)
    .fetch_all(&state.db)
    .await?;

    let levels = sqlx::query_as::<_, (String, Mastery)>(
        r#"
        SELECT t.module_id, COALESCE(p.mastery, 'NOT_SEEN')
        FROM techniques t
        JOIN modules m ON m.id = t.module_id
        LEFT JOIN user_technique_progress p
               ON p.technique_id = t.id AND p.user_id = ?
        WHERE m.belt_id = ? AND t.is_active = 1 AND m.is_active = 1
        "#,
    )
    .bind(&user.id)
    .bind(&belt.id)
    .fetch_all(&state.db)
    .await?;
    let by_module = group_levels(levels);

    let modules = modules
        .into_iter()
        .map(|m| {
            let progress = summary_for(&by_module, &m.id);
            ModuleCard {
                id: m.id,
                title: m.title,
                order_index: m.order_index,
                progress,
            }
        })
        .collect();

    Ok(Json(BeltDetailResponse {
        belt: BeltDetail {
            id: belt.id,
            code: belt.code,
            name: belt.name,
            order_index: belt.order_index,
            content_rich: belt.content_rich,
            modules,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDetail {
    pub id: String,
    pub title: String,
    pub order_index: i64,
    pub belt: BeltRef,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueCard {
    pub id: String,
    pub title: String,
    pub description_rich: String,
    pub order_index: i64,
    pub mastery: Mastery,
}

#[derive(Debug, Serialize)]
pub struct ModuleDetailResponse {
    pub module: ModuleDetail,
    pub techniques: Vec<TechniqueCard>,
}

#[derive(sqlx::FromRow)]
struct ModuleDetailRow {
    id: String,
    title: String,
    order_index: i64,
    belt_id: String,
    belt_code: String,
    belt_name: String,
}

/// GET /api/modules/:module_id
pub async fn get_module(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(module_id): Path<String>,
) -> ApiResult<Json<ModuleDetailResponse>> {
    let module = sqlx::query_as::<_, ModuleDetailRow>(
        r#"
        SELECT m.id, m.title, m.order_index,
               b.id AS belt_id, b.code AS belt_code, b.name AS belt_name
        FROM modules m
        JOIN belts b ON b.id = m.belt_id
        WHERE m.id = ? AND m.is_active = 1 AND b.is_active = 1
        "#,
    )
    .bind(&module_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(ApiError::NotFound)?;

    let techniques = sqlx::query_as::<_, TechniqueCard>(
        r#"
        SELECT t.id, t.title, COALESCE(t.description_rich, '') AS description_rich,
               t.order_index, COALESCE(p.mastery, 'NOT_SEEN') AS mastery
        FROM techniques t
        LEFT JOIN user_technique_progress p
               ON p.technique_id = t.id AND p.user_id = ?
        WHERE t.module_id = ? AND t.is_active = 1
        ORDER BY t.order_index ASC
        "#,
    )
    .bind(&user.id)
    .bind(&module.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ModuleDetailResponse {
        module: ModuleDetail {
            id: module.id,
            title: module.title,
            order_index: module.order_index,
            belt: BeltRef {
                id: module.belt_id,
                code: module.belt_code,
                name: module.belt_name,
            },
        },
        techniques,
    }))
}

/// Video reference shown on a technique page; playback URLs are not signed
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachVideo {
    pub asset_id: String,
    pub status: VideoStatus,
    pub playback_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVideo {
    pub slot: VideoSlot,
    pub asset_id: String,
    pub status: VideoStatus,
    pub playback_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueDetail {
    pub id: String,
    pub title: String,
    pub description_rich: String,
    pub keywords: String,
    pub belt: BeltRef,
    pub module: TitledRef,
    pub mastery: Mastery,
    pub coach_video: Option<CoachVideo>,
    pub my_videos: Vec<MyVideo>,
}

#[derive(Debug, Serialize)]
pub struct TechniqueDetailResponse {
    pub technique: TechniqueDetail,
}

#[derive(sqlx::FromRow)]
struct TechniqueDetailRow {
    id: String,
    title: String,
    description_rich: String,
    keywords: String,
    module_id: String,
    module_title: String,
    belt_id: String,
    belt_code: String,
    belt_name: String,
    mastery: Mastery,
}

/// GET /api/techniques/:technique_id
///
/// Also records the view for the dashboard's "last viewed" list.
pub async fn get_technique(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(technique_id): Path<String>,
) -> ApiResult<Json<TechniqueDetailResponse>> {
    let row = sqlx::query_as::<_, TechniqueDetailRow>(
        r#"
        SELECT t.id, t.title,
               COALESCE(t.description_rich, '') AS description_rich,
               COALESCE(t.keywords, '') AS keywords,
               m.id AS module_id, m.title AS module_title,
               b.id AS belt_id, b.code AS belt_code, b.name AS belt_name,
               COALESCE(p.mastery, 'NOT_SEEN') AS mastery
        FROM techniques t
        JOIN modules m ON m.id = t.module_id
        JOIN belts b ON b.id = m.belt_id
        LEFT JOIN user_technique_progress p
               ON p.technique_id = t.id AND p.user_id = ?
        WHERE t.id = ? AND t.is_active = 1 AND m.is_active = 1 AND b.is_active = 1
        "#,
    )
    .bind(&user.id)
    .bind(&technique_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(ApiError::NotFound)?;

    record_view(&state.db, &user.id, &row.id).await?;

    let coach_video = sqlx::query_as::<_, (String, VideoStatus)>(
        r#"
        SELECT a.id, a.status
        FROM technique_video_links l
        JOIN video_assets a ON a.id = l.video_asset_id
        WHERE l.technique_id = ? AND l.is_active = 1
        "#,
    )
    .bind(&row.id)
    .fetch_optional(&state.db)
    .await?
    .map(|(asset_id, status)| CoachVideo {
        asset_id,
        status,
        playback_url: None,
    });

    let my_videos = sqlx::query_as::<_, (VideoSlot, String, VideoStatus)>(
        r#"
        SELECT v.slot, a.id, a.status
        FROM user_technique_videos v
        JOIN video_assets a ON a.id = v.video_asset_id
        WHERE v.user_id = ? AND v.technique_id = ?
          AND v.is_active = 1 AND v.deleted_at IS NULL
        ORDER BY v.slot ASC
        "#,
    )
    .bind(&user.id)
    .bind(&row.id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(|(slot, asset_id, status)| MyVideo {
        slot,
        asset_id,
        status,
        playback_url: None,
    })
    .collect();

    Ok(Json(TechniqueDetailResponse {
        technique: TechniqueDetail {
            id: row.id,
            title: row.title,
            description_rich: row.description_rich,
            keywords: row.keywords,
            belt: BeltRef {
                id: row.belt_id,
                code: row.belt_code,
                name: row.belt_name,
            },
            module: TitledRef {
                id: row.module_id,
                title: row.module_title,
            },
            mastery: row.mastery,
            coach_video,
            my_videos,
        },
    }))
}

async fn record_view(db: &SqlitePool, user_id: &str, technique_id: &str) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_technique_views (user_id, technique_id, viewed_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id, technique_id) DO UPDATE SET viewed_at = excluded.viewed_at
        "#,
    )
    .bind(user_id)
    .bind(technique_id)
    .bind(Utc::now())
    .execute(db)
    .await?;

    Ok(())
}

fn group_levels(rows: Vec<(String, Mastery)>) -> HashMap<String, Vec<Mastery>> {
    let mut grouped: HashMap<String, Vec<Mastery>> = HashMap::new();
    for (key, mastery) in rows {
        grouped.entry(key).or_default().push(mastery);
    }
    grouped
}

fn summary_for(grouped: &HashMap<String, Vec<Mastery>>, key: &str) -> ProgressSummary {
    let levels = grouped.get(key).map(Vec::as_slice).unwrap_or(&[]);
    ProgressSummary::from_levels(levels)
}
