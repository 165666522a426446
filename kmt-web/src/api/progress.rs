//! Per-user progress: mastery updates, the "to work" list and the dashboard

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use kmt_common::mastery::percent;
use kmt_common::Mastery;

use super::auth::CurrentUser;
use super::{BeltRef, TitledRef};
use crate::error::{ApiError, ApiResult};
use crate::validation::{non_empty, ValidJson, Validate, ValidationErrors};
use crate::AppState;

const MAX_NOTES_CHARS: usize = 2000;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MIN_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 50;
/// Highest page whose offset still fits in an i64
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub technique_id: String,
    pub mastery: Mastery,
    pub notes: Option<String>,
}

impl Validate for ProgressRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.require("techniqueId", &self.technique_id);
        if let Some(notes) = &self.notes {
            errors.length("notes", notes, 0, MAX_NOTES_CHARS);
        }
        errors.into_result()
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub technique_id: String,
    pub mastery: Mastery,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub progress: ProgressView,
}

/// POST /api/progress
///
/// Omitted notes keep whatever was stored before.
pub async fn upsert_progress(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    ValidJson(request): ValidJson<ProgressRequest>,
) -> ApiResult<Json<ProgressResponse>> {
    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM techniques WHERE id = ?")
        .bind(&request.technique_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::NotFound);
    }

    let progress = sqlx::query_as::<_, ProgressView>(
        r#"
        INSERT INTO user_technique_progress (user_id, technique_id, mastery, notes, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id, technique_id) DO UPDATE SET
            mastery = excluded.mastery,
            notes = COALESCE(excluded.notes, user_technique_progress.notes),
            updated_at = excluded.updated_at
        RETURNING technique_id, mastery, updated_at
        "#,
    )
    .bind(&user.id)
    .bind(&request.technique_id)
    .bind(request.mastery)
    .bind(&request.notes)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    tracing::debug!(
        user_id = %user.id,
        technique_id = %progress.technique_id,
        mastery = %progress.mastery,
        "Progress updated"
    );

    Ok(Json(ProgressResponse { progress }))
}

/// Query parameters for GET /api/to-work
///
/// Numbers arrive as strings and are parsed leniently: garbage falls back
/// to the default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToWorkQuery {
    pub belt_id: Option<String>,
    pub module_id: Option<String>,
    pub mastery: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// Resolved `(page, page_size)`: page clamped to 1..=MAX_PAGE, page size
/// clamped to 10..=50. Missing or unparseable values take the defaults.
pub fn pagination(page: Option<&str>, page_size: Option<&str>) -> (i64, i64) {
    let page = page
        .and_then(|p| p.trim().parse::<i64>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_PAGE);
    let page_size = page_size
        .and_then(|p| p.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
    (page, page_size)
}

/// `CASE` expression ranking the row's mastery by [`Mastery::score`]
fn push_mastery_rank(qb: &mut QueryBuilder<'_, Sqlite>) {
    qb.push("CASE COALESCE(p.mastery, 'NOT_SEEN')");
    for level in Mastery::ALL {
        qb.push(format!(" WHEN '{}' THEN {}", level, level.score()));
    }
    qb.push(" END");
}

/// Parse an optional `mastery` query value; empty means no filter
pub fn parse_mastery_filter(value: Option<String>) -> ApiResult<Option<Mastery>> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<Mastery>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest("Invalid mastery".to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct ToWorkItem {
    pub mastery: Mastery,
    pub technique: TitledRef,
    pub module: TitledRef,
    pub belt: BeltRef,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToWorkResponse {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub items: Vec<ToWorkItem>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct CurriculumRow {
    pub mastery: Mastery,
    pub technique_id: String,
    pub technique_title: String,
    pub module_id: String,
    pub module_title: String,
    pub belt_id: String,
    pub belt_code: String,
    pub belt_name: String,
}

/// Visible techniques joined with their module, belt and the user's mastery
pub(crate) fn push_curriculum_from<'a>(qb: &mut QueryBuilder<'a, Sqlite>, user_id: &'a str) {
    qb.push(
        r#"
        FROM techniques t
        JOIN modules m ON m.id = t.module_id
        JOIN belts b ON b.id = m.belt_id
        LEFT JOIN user_technique_progress p
               ON p.technique_id = t.id AND p.user_id = "#,
    );
    qb.push_bind(user_id);
    qb.push(" WHERE t.is_active = 1 AND m.is_active = 1 AND b.is_active = 1");
}

/// `AND ...` clause for an exact mastery; NOT_SEEN also matches missing rows
pub(crate) fn push_mastery_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, mastery: Mastery) {
    if mastery == Mastery::NotSeen {
        qb.push(" AND (p.mastery IS NULL OR p.mastery = 'NOT_SEEN')");
    } else {
        qb.push(" AND p.mastery = ");
        qb.push_bind(mastery);
    }
}

pub(crate) const CURRICULUM_COLUMNS: &str = r#"
        SELECT COALESCE(p.mastery, 'NOT_SEEN') AS mastery,
               t.id AS technique_id, t.title AS technique_title,
               m.id AS module_id, m.title AS module_title,
               b.id AS belt_id, b.code AS belt_code, b.name AS belt_name"#;

fn push_to_work_filters<'a>(
    qb: &mut QueryBuilder<'a, Sqlite>,
    user_id: &'a str,
    belt_id: Option<&'a str>,
    module_id: Option<&'a str>,
    mastery: Option<Mastery>,
) {
    push_curriculum_from(qb, user_id);
    if let Some(belt_id) = belt_id {
        qb.push(" AND b.id = ");
        qb.push_bind(belt_id);
    }
    if let Some(module_id) = module_id {
        qb.push(" AND m.id = ");
        qb.push_bind(module_id);
    }
    match mastery {
        Some(m) => push_mastery_filter(qb, m),
        None => {
            qb.push(" AND (p.mastery IS NULL OR p.mastery <> 'MASTERED')");
        }
    }
}

/// GET /api/to-work
pub async fn to_work(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ToWorkQuery>,
) -> ApiResult<Json<ToWorkResponse>> {
    let (page, page_size) = pagination(query.page.as_deref(), query.page_size.as_deref());
    let mastery = parse_mastery_filter(query.mastery)?;

    if mastery == Some(Mastery::Mastered) {
        return Ok(Json(ToWorkResponse {
            page,
            page_size,
            total: 0,
            items: Vec::new(),
        }));
    }

    let belt_id = non_empty(query.belt_id);
    let module_id = non_empty(query.module_id);

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) ");
    push_to_work_filters(
        &mut count,
        &user.id,
        belt_id.as_deref(),
        module_id.as_deref(),
        mastery,
    );
    let (total,): (i64,) = count.build_query_as().fetch_one(&state.db).await?;

    let mut select = QueryBuilder::<Sqlite>::new(CURRICULUM_COLUMNS);
    push_to_work_filters(
        &mut select,
        &user.id,
        belt_id.as_deref(),
        module_id.as_deref(),
        mastery,
    );
    select.push(" ORDER BY ");
    push_mastery_rank(&mut select);
    select.push(", b.order_index, m.order_index, t.order_index LIMIT ");
    select.push_bind(page_size);
    select.push(" OFFSET ");
    select.push_bind((page - 1) * page_size);

    let rows: Vec<CurriculumRow> = select.build_query_as().fetch_all(&state.db).await?;
    let items = rows
        .into_iter()
        .map(|r| ToWorkItem {
            mastery: r.mastery,
            technique: TitledRef {
                id: r.technique_id,
                title: r.technique_title,
            },
            module: TitledRef {
                id: r.module_id,
                title: r.module_title,
            },
            belt: BeltRef {
                id: r.belt_id,
                code: r.belt_code,
                name: r.belt_name,
            },
        })
        .collect();

    Ok(Json(ToWorkResponse {
        page,
        page_size,
        total,
        items,
    }))
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpi {
    pub total_techniques: i64,
    pub not_seen: i64,
    pub seen: i64,
    pub known: i64,
    pub mastered: i64,
    pub known_plus_percent: u32,
    pub mastered_percent: u32,
}

impl Kpi {
    /// Build from the visible technique count and per-level row counts
    pub fn from_counts(total: i64, counts: &[(Mastery, i64)]) -> Self {
        let count_of = |level: Mastery| {
            counts
                .iter()
                .filter(|(m, _)| *m == level)
                .map(|(_, n)| *n)
                .sum::<i64>()
        };
        let seen = count_of(Mastery::Seen);
        let known = count_of(Mastery::Known);
        let mastered = count_of(Mastery::Mastered);
        let not_seen = (total - seen - known - mastered).max(0);
        let as_usize = |n: i64| usize::try_from(n).unwrap_or(0);

        Self {
            total_techniques: total,
            not_seen,
            seen,
            known,
            mastered,
            known_plus_percent: percent(as_usize(known + mastered), as_usize(total)),
            mastered_percent: percent(as_usize(mastered), as_usize(total)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastViewed {
    pub viewed_at: DateTime<Utc>,
    pub technique: TitledRef,
    pub module: TitledRef,
    pub belt: BeltRef,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub kpi: Kpi,
    pub last_viewed: Vec<LastViewed>,
}

#[derive(sqlx::FromRow)]
struct LastViewedRow {
    viewed_at: DateTime<Utc>,
    technique_id: String,
    technique_title: String,
    module_id: String,
    module_title: String,
    belt_id: String,
    belt_code: String,
    belt_name: String,
}

/// GET /api/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<DashboardResponse>> {
    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM techniques t
        JOIN modules m ON m.id = t.module_id
        JOIN belts b ON b.id = m.belt_id
        WHERE t.is_active = 1 AND m.is_active = 1 AND b.is_active = 1
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    let counts = sqlx::query_as::<_, (Mastery, i64)>(
        r#"
        SELECT p.mastery, COUNT(*)
        FROM user_technique_progress p
        JOIN techniques t ON t.id = p.technique_id
        JOIN modules m ON m.id = t.module_id
        JOIN belts b ON b.id = m.belt_id
        WHERE p.user_id = ? AND t.is_active = 1 AND m.is_active = 1 AND b.is_active = 1
        GROUP BY p.mastery
        "#,
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    let last_viewed = sqlx::query_as::<_, LastViewedRow>(
        r#"
        SELECT v.viewed_at,
               t.id AS technique_id, t.title AS technique_title,
               m.id AS module_id, m.title AS module_title,
               b.id AS belt_id, b.code AS belt_code, b.name AS belt_name
        FROM user_technique_views v
        JOIN techniques t ON t.id = v.technique_id
        JOIN modules m ON m.id = t.module_id
        JOIN belts b ON b.id = m.belt_id
        WHERE v.user_id = ?
        ORDER BY v.viewed_at DESC
        LIMIT 10
        "#,
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .map(|r| LastViewed {
        viewed_at: r.viewed_at,
        technique: TitledRef {
            id: r.technique_id,
            title: r.technique_title,
        },
        module: TitledRef {
            id: r.module_id,
            title: r.module_title,
        },
        belt: BeltRef {
            id: r.belt_id,
            code: r.belt_code,
            name: r.belt_name,
        },
    })
    .collect();

    Ok(Json(DashboardResponse {
        kpi: Kpi::from_counts(total, &counts),
        last_viewed,
    }))
}
