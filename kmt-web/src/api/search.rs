//! Technique search
//!
//! Case-insensitive substring match on title and keywords. Results rank an
//! exact title match first, then title prefix, then title substring, then
//! keyword-only matches; ties follow curriculum order.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use kmt_common::Mastery;

use super::auth::CurrentUser;
use super::progress::{
    parse_mastery_filter, push_curriculum_from, push_mastery_filter, CurriculumRow,
    CURRICULUM_COLUMNS,
};
use super::{BeltRef, TitledRef};
use crate::error::ApiResult;
use crate::validation::non_empty;
use crate::AppState;

const SEARCH_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub q: Option<String>,
    pub belt_id: Option<String>,
    pub module_id: Option<String>,
    pub mastery: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub mastery: Mastery,
    pub belt: BeltRef,
    pub module: TitledRef,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// Escape `LIKE` wildcards so user input matches literally (`ESCAPE '\'`)
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// GET /api/search
pub async fn search(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default().to_string();
    let belt_id = non_empty(query.belt_id);
    let module_id = non_empty(query.module_id);
    let mastery = parse_mastery_filter(query.mastery)?;

    if q.is_empty() && belt_id.is_none() {
        return Ok(Json(SearchResponse { results: Vec::new() }));
    }

    let escaped = escape_like(&q);
    let exact = escaped.clone();
    let prefix = format!("{}%", escaped);
    let contains = format!("%{}%", escaped);

    let mut qb = QueryBuilder::<Sqlite>::new(CURRICULUM_COLUMNS);
    push_curriculum_from(&mut qb, &user.id);

    if let Some(belt_id) = belt_id.as_deref() {
        qb.push(" AND b.id = ");
        qb.push_bind(belt_id);
    }
    if let Some(module_id) = module_id.as_deref() {
        qb.push(" AND m.id = ");
        qb.push_bind(module_id);
    }
    if let Some(mastery) = mastery {
        push_mastery_filter(&mut qb, mastery);
    }

    if q.is_empty() {
        qb.push(" ORDER BY b.order_index, m.order_index, t.order_index");
    } else {
        qb.push(" AND (t.title LIKE ");
        qb.push_bind(contains.as_str());
        qb.push(r" ESCAPE '\' OR COALESCE(t.keywords, '') LIKE ");
        qb.push_bind(contains.as_str());
        qb.push(r" ESCAPE '\')");

        qb.push(" ORDER BY CASE WHEN t.title LIKE ");
        qb.push_bind(exact.as_str());
        qb.push(r" ESCAPE '\' THEN 0 WHEN t.title LIKE ");
        qb.push_bind(prefix.as_str());
        qb.push(r" ESCAPE '\' THEN 1 WHEN t.title LIKE ");
        qb.push_bind(contains.as_str());
        qb.push(r" ESCAPE '\' THEN 2 ELSE 3 END, b.order_index, m.order_index, t.order_index");
    }
    qb.push(" LIMIT ");
    qb.push_bind(SEARCH_LIMIT);

    let rows: Vec<CurriculumRow> = qb.build_query_as().fetch_all(&state.db).await?;
    let results = rows
        .into_iter()
        .map(|r| SearchResult {
            id: r.technique_id,
            title: r.technique_title,
            mastery: r.mastery,
            belt: BeltRef {
                id: r.belt_id,
                code: r.belt_code,
                name: r.belt_name,
            },
            module: TitledRef {
                id: r.module_id,
                title: r.module_title,
            },
        })
        .collect();

    Ok(Json(SearchResponse { results }))
}
