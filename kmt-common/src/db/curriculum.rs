//! Curriculum writes shared by the admin API, the bulk import and the seed
//!
//! Functions take any SQLite executor so they run equally against the pool
//! or inside a transaction (`&mut *tx`).

use chrono::Utc;
use sqlx::{Executor, Sqlite};
use uuid::Uuid;

use super::models::{Belt, BeltContent, Module, Technique};
use crate::Result;

/// Belt fields written by an upsert keyed on `code`
#[derive(Debug, Clone)]
pub struct BeltUpsert {
    pub code: String,
    pub name: String,
    pub order_index: i64,
    pub is_active: bool,
}

/// New module under an existing belt
#[derive(Debug, Clone)]
pub struct NewModule {
    pub title: String,
    pub order_index: i64,
    pub is_active: bool,
}

/// New technique under an existing module
#[derive(Debug, Clone)]
pub struct NewTechnique {
    pub title: String,
    pub order_index: i64,
    pub description_rich: Option<String>,
    pub keywords: Option<String>,
    pub is_active: bool,
}

/// Insert a belt or update name/order/active flag of the belt with the same code
pub async fn upsert_belt<'e, E>(executor: E, belt: &BeltUpsert) -> Result<Belt>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();
    let row = sqlx::query_as::<_, Belt>(
        r#"
        INSERT INTO belts (id, code, name, order_index, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            order_index = excluded.order_index,
            is_active = excluded.is_active,
            updated_at = excluded.updated_at
        RETURNING id, code, name, order_index, is_active, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&belt.code)
    .bind(&belt.name)
    .bind(belt.order_index)
    .bind(belt.is_active)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Delete every module of a belt. Techniques and the per-user state attached
/// to them go with it through `ON DELETE CASCADE`.
pub async fn delete_belt_modules<'e, E>(executor: E, belt_id: &str) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM modules WHERE belt_id = ?")
        .bind(belt_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn insert_module<'e, E>(executor: E, belt_id: &str, module: &NewModule) -> Result<Module>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, Module>(
        r#"
        INSERT INTO modules (id, belt_id, title, order_index, is_active)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, belt_id, title, order_index, is_active
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(belt_id)
    .bind(&module.title)
    .bind(module.order_index)
    .bind(module.is_active)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

pub async fn insert_technique<'e, E>(
    executor: E,
    module_id: &str,
    technique: &NewTechnique,
) -> Result<Technique>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, Technique>(
        r#"
        INSERT INTO techniques (id, module_id, title, order_index, description_rich, keywords, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id, module_id, title, order_index, description_rich, keywords, is_active
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(module_id)
    .bind(&technique.title)
    .bind(technique.order_index)
    .bind(&technique.description_rich)
    .bind(&technique.keywords)
    .bind(technique.is_active)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Insert or replace the rich-text content attached to a belt
pub async fn upsert_belt_content<'e, E>(
    executor: E,
    belt_id: &str,
    content_rich: &str,
    source_ref: Option<&str>,
    updated_by: Option<&str>,
) -> Result<BeltContent>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, BeltContent>(
        r#"
        INSERT INTO belt_contents (belt_id, content_rich, source_ref, updated_by, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(belt_id) DO UPDATE SET
            content_rich = excluded.content_rich,
            source_ref = excluded.source_ref,
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at
        RETURNING belt_id, content_rich, source_ref, updated_by, updated_at
        "#,
    )
    .bind(belt_id)
    .bind(content_rich)
    .bind(source_ref)
    .bind(updated_by)
    .bind(Utc::now())
    .fetch_one(executor)
    .await?;

    Ok(row)
}
