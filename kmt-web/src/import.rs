//! Bulk curriculum import
//!
//! For every belt in the payload: upsert it by code, delete its modules
//! (techniques and per-technique user state cascade), then recreate modules
//! and techniques in payload order. The whole payload runs in one
//! transaction; a dry run does the same work and rolls back.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use kmt_common::db::curriculum::{
    delete_belt_modules, insert_module, insert_technique, upsert_belt, BeltUpsert, NewModule,
    NewTechnique,
};

use crate::validation::{Validate, ValidationErrors};

#[derive(Debug, Clone, Deserialize)]
pub struct ImportPayload {
    pub belts: Vec<ImportBelt>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBelt {
    pub code: String,
    pub name: String,
    pub order_index: i64,
    pub is_active: Option<bool>,
    pub modules: Vec<ImportModule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportModule {
    pub title: String,
    pub order_index: i64,
    pub is_active: Option<bool>,
    pub techniques: Vec<ImportTechnique>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportTechnique {
    pub title: String,
    pub order_index: i64,
    pub description_rich: Option<String>,
    pub keywords: Option<String>,
    pub is_active: Option<bool>,
}

impl Validate for ImportPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for (bi, belt) in self.belts.iter().enumerate() {
            let bp = format!("belts.{}", bi);
            errors.require(&format!("{}.code", bp), &belt.code);
            errors.require(&format!("{}.name", bp), &belt.name);
            errors.non_negative(&format!("{}.orderIndex", bp), belt.order_index);

            for (mi, module) in belt.modules.iter().enumerate() {
                let mp = format!("{}.modules.{}", bp, mi);
                errors.require(&format!("{}.title", mp), &module.title);
                errors.non_negative(&format!("{}.orderIndex", mp), module.order_index);

                for (ti, technique) in module.techniques.iter().enumerate() {
                    let tp = format!("{}.techniques.{}", mp, ti);
                    errors.require(&format!("{}.title", tp), &technique.title);
                    errors.non_negative(&format!("{}.orderIndex", tp), technique.order_index);
                }
            }
        }
        errors.into_result()
    }
}

/// Counts reported back to the admin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub belts_upserted: u32,
    pub modules_created: u32,
    pub techniques_created: u32,
}

/// Apply an import payload atomically
pub async fn import_curriculum(
    db: &SqlitePool,
    payload: &ImportPayload,
    dry_run: bool,
) -> kmt_common::Result<ImportSummary> {
    let mut tx = db.begin().await?;
    let mut summary = ImportSummary::default();

    for b in &payload.belts {
        let belt = upsert_belt(
            &mut *tx,
            &BeltUpsert {
                code: b.code.clone(),
                name: b.name.clone(),
                order_index: b.order_index,
                is_active: b.is_active.unwrap_or(true),
            },
        )
        .await?;
        summary.belts_upserted += 1;

        delete_belt_modules(&mut *tx, &belt.id).await?;

        for m in &b.modules {
            let module = insert_module(
                &mut *tx,
                &belt.id,
                &NewModule {
                    title: m.title.clone(),
                    order_index: m.order_index,
                    is_active: m.is_active.unwrap_or(true),
                },
            )
            .await?;
            summary.modules_created += 1;

            for t in &m.techniques {
                insert_technique(
                    &mut *tx,
                    &module.id,
                    &NewTechnique {
                        title: t.title.clone(),
                        order_index: t.order_index,
                        description_rich: t.description_rich.clone(),
                        keywords: t.keywords.clone(),
                        is_active: t.is_active.unwrap_or(true),
                    },
                )
                .await?;
                summary.techniques_created += 1;
            }
        }
    }

    if dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }

    info!(
        dry_run,
        belts = summary.belts_upserted,
        modules = summary.modules_created,
        techniques = summary.techniques_created,
        "Curriculum import finished"
    );

    Ok(summary)
}
