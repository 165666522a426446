//! Demo curriculum
//!
//! Safe to run repeatedly: belts are upserted by code, the sample module is
//! only created when the yellow belt has none.

use sqlx::SqlitePool;
use tracing::info;

use super::curriculum::{
    insert_module, insert_technique, upsert_belt, upsert_belt_content, BeltUpsert, NewModule,
    NewTechnique,
};
use crate::Result;

const DEMO_BELTS: [(&str, &str, i64); 6] = [
    ("JAUNE", "Jaune", 1),
    ("ORANGE", "Orange", 2),
    ("VERTE", "Verte", 3),
    ("BLEUE", "Bleue", 4),
    ("MARRON", "Marron", 5),
    ("NOIRE_1_DARGA", "Noire 1ère Darga", 6),
];

const SAMPLE_MODULE: &str = "UV1 — Coups donnés sans appel (extrait)";

const SAMPLE_TECHNIQUES: [&str; 3] = [
    "Coup de tête",
    "Coup direct (poing/paume/en pique)",
    "Crochet",
];

const YELLOW_CONTENT: &str =
    "## Contenu ceinture Jaune\n\nÀ importer depuis le contenu fourni par le client.";

/// What a seed run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub belts_upserted: usize,
    pub techniques_created: usize,
}

/// Insert the demo belts, a sample yellow-belt module and placeholder content
pub async fn seed_demo_curriculum(pool: &SqlitePool) -> Result<SeedReport> {
    let mut tx = pool.begin().await?;
    let mut report = SeedReport::default();
    let mut yellow_id = None;

    for (code, name, order_index) in DEMO_BELTS {
        let belt = upsert_belt(
            &mut *tx,
            &BeltUpsert {
                code: code.to_string(),
                name: name.to_string(),
                order_index,
                is_active: true,
            },
        )
        .await?;
        report.belts_upserted += 1;
        if code == "JAUNE" {
            yellow_id = Some(belt.id);
        }
    }

    if let Some(yellow_id) = yellow_id {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM modules WHERE belt_id = ?")
            .bind(&yellow_id)
            .fetch_one(&mut *tx)
            .await?;

        if existing == 0 {
            let module = insert_module(
                &mut *tx,
                &yellow_id,
                &NewModule {
                    title: SAMPLE_MODULE.to_string(),
                    order_index: 1,
                    is_active: true,
                },
            )
            .await?;

            for (i, title) in SAMPLE_TECHNIQUES.iter().enumerate() {
                insert_technique(
                    &mut *tx,
                    &module.id,
                    &NewTechnique {
                        title: title.to_string(),
                        order_index: i as i64 + 1,
                        description_rich: Some("Description à compléter.".to_string()),
                        keywords: None,
                        is_active: true,
                    },
                )
                .await?;
                report.techniques_created += 1;
            }
        }

        upsert_belt_content(
            &mut *tx,
            &yellow_id,
            YELLOW_CONTENT,
            Some("Livre (contenu fourni)"),
            None,
        )
        .await?;
    }

    tx.commit().await?;

    info!(
        belts = report.belts_upserted,
        techniques = report.techniques_created,
        "Seeded demo curriculum"
    );

    Ok(report)
}
