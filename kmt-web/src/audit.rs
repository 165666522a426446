//! Admin audit trail
//!
//! Write failures are logged and swallowed: the admin action already
//! succeeded and must not be reported as failed.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

pub const UPSERT_BELT: &str = "UPSERT_BELT";
pub const UPSERT_BELT_CONTENT: &str = "UPSERT_BELT_CONTENT";
pub const IMPORT_CURRICULUM: &str = "IMPORT_CURRICULUM";
pub const UPSERT_COACH_VIDEO: &str = "UPSERT_COACH_VIDEO";
pub const DISABLE_COACH_VIDEO: &str = "DISABLE_COACH_VIDEO";

/// Record an admin action
pub async fn log_admin_action(db: &SqlitePool, actor_id: &str, action: &str, meta: Option<Value>) {
    let result = sqlx::query(
        "INSERT INTO admin_audit_log (id, actor_id, action, meta, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(actor_id)
    .bind(action)
    .bind(meta.map(|m| m.to_string()))
    .bind(Utc::now())
    .execute(db)
    .await;

    if let Err(e) = result {
        warn!(actor_id, action, error = %e, "Failed to write admin audit log");
    }
}
