//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and brings the schema up to
//! date. Every statement is idempotent, so this runs on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas set through connect options apply to every pooled connection,
    // foreign_keys in particular (cascades depend on it)
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_users_table(pool).await?;

    // Curriculum
    create_belts_table(pool).await?;
    create_belt_contents_table(pool).await?;
    create_modules_table(pool).await?;
    create_techniques_table(pool).await?;

    // Per-user state
    create_progress_table(pool).await?;
    create_views_table(pool).await?;
    create_preferences_table(pool).await?;

    // Videos
    create_video_assets_table(pool).await?;
    create_technique_video_links_table(pool).await?;
    create_user_technique_videos_table(pool).await?;

    create_admin_audit_log_table(pool).await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'USER' CHECK (role IN ('USER', 'ADMIN')),
            created_at TEXT NOT NULL,
            last_login TEXT,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_belts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS belts (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            order_index INTEGER NOT NULL CHECK (order_index >= 0),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_belt_contents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS belt_contents (
            belt_id TEXT PRIMARY KEY REFERENCES belts(id) ON DELETE CASCADE,
            content_rich TEXT NOT NULL,
            source_ref TEXT,
            updated_by TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_modules_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS modules (
            id TEXT PRIMARY KEY,
            belt_id TEXT NOT NULL REFERENCES belts(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            order_index INTEGER NOT NULL CHECK (order_index >= 0),
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_modules_belt ON modules(belt_id, order_index)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_techniques_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS techniques (
            id TEXT PRIMARY KEY,
            module_id TEXT NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            order_index INTEGER NOT NULL CHECK (order_index >= 0),
            description_rich TEXT,
            keywords TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_techniques_module ON techniques(module_id, order_index)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_technique_progress (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            technique_id TEXT NOT NULL REFERENCES techniques(id) ON DELETE CASCADE,
            mastery TEXT NOT NULL CHECK (mastery IN ('NOT_SEEN', 'SEEN', 'KNOWN', 'MASTERED')),
            notes TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, technique_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_views_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_technique_views (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            technique_id TEXT NOT NULL REFERENCES techniques(id) ON DELETE CASCADE,
            viewed_at TEXT NOT NULL,
            PRIMARY KEY (user_id, technique_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_views_recent ON user_technique_views(user_id, viewed_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_preferences_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_preferences (
            user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            default_belt_id TEXT REFERENCES belts(id) ON DELETE SET NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_video_assets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS video_assets (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            storage_key TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('PROCESSING', 'READY', 'FAILED')),
            format TEXT NOT NULL,
            size INTEGER NOT NULL,
            created_by_user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_technique_video_links_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS technique_video_links (
            technique_id TEXT PRIMARY KEY REFERENCES techniques(id) ON DELETE CASCADE,
            video_asset_id TEXT NOT NULL REFERENCES video_assets(id) ON DELETE CASCADE,
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_technique_videos_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_technique_videos (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            technique_id TEXT NOT NULL REFERENCES techniques(id) ON DELETE CASCADE,
            slot TEXT NOT NULL CHECK (slot IN ('BEGINNER', 'PROGRESS')),
            video_asset_id TEXT NOT NULL REFERENCES video_assets(id) ON DELETE CASCADE,
            is_active INTEGER NOT NULL DEFAULT 1,
            deleted_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live video per (user, technique, slot); deleted rows are history
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_user_videos_live
        ON user_technique_videos(user_id, technique_id, slot)
        WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_admin_audit_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS admin_audit_log (
            id TEXT PRIMARY KEY,
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            meta TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
