//! Database initialization
//!
//! Opens (or creates) the SQLite store and makes sure the plate and well
//! tables exist. Safe to call on every start.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open the store at `db_path`, creating the file and tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    // WAL lets the HTTP front end read while the scanner writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// Create the plate and well tables (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_crystal_plates_table(pool).await?;
    create_crystal_wells_table(pool).await?;
    Ok(())
}

async fn create_crystal_plates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crystal_plates (
            uuid TEXT PRIMARY KEY,
            barcode TEXT NOT NULL UNIQUE,
            visit TEXT,
            plate_kind TEXT,
            registry_plate_id INTEGER,
            collected_stem TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crystal_plates_registry_id ON crystal_plates(registry_plate_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_crystal_wells_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crystal_wells (
            uuid TEXT PRIMARY KEY,
            position TEXT,
            filename TEXT NOT NULL UNIQUE,
            plate_uuid TEXT NOT NULL REFERENCES crystal_plates(uuid),
            width INTEGER,
            height INTEGER,
            error TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crystal_wells_plate ON crystal_wells(plate_uuid)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
