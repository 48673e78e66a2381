//! SQLite implementation of the plate store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use super::PlateStore;
use crate::models::{PlateDescriptor, PlateFilter, WellFilter, WellRecord};
use crate::{Error, PlateKind, Result};

/// Plate store backed by a SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store file and its tables
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = super::init_database(db_path).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl PlateStore for SqliteStore {
    async fn fetch_plates(&self, filter: &PlateFilter) -> Result<Vec<PlateDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT uuid, barcode, visit, plate_kind, registry_plate_id, collected_stem, error, created_at
            FROM crystal_plates
            WHERE (?1 IS NULL OR registry_plate_id > ?1)
              AND (?2 IS NULL OR barcode = ?2)
            ORDER BY registry_plate_id, created_at, barcode
            "#,
        )
        .bind(filter.from_registry_plate_id)
        .bind(filter.barcode.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(plate_from_row).collect()
    }

    async fn upsert_plates(&self, plates: &[PlateDescriptor]) -> Result<()> {
        if plates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for plate in plates {
            sqlx::query(
                r#"
                INSERT INTO crystal_plates
                    (uuid, barcode, visit, plate_kind, registry_plate_id, collected_stem, error, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(barcode) DO UPDATE SET
                    visit = excluded.visit,
                    plate_kind = excluded.plate_kind,
                    registry_plate_id = excluded.registry_plate_id,
                    collected_stem = COALESCE(crystal_plates.collected_stem, excluded.collected_stem),
                    error = excluded.error,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(plate.uuid.to_string())
            .bind(&plate.barcode)
            .bind(plate.visit.as_deref())
            .bind(plate.plate_kind.map(|kind| kind.registry_name()))
            .bind(plate.registry_plate_id)
            .bind(plate.collected_stem.as_deref())
            .bind(plate.error.as_deref())
            .bind(plate.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(count = plates.len(), "Upserted crystal plates");
        Ok(())
    }

    async fn upsert_wells(&self, wells: &[WellRecord]) -> Result<()> {
        if wells.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for well in wells {
            let result = sqlx::query(
                r#"
                INSERT INTO crystal_wells
                    (uuid, position, filename, plate_uuid, width, height, error, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(filename) DO NOTHING
                "#,
            )
            .bind(well.uuid.to_string())
            .bind(well.position.as_deref())
            .bind(&well.filename)
            .bind(well.plate_uuid.to_string())
            .bind(well.width.map(i64::from))
            .bind(well.height.map(i64::from))
            .bind(well.error.as_deref())
            .bind(well.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;

        tracing::debug!(
            offered = wells.len(),
            inserted,
            "Upserted crystal wells"
        );
        Ok(())
    }

    async fn fetch_wells(&self, filter: &WellFilter) -> Result<Vec<WellRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT uuid, position, filename, plate_uuid, width, height, error, created_at
            FROM crystal_wells
            WHERE (?1 IS NULL OR plate_uuid = ?1)
            ORDER BY filename
            "#,
        )
        .bind(filter.plate_uuid.map(|uuid| uuid.to_string()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(well_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn plate_from_row(row: &SqliteRow) -> Result<PlateDescriptor> {
    let plate_kind = row
        .try_get::<Option<String>, _>("plate_kind")?
        .map(|name| name.parse::<PlateKind>())
        .transpose()?;

    Ok(PlateDescriptor {
        uuid: parse_uuid(&row.try_get::<String, _>("uuid")?)?,
        barcode: row.try_get("barcode")?,
        visit: row.try_get("visit")?,
        plate_kind,
        registry_plate_id: row.try_get("registry_plate_id")?,
        collected_stem: row.try_get("collected_stem")?,
        error: row.try_get("error")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn well_from_row(row: &SqliteRow) -> Result<WellRecord> {
    Ok(WellRecord {
        uuid: parse_uuid(&row.try_get::<String, _>("uuid")?)?,
        position: row.try_get("position")?,
        filename: row.try_get("filename")?,
        plate_uuid: parse_uuid(&row.try_get::<String, _>("plate_uuid")?)?,
        width: to_dimension(row.try_get("width")?)?,
        height: to_dimension(row.try_get("height")?)?,
        error: row.try_get("error")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidInput(format!("Bad uuid '{}': {}", value, e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Bad timestamp '{}': {}", value, e)))
}

fn to_dimension(value: Option<i64>) -> Result<Option<u32>> {
    value
        .map(|v| u32::try_from(v).map_err(|_| Error::InvalidInput(format!("Bad dimension {}", v))))
        .transpose()
}
