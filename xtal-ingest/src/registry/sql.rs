//! Live registry backend
//!
//! Reads the registry's relational tables:
//!
//! ```text
//! Plate(ID, Barcode, ExperimentID)
//! Experiment(ID, Name, PlateTypeID, ProjectID)
//! PlateType(ID, Name)
//! Project(ID, Name)
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::time::Duration;

use super::{RegistryError, RegistryRow, RegistrySource};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SqlSource {
    pool: SqlitePool,
    url: String,
    project_folder: String,
    plate_types: Vec<String>,
}

impl SqlSource {
    /// Configure the connection without opening it
    ///
    /// The registry may be down when the service starts; connection failures
    /// surface on the first query as `RegistryError::Unavailable`.
    pub fn connect_lazy(
        url: &str,
        project_folder: String,
        plate_types: Vec<String>,
    ) -> Result<Self, RegistryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(url)
            .map_err(|e| RegistryError::Config(format!("Invalid registry url '{}': {}", url, e)))?;

        Ok(Self {
            pool,
            url: url.to_string(),
            project_folder,
            plate_types,
        })
    }

    fn select(&self, watermark: i64, barcode: Option<&str>) -> QueryBuilder<'static, Sqlite> {
        let mut builder = QueryBuilder::new(
            "SELECT Plate.ID AS registry_plate_id, \
                    Plate.Barcode AS barcode, \
                    Experiment.Name AS experiment_name, \
                    PlateType.Name AS plate_type, \
                    Project.Name AS project_folder \
             FROM Plate \
             JOIN Experiment ON Experiment.ID = Plate.ExperimentID \
             JOIN PlateType ON PlateType.ID = Experiment.PlateTypeID \
             JOIN Project ON Project.ID = Experiment.ProjectID \
             WHERE Project.Name = ",
        );
        builder.push_bind(self.project_folder.clone());

        builder.push(" AND PlateType.Name IN (");
        let mut separated = builder.separated(", ");
        for plate_type in &self.plate_types {
            separated.push_bind(plate_type.clone());
        }
        separated.push_unseparated(")");

        builder.push(" AND Plate.ID > ");
        builder.push_bind(watermark);

        match barcode {
            // Latest registration wins, as it does when refreshed rows are cached
            Some(barcode) => {
                builder.push(" AND Plate.Barcode = ");
                builder.push_bind(barcode.to_string());
                builder.push(" ORDER BY Plate.ID DESC");
            }
            None => {
                builder.push(" ORDER BY Plate.ID");
            }
        }
        builder
    }
}

#[async_trait]
impl RegistrySource for SqlSource {
    async fn rows_after(&self, watermark: i64) -> Result<Vec<RegistryRow>, RegistryError> {
        let mut builder = self.select(watermark, None);
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.iter().map(row_from_sql).collect()
    }

    async fn barcode_after(
        &self,
        barcode: &str,
        watermark: i64,
    ) -> Result<Option<RegistryRow>, RegistryError> {
        let mut builder = self.select(watermark, Some(barcode));
        builder.push(" LIMIT 1");

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(row_from_sql).transpose()
    }

    fn describe(&self) -> String {
        format!("sql {} (project {})", self.url, self.project_folder)
    }
}

fn row_from_sql(row: &SqliteRow) -> Result<RegistryRow, RegistryError> {
    let read = |e: sqlx::Error| RegistryError::Query(format!("Unexpected registry row: {}", e));

    Ok(RegistryRow {
        registry_plate_id: row.try_get("registry_plate_id").map_err(read)?,
        barcode: row.try_get("barcode").map_err(read)?,
        // A missing experiment name fails visit derivation downstream
        experiment_name: row
            .try_get::<Option<String>, _>("experiment_name")
            .map_err(read)?
            .unwrap_or_default(),
        plate_type: row.try_get("plate_type").map_err(read)?,
        project_folder: row.try_get("project_folder").map_err(read)?,
    })
}

/// Split connectivity failures from genuine query failures
fn classify(err: sqlx::Error) -> RegistryError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RegistryError::Unavailable(err.to_string()),
        sqlx::Error::Database(db) if is_connectivity_code(db.code().as_deref()) => {
            RegistryError::Unavailable(err.to_string())
        }
        _ => RegistryError::Query(err.to_string()),
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN, including their extended codes
fn is_connectivity_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .map(|c| matches!(c & 0xff, 5 | 6 | 14))
        .unwrap_or(false)
}
