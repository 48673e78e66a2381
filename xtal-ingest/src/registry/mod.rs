//! Plate registry client
//!
//! Read-only access to the external registry that maps barcodes to plate and
//! experiment metadata. Two sources sit behind one client:
//! - `SqlSource`: the live registry database
//! - `FixtureSource`: seeded rows, for environments without a registry
//!
//! The client keeps a watermark: the highest registry plate id it has pulled
//! in an incremental refresh. Every row at or below the watermark is already
//! held in the client's row cache, so live queries only ever ask for ids above
//! it. The watermark never moves backwards.

pub mod fixture;
pub mod sql;

pub use fixture::FixtureSource;
pub use sql::SqlSource;
pub use xtal_common::config::RegistryRow;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use xtal_common::config::RegistryConfig;
use xtal_common::PlateKind;

/// Registry client errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registry could not be reached; retry later
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// Registry answered but the query or its rows were unusable
    #[error("Registry query failed: {0}")]
    Query(String),

    /// Registry backend misconfigured
    #[error("Registry configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Unavailable(_))
    }
}

/// A backend able to answer registry queries
///
/// Both methods exclude rows whose id is at or below `watermark`, and only
/// return rows in the configured project folder whose plate type is allowed.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// All rows above the watermark, ascending by id
    async fn rows_after(&self, watermark: i64) -> Result<Vec<RegistryRow>, RegistryError>;

    /// The row for one barcode, if it is above the watermark
    ///
    /// A barcode registered more than once resolves to its highest id.
    async fn barcode_after(
        &self,
        barcode: &str,
        watermark: i64,
    ) -> Result<Option<RegistryRow>, RegistryError>;

    /// Short description for logs
    fn describe(&self) -> String;
}

#[derive(Debug, Default)]
struct ClientState {
    watermark: i64,
    rows_by_barcode: HashMap<String, RegistryRow>,
}

/// Incremental, read-only registry client
///
/// The watermark and row cache live in memory. A new client starts at
/// watermark 0, so the first `refresh()` after a restart pulls every row in
/// the project folder again. Seeding it from the store instead would hide
/// plates registered before the highest stored id but imaged later.
pub struct PlateRegistryClient {
    source: Box<dyn RegistrySource>,
    state: Mutex<ClientState>,
}

impl PlateRegistryClient {
    pub fn new(source: Box<dyn RegistrySource>) -> Self {
        Self {
            source,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Build the client selected by configuration
    pub fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let source: Box<dyn RegistrySource> = match config {
            RegistryConfig::Sql {
                url,
                project_folder,
                plate_types,
            } => Box::new(SqlSource::connect_lazy(
                url,
                project_folder.clone(),
                allowed_plate_types(plate_types.as_deref()),
            )?),
            RegistryConfig::Fixture {
                project_folder,
                plate_types,
                rows,
            } => Box::new(FixtureSource::new(
                rows.clone(),
                project_folder.clone(),
                allowed_plate_types(plate_types.as_deref()),
            )),
        };

        tracing::info!(registry = %source.describe(), "Registry client configured");
        Ok(Self::new(source))
    }

    /// Highest registry plate id pulled so far
    pub async fn watermark(&self) -> i64 {
        self.state.lock().await.watermark
    }

    /// Pull every row registered since the last refresh
    ///
    /// Returns the number of new rows. The watermark advances to the highest
    /// id seen.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let watermark = self.watermark().await;
        let rows = self.source.rows_after(watermark).await?;

        let mut state = self.state.lock().await;
        let count = rows.len();
        for row in rows {
            state.watermark = state.watermark.max(row.registry_plate_id);
            state.rows_by_barcode.insert(row.barcode.clone(), row);
        }

        if count > 0 {
            tracing::debug!(
                new_rows = count,
                watermark = state.watermark,
                "Registry refreshed"
            );
        }

        Ok(count)
    }

    /// Registry row for a barcode
    ///
    /// Served from the row cache when the barcode was pulled by a refresh;
    /// otherwise the source is asked for rows above the watermark.
    pub async fn query_barcode(&self, barcode: &str) -> Result<Option<RegistryRow>, RegistryError> {
        let watermark = {
            let state = self.state.lock().await;
            if let Some(row) = state.rows_by_barcode.get(barcode) {
                return Ok(Some(row.clone()));
            }
            state.watermark
        };

        let row = self.source.barcode_after(barcode, watermark).await?;

        if let Some(row) = &row {
            // Cached, but the watermark only follows contiguous refreshes
            self.state
                .lock()
                .await
                .rows_by_barcode
                .insert(row.barcode.clone(), row.clone());
        }

        Ok(row)
    }
}

/// Plate type names accepted from the registry
///
/// Defaults to every plate kind the ingester knows how to handle.
pub fn allowed_plate_types(configured: Option<&[String]>) -> Vec<String> {
    match configured {
        Some(types) if !types.is_empty() => types.to_vec(),
        _ => PlateKind::ALL
            .iter()
            .map(|kind| kind.registry_name().to_string())
            .collect(),
    }
}
