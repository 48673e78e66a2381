//! Fixture registry backend
//!
//! Serves rows seeded from configuration with the same filtering and
//! watermark rules as the live backend.

use async_trait::async_trait;

use super::{RegistryError, RegistryRow, RegistrySource};

pub struct FixtureSource {
    rows: Vec<RegistryRow>,
    project_folder: String,
    plate_types: Vec<String>,
}

impl FixtureSource {
    pub fn new(mut rows: Vec<RegistryRow>, project_folder: String, plate_types: Vec<String>) -> Self {
        rows.sort_by_key(|row| row.registry_plate_id);
        Self {
            rows,
            project_folder,
            plate_types,
        }
    }

    fn visible(&self, watermark: i64) -> impl Iterator<Item = &RegistryRow> + '_ {
        self.rows.iter().filter(move |row| {
            row.registry_plate_id > watermark
                && row.project_folder == self.project_folder
                && self.plate_types.iter().any(|t| t == &row.plate_type)
        })
    }
}

#[async_trait]
impl RegistrySource for FixtureSource {
    async fn rows_after(&self, watermark: i64) -> Result<Vec<RegistryRow>, RegistryError> {
        Ok(self.visible(watermark).cloned().collect())
    }

    async fn barcode_after(
        &self,
        barcode: &str,
        watermark: i64,
    ) -> Result<Option<RegistryRow>, RegistryError> {
        Ok(self
            .visible(watermark)
            .filter(|row| row.barcode == barcode)
            .last()
            .cloned())
    }

    fn describe(&self) -> String {
        format!(
            "fixture ({} rows, project {})",
            self.rows.len(),
            self.project_folder
        )
    }
}
