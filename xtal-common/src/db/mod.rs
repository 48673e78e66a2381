//! Plate store
//!
//! The ingester only needs a small CRUD contract from its store; `PlateStore`
//! is that contract and `SqliteStore` the implementation the service ships.

pub mod init;
pub mod sqlite;

pub use init::init_database;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::models::{PlateDescriptor, PlateFilter, WellFilter, WellRecord};
use crate::Result;

/// Persistent plate and well storage
#[async_trait]
pub trait PlateStore: Send + Sync {
    /// Plates matching the filter, ordered by registry plate id ascending
    async fn fetch_plates(&self, filter: &PlateFilter) -> Result<Vec<PlateDescriptor>>;

    /// Insert or update plates keyed by barcode
    ///
    /// The uuid of an existing plate is kept, and a stored `collected_stem` is
    /// never overwritten.
    async fn upsert_plates(&self, plates: &[PlateDescriptor]) -> Result<()>;

    /// Insert wells keyed by filename; wells already present are left as they are
    async fn upsert_wells(&self, wells: &[WellRecord]) -> Result<()>;

    /// Wells matching the filter, ordered by filename
    async fn fetch_wells(&self, filter: &WellFilter) -> Result<Vec<WellRecord>>;

    /// Release connections
    async fn close(&self);
}
