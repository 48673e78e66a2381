//! # Xtal Common Library
//!
//! Shared code for the crystal plate ingester:
//! - Error type and result alias
//! - TOML configuration and logging settings
//! - Plate and well models, plate kinds and well position parsing
//! - Visit identifier resolution against the archive
//! - The plate store contract and its SQLite implementation

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod plate_kind;
pub mod visit;

pub use error::{Error, Result};
pub use models::{PlateDescriptor, PlateFilter, WellFilter, WellRecord};
pub use plate_kind::PlateKind;
pub use visit::{VisitError, VisitResolver};
