//! Plate and well records held by the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PlateKind;

/// A crystal plate as known to the ingester
///
/// Created the first time a barcode is looked up and never deleted. Negative
/// lookups (unknown barcode, bad visit) are stored too, with `error` set, so
/// the registry is asked about each barcode at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateDescriptor {
    pub uuid: Uuid,
    /// Unique within the store
    pub barcode: String,
    pub visit: Option<String>,
    pub plate_kind: Option<PlateKind>,
    /// Registry primary key; the scanner's watermark follows it
    pub registry_plate_id: Option<i64>,
    /// Stem of the plate directory first seen for this plate. Write-once.
    pub collected_stem: Option<String>,
    /// Classification error; a plate with an error is never promoted
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PlateDescriptor {
    /// New descriptor for a barcode with nothing else known yet
    pub fn new(barcode: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            barcode: barcode.into(),
            visit: None,
            plate_kind: None,
            registry_plate_id: None,
            collected_stem: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Descriptor recording a classification error
    pub fn with_error(barcode: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(barcode)
        }
    }
}

/// One imaged drop location on a plate
///
/// `filename` is where the image lives in the visit archive, not where it was
/// discovered. Wells are created once and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellRecord {
    pub uuid: Uuid,
    pub position: Option<String>,
    pub filename: String,
    pub plate_uuid: Uuid,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WellRecord {
    pub fn new(plate_uuid: Uuid, filename: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            position: None,
            filename: filename.into(),
            plate_uuid,
            width: None,
            height: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Plate query filter
///
/// `from_registry_plate_id` is exclusive: only plates whose registry id is
/// strictly greater are returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlateFilter {
    pub from_registry_plate_id: Option<i64>,
    pub barcode: Option<String>,
}

impl PlateFilter {
    pub fn from_id(id: i64) -> Self {
        Self {
            from_registry_plate_id: Some(id),
            ..Default::default()
        }
    }

    pub fn barcode(barcode: impl Into<String>) -> Self {
        Self {
            barcode: Some(barcode.into()),
            ..Default::default()
        }
    }
}

/// Well query filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WellFilter {
    pub plate_uuid: Option<Uuid>,
}
