//! Plate kinds
//!
//! A plate kind decides how many well images make a complete plate and how a
//! well position is read out of an image filename.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::Error;

/// Crystallization plate formats known to the ingester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateKind {
    /// SWISSCI 96-well plate with three drops per well
    Swissci3Drop,
    /// MRC 96-well plate with two drops per well
    Mrc2Drop,
    /// MiTeGen in-situ 96-well plate with a single drop per well
    MitegenInsitu1Drop,
}

impl PlateKind {
    /// Every kind, in registry allow-list order
    pub const ALL: [PlateKind; 3] = [
        PlateKind::Swissci3Drop,
        PlateKind::Mrc2Drop,
        PlateKind::MitegenInsitu1Drop,
    ];

    /// Plate type name as stored in the registry
    pub fn registry_name(&self) -> &'static str {
        match self {
            PlateKind::Swissci3Drop => "SWISSci_3drop",
            PlateKind::Mrc2Drop => "MRC_2drop",
            PlateKind::MitegenInsitu1Drop => "MiTInSitu_1drop",
        }
    }

    /// Look up a kind by its registry plate type name
    pub fn from_registry_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.registry_name().eq_ignore_ascii_case(name.trim()))
    }

    /// Wells per plate (rows × columns)
    pub fn well_count(&self) -> usize {
        96
    }

    /// Drops imaged per well
    pub fn drops_per_well(&self) -> usize {
        match self {
            PlateKind::Swissci3Drop => 3,
            PlateKind::Mrc2Drop => 2,
            PlateKind::MitegenInsitu1Drop => 1,
        }
    }

    /// Number of images expected once a plate has been fully imaged
    pub fn expected_image_count(&self) -> usize {
        self.well_count() * self.drops_per_well()
    }

    /// Normalized well position for an image file
    ///
    /// Image stems look like `<barcode>_<well>_<drop>`. Multi-drop plates give
    /// `"<WELL><drop>"` (e.g. `98ab_A01_2.jpg` → `A012`); single-drop plates give
    /// `"<WELL>"` and accept a missing drop suffix.
    pub fn parse_position(&self, filename: &Path) -> Option<String> {
        let stem = filename.file_stem()?.to_str()?;
        let mut parts = stem.split('_');

        let _barcode = parts.next()?;
        let well = parts.next().filter(|w| !w.is_empty())?;
        if !well.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        let well = well.to_ascii_uppercase();

        let drop = parts.next();
        if parts.next().is_some() {
            return None;
        }

        match (self.drops_per_well(), drop) {
            (1, None) => Some(well),
            (1, Some("1")) => Some(well),
            (drops, Some(drop)) => {
                let index: usize = drop.parse().ok()?;
                if index == 0 || index > drops {
                    return None;
                }
                Some(format!("{}{}", well, index))
            }
            _ => None,
        }
    }
}

impl fmt::Display for PlateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.registry_name())
    }
}

impl FromStr for PlateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_registry_name(s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown plate kind: {}", s)))
    }
}
