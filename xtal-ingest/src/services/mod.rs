//! Ingest engine services
//!
//! - `plate_injector`: barcode → stored plate descriptor
//! - `plate_scanner`: the per-tick plate directory state machine
//! - `archive`: directory surveys and the staged archive copy

pub mod archive;
pub mod plate_injector;
pub mod plate_scanner;

pub use plate_injector::PlateInjector;
pub use plate_scanner::{
    assess_completeness, Completeness, DirectoryOutcome, PlateScanner, ScannerSettings,
    TickReport,
};
