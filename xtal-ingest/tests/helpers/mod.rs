//! Shared test fixtures: temporary source/archive trees, registry rows and
//! plate image directories.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use xtal_common::config::{
    CollectorConfig, CollectorKind, HttpConfig, IngestConfig, LoggingConfig, RegistryConfig,
    RegistryRow, StartAs,
};
use xtal_common::db::SqliteStore;
use xtal_common::PlateKind;
use xtal_ingest::registry::{
    allowed_plate_types, FixtureSource, PlateRegistryClient, RegistryError, RegistrySource,
};
use xtal_ingest::services::ScannerSettings;

pub const VISIT: &str = "cm00001-1";
pub const GOOD_EXPERIMENT: &str = "cm00001-1_something#else";
pub const BAD_EXPERIMENT: &str = "Xcm00001-1_otherstuff";

pub const IMAGE_WIDTH: u32 = 8;
pub const IMAGE_HEIGHT: u32 = 6;

/// Temporary imager output, visit archive and store
pub struct Scenario {
    pub temp: TempDir,
    pub source: PathBuf,
    pub visits: PathBuf,
    pub database: PathBuf,
}

impl Scenario {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("Failed to create temp dir");
        let source = temp.path().join("SubwellImages");
        let visits = temp.path().join("visits");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&visits).unwrap();
        let database = temp.path().join("xtal.db");

        Self {
            temp,
            source,
            visits,
            database,
        }
    }

    /// Create the archive directory of a visit
    pub fn create_visit(&self, visit: &str) -> PathBuf {
        let (proposal, _) = visit.split_once('-').unwrap();
        let directory = self.visits.join(proposal).join(visit);
        std::fs::create_dir_all(&directory).unwrap();
        directory
    }

    /// Where a plate directory lands once promoted
    pub fn destination(&self, visit: &str, name: &str) -> PathBuf {
        let (proposal, _) = visit.split_once('-').unwrap();
        self.visits
            .join(proposal)
            .join(visit)
            .join("SubwellImages")
            .join(name)
    }

    /// Plate directory under the source root holding `count` images
    pub fn plate_directory(&self, name: &str, count: usize) -> PathBuf {
        let directory = self.source.join(name);
        write_plate_images(&directory, &name[..4], count);
        directory
    }

    pub fn settings(&self, allow: Option<&[&str]>) -> ScannerSettings {
        ScannerSettings::from_config(&self.collector_config(allow))
    }

    pub fn collector_config(&self, allow: Option<&[&str]>) -> CollectorConfig {
        CollectorConfig {
            kind: CollectorKind::Manual,
            start_as: StartAs::Task,
            source_directories: vec![self.source.clone()],
            visits_root: self.visits.clone(),
            plates_subdirectory: PathBuf::from("SubwellImages"),
            ingest_only_barcodes: allow.map(|a| a.iter().map(|b| b.to_string()).collect()),
            max_wait_seconds: 3600,
            tick_interval_ms: 1000,
            barcode_length: 4,
            process_port: None,
        }
    }

    /// Full service configuration with a fixture registry
    pub fn config(&self, rows: Vec<RegistryRow>, allow: Option<&[&str]>) -> IngestConfig {
        IngestConfig {
            database_path: self.database.clone(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
            collector: self.collector_config(allow),
            registry: RegistryConfig::Fixture {
                project_folder: "xchem".to_string(),
                plate_types: None,
                rows,
            },
        }
    }

    pub async fn store(&self) -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open(&self.database).await.unwrap())
    }
}

/// The standard four-plate layout: one good plate, one unregistered barcode,
/// one malformed visit and one excluded by the allow-list
pub fn four_plate_scenario() -> Scenario {
    let scenario = Scenario::new();
    scenario.create_visit(VISIT);
    scenario.plate_directory("98ab_2023-04-05_RI1000-0276-3drop", 288);
    scenario.plate_directory("98ac_2023-04-05_RI1000-0276-3drop", 3);
    scenario.plate_directory("98ad_2023-04-05_RI1000-0276-3drop", 6);
    scenario.plate_directory("98ae_2023-04-05_RI1000-0276-3drop", 2);
    scenario
}

pub const GOOD_PLATE: &str = "98ab_2023-04-05_RI1000-0276-3drop";
pub const UNKNOWN_PLATE: &str = "98ac_2023-04-05_RI1000-0276-3drop";
pub const MALFORMED_PLATE: &str = "98ad_2023-04-05_RI1000-0276-3drop";
pub const EXCLUDED_PLATE: &str = "98ae_2023-04-05_RI1000-0276-3drop";
pub const ALLOW_LIST: &[&str] = &["98ab", "98ac", "98ad"];

/// Registry rows for the four-plate layout (98ac is deliberately absent)
pub fn four_plate_rows() -> Vec<RegistryRow> {
    vec![
        registry_row(10, "98ab", GOOD_EXPERIMENT),
        registry_row(11, "98ad", BAD_EXPERIMENT),
        registry_row(12, "98ae", GOOD_EXPERIMENT),
    ]
}

pub fn registry_row(id: i64, barcode: &str, experiment_name: &str) -> RegistryRow {
    RegistryRow {
        registry_plate_id: id,
        barcode: barcode.to_string(),
        experiment_name: experiment_name.to_string(),
        plate_type: PlateKind::Swissci3Drop.registry_name().to_string(),
        project_folder: "xchem".to_string(),
    }
}

pub fn fixture_registry(rows: Vec<RegistryRow>) -> Arc<PlateRegistryClient> {
    Arc::new(PlateRegistryClient::new(Box::new(FixtureSource::new(
        rows,
        "xchem".to_string(),
        allowed_plate_types(None),
    ))))
}

/// Fixture source that counts every call made to it
pub struct CountingSource {
    inner: FixtureSource,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RegistrySource for CountingSource {
    async fn rows_after(&self, watermark: i64) -> Result<Vec<RegistryRow>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rows_after(watermark).await
    }

    async fn barcode_after(
        &self,
        barcode: &str,
        watermark: i64,
    ) -> Result<Option<RegistryRow>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.barcode_after(barcode, watermark).await
    }

    fn describe(&self) -> String {
        "counting fixture".to_string()
    }
}

pub fn counting_registry(rows: Vec<RegistryRow>) -> (Arc<PlateRegistryClient>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: FixtureSource::new(rows, "xchem".to_string(), allowed_plate_types(None)),
        calls: calls.clone(),
    };
    (Arc::new(PlateRegistryClient::new(Box::new(source))), calls)
}

/// Registry that is never reachable
pub struct UnreachableSource;

#[async_trait]
impl RegistrySource for UnreachableSource {
    async fn rows_after(&self, _watermark: i64) -> Result<Vec<RegistryRow>, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn barcode_after(
        &self,
        _barcode: &str,
        _watermark: i64,
    ) -> Result<Option<RegistryRow>, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    fn describe(&self) -> String {
        "unreachable".to_string()
    }
}

pub fn unreachable_registry() -> Arc<PlateRegistryClient> {
    Arc::new(PlateRegistryClient::new(Box::new(UnreachableSource)))
}

/// A small JPEG, encoded once per call
pub fn jpeg_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(IMAGE_WIDTH, IMAGE_HEIGHT, image::Rgb([120, 60, 200]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Jpeg)
        .expect("Failed to encode test image");
    bytes.into_inner()
}

/// Write `count` images named `<barcode>_<NNN>A_1.jpg` into `directory`
pub fn write_plate_images(directory: &Path, barcode: &str, count: usize) {
    std::fs::create_dir_all(directory).unwrap();
    let bytes = jpeg_bytes();
    for i in 0..count {
        std::fs::write(directory.join(format!("{}_{:03}A_1.jpg", barcode, i)), &bytes).unwrap();
    }
}

/// Number of regular files directly in a directory
pub fn file_count(directory: &Path) -> usize {
    std::fs::read_dir(directory)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .count()
}

/// Port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
