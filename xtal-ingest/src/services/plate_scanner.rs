//! Plate directory scanner
//!
//! One `scan_tick` walks every source root and moves each plate directory one
//! step through its life:
//!
//! ```text
//! Unhandled ─┬─ allow-list miss ─────────────▶ Excluded (revisited, nothing read)
//!            ├─ descriptor error ────────────▶ Errored (handled, source left alone)
//!            ├─ destination exists ──────────▶ AlreadyPromoted (handled)
//!            ├─ too few images, still young ─▶ Incomplete (revisited next tick)
//!            └─ complete or overdue ─────────▶ Promoted (wells stored, tree copied, handled)
//! ```
//!
//! The handled set lives in memory only. After a restart the destination
//! check keeps promoted plates from being ingested twice.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use xtal_common::config::CollectorConfig;
use xtal_common::db::PlateStore;
use xtal_common::{PlateDescriptor, PlateFilter, PlateKind, VisitResolver, WellRecord};

use super::archive::{self, DirectorySurvey};
use super::plate_injector::PlateInjector;
use crate::error::{IngestError, IngestResult};
use crate::registry::PlateRegistryClient;

/// Scanner settings taken from the collector configuration
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub source_directories: Vec<PathBuf>,
    pub visits_root: PathBuf,
    pub plates_subdirectory: PathBuf,
    pub ingest_only_barcodes: Option<HashSet<String>>,
    pub max_wait: Duration,
    pub barcode_length: usize,
}

impl ScannerSettings {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            source_directories: config.source_directories.clone(),
            visits_root: config.visits_root.clone(),
            plates_subdirectory: config.plates_subdirectory.clone(),
            ingest_only_barcodes: config
                .ingest_only_barcodes
                .as_ref()
                .map(|barcodes| barcodes.iter().cloned().collect()),
            max_wait: Duration::from_secs(config.max_wait_seconds),
            barcode_length: config.barcode_length,
        }
    }
}

/// What one tick did, by plate directory name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub promoted: Vec<String>,
    pub incomplete: Vec<String>,
    pub errored: Vec<String>,
    pub already_promoted: Vec<String>,
    /// Directories whose promotion failed on the filesystem; retried next tick
    pub failed: Vec<String>,
    /// Allow-list misses
    pub excluded: usize,
    pub wells_registered: usize,
}

impl TickReport {
    fn record(&mut self, name: &str, outcome: &DirectoryOutcome) {
        let name = name.to_string();
        match outcome {
            DirectoryOutcome::Ignored => {}
            DirectoryOutcome::Excluded => self.excluded += 1,
            DirectoryOutcome::Errored(_) => self.errored.push(name),
            DirectoryOutcome::AlreadyPromoted => self.already_promoted.push(name),
            DirectoryOutcome::Incomplete => self.incomplete.push(name),
            DirectoryOutcome::Promoted { wells, .. } => {
                self.promoted.push(name);
                self.wells_registered += wells;
            }
        }
    }

    /// True when nothing changed on disk or in the store
    pub fn is_quiet(&self) -> bool {
        self.promoted.is_empty() && self.errored.is_empty() && self.failed.is_empty()
    }
}

/// Result of looking at one plate directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryOutcome {
    /// Name too short to carry a barcode
    Ignored,
    Excluded,
    Errored(String),
    AlreadyPromoted,
    Incomplete,
    Promoted { wells: usize, overdue: bool },
}

/// Completeness verdict for a plate directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Every expected image is present
    Complete,
    /// Images missing, but they may still arrive
    Waiting,
    /// Images missing and nothing new arrived within the wait limit
    Overdue,
}

/// Decide whether a plate directory is ready to promote
pub fn assess_completeness(
    count: usize,
    expected: usize,
    age: Duration,
    max_wait: Duration,
) -> Completeness {
    if count >= expected {
        Completeness::Complete
    } else if age < max_wait {
        Completeness::Waiting
    } else {
        Completeness::Overdue
    }
}

/// Tick-driven plate directory scanner
///
/// Owns all of its mutable state; callers serialize through `&mut self`.
pub struct PlateScanner {
    settings: ScannerSettings,
    visits: VisitResolver,
    store: Arc<dyn PlateStore>,
    registry: Arc<PlateRegistryClient>,
    injector: PlateInjector,
    handled: HashSet<String>,
    plates_by_barcode: HashMap<String, PlateDescriptor>,
    store_watermark: Option<i64>,
}

impl PlateScanner {
    pub fn new(
        settings: ScannerSettings,
        store: Arc<dyn PlateStore>,
        registry: Arc<PlateRegistryClient>,
    ) -> Self {
        Self {
            visits: VisitResolver::new(settings.visits_root.clone()),
            injector: PlateInjector::new(store.clone(), registry.clone()),
            settings,
            store,
            registry,
            handled: HashSet::new(),
            plates_by_barcode: HashMap::new(),
            store_watermark: None,
        }
    }

    /// Plate directories this instance has finished with
    pub fn handled_count(&self) -> usize {
        self.handled.len()
    }

    pub fn store(&self) -> &Arc<dyn PlateStore> {
        &self.store
    }

    /// Descriptor for a barcode, injecting it if it is new
    pub async fn resolve_barcode(&mut self, barcode: &str) -> IngestResult<PlateDescriptor> {
        if let Some(plate) = self.plates_by_barcode.get(barcode) {
            return Ok(plate.clone());
        }

        let plate = self
            .injector
            .find_or_inject_barcode(barcode, &self.visits)
            .await?;
        self.plates_by_barcode
            .insert(plate.barcode.clone(), plate.clone());
        Ok(plate)
    }

    /// One pass over every source root
    ///
    /// Registry and store failures abort the tick before anything else is
    /// touched for the directory being processed. Filesystem failures while
    /// promoting one plate are reported and leave that plate for the next tick.
    pub async fn scan_tick(&mut self) -> IngestResult<TickReport> {
        self.refresh_cache().await?;

        let mut report = TickReport::default();

        for root in self.settings.source_directories.clone() {
            let names = match archive::list_plate_directories(&root) {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Cannot list source directory");
                    continue;
                }
            };

            for name in names {
                if self.handled.contains(&name) {
                    continue;
                }

                match self.process_directory(&root, &name).await {
                    Ok(outcome) => report.record(&name, &outcome),
                    Err(err @ IngestError::Io { .. }) => {
                        tracing::error!(directory = %name, error = %err, "Plate promotion failed");
                        report.failed.push(name);
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        if report.is_quiet() {
            tracing::debug!(
                incomplete = report.incomplete.len(),
                excluded = report.excluded,
                "Tick complete"
            );
        } else {
            tracing::info!(
                promoted = report.promoted.len(),
                wells = report.wells_registered,
                errored = report.errored.len(),
                failed = report.failed.len(),
                incomplete = report.incomplete.len(),
                "Tick complete"
            );
        }

        Ok(report)
    }

    /// Pull new registry rows and newly stored plates into the caches
    async fn refresh_cache(&mut self) -> IngestResult<()> {
        self.registry.refresh().await?;

        let filter = match self.store_watermark {
            Some(id) => PlateFilter::from_id(id),
            None => PlateFilter::default(),
        };

        for plate in self.store.fetch_plates(&filter).await? {
            if let Some(id) = plate.registry_plate_id {
                self.store_watermark = Some(self.store_watermark.map_or(id, |w| w.max(id)));
            }
            self.plates_by_barcode.insert(plate.barcode.clone(), plate);
        }

        Ok(())
    }

    async fn process_directory(&mut self, root: &Path, name: &str) -> IngestResult<DirectoryOutcome> {
        let length = self.settings.barcode_length;
        if name.chars().count() < length {
            tracing::debug!(directory = %name, "Directory name too short for a barcode");
            self.handled.insert(name.to_string());
            return Ok(DirectoryOutcome::Ignored);
        }
        let barcode: String = name.chars().take(length).collect();

        if let Some(allowed) = &self.settings.ingest_only_barcodes {
            if !allowed.contains(&barcode) {
                return Ok(DirectoryOutcome::Excluded);
            }
        }

        let mut plate = self.resolve_barcode(&barcode).await?;

        if let Some(error) = &plate.error {
            tracing::warn!(directory = %name, barcode = %barcode, error = %error, "Plate not promoted");
            self.handled.insert(name.to_string());
            return Ok(DirectoryOutcome::Errored(error.clone()));
        }

        let (Some(visit), Some(kind)) = (plate.visit.clone(), plate.plate_kind) else {
            let error = "descriptor has no visit or plate kind".to_string();
            tracing::warn!(directory = %name, barcode = %barcode, "Plate not promoted: {}", error);
            self.handled.insert(name.to_string());
            return Ok(DirectoryOutcome::Errored(error));
        };

        let visit_directory = match self.visits.resolve(&visit) {
            Ok(directory) => directory,
            Err(err) => {
                tracing::warn!(directory = %name, visit = %visit, error = %err, "Plate not promoted");
                self.handled.insert(name.to_string());
                return Ok(DirectoryOutcome::Errored(err.to_string()));
            }
        };

        let source = root.join(name);
        let destination = visit_directory
            .join(&self.settings.plates_subdirectory)
            .join(name);

        if destination.exists() {
            tracing::debug!(directory = %name, destination = %destination.display(), "Already promoted");
            self.handled.insert(name.to_string());
            return Ok(DirectoryOutcome::AlreadyPromoted);
        }

        if plate.collected_stem.is_none() {
            plate = self.record_collected_stem(plate, name).await?;
        }

        let survey = blocking({
            let source = source.clone();
            move || archive::survey_directory(&source).map_err(|e| IngestError::io(&source, e))
        })
        .await?;

        let expected = kind.expected_image_count();
        let overdue = match assess_completeness(
            survey.count(),
            expected,
            survey.age(SystemTime::now()),
            self.settings.max_wait,
        ) {
            Completeness::Complete => false,
            Completeness::Waiting => {
                tracing::debug!(
                    directory = %name,
                    images = survey.count(),
                    expected,
                    "Waiting for more images"
                );
                return Ok(DirectoryOutcome::Incomplete);
            }
            Completeness::Overdue => {
                tracing::warn!(
                    directory = %name,
                    images = survey.count(),
                    expected,
                    max_wait_seconds = self.settings.max_wait.as_secs(),
                    "Promoting incomplete plate after waiting"
                );
                true
            }
        };

        let wells = blocking({
            let plate_uuid = plate.uuid;
            let destination = destination.clone();
            move || Ok(build_wells(plate_uuid, kind, &survey, &destination))
        })
        .await?;

        // Wells are stored before the copy; a crash in between leaves wells
        // for a plate whose destination is still missing
        self.store.upsert_wells(&wells).await?;

        let copied = blocking({
            let source = source.clone();
            let destination = destination.clone();
            move || {
                archive::copy_tree_staged(&source, &destination)
                    .map_err(|e| IngestError::io(&destination, e))
            }
        })
        .await?;

        tracing::info!(
            directory = %name,
            barcode = %barcode,
            visit = %visit,
            wells = wells.len(),
            files = copied,
            destination = %destination.display(),
            "Plate promoted"
        );

        self.handled.insert(name.to_string());
        Ok(DirectoryOutcome::Promoted {
            wells: wells.len(),
            overdue,
        })
    }

    /// Remember the first plate directory seen for a plate
    async fn record_collected_stem(
        &mut self,
        plate: PlateDescriptor,
        name: &str,
    ) -> IngestResult<PlateDescriptor> {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        let updated = PlateDescriptor {
            collected_stem: Some(stem),
            ..plate
        };
        self.store
            .upsert_plates(std::slice::from_ref(&updated))
            .await?;
        self.plates_by_barcode
            .insert(updated.barcode.clone(), updated.clone());

        Ok(updated)
    }
}

/// Well records for every image of a plate, pointing at their archive location
pub fn build_wells(
    plate_uuid: uuid::Uuid,
    kind: PlateKind,
    survey: &DirectorySurvey,
    destination: &Path,
) -> Vec<WellRecord> {
    survey
        .files
        .iter()
        .filter_map(|file| {
            let file_name = file.file_name()?;
            let mut well = WellRecord::new(
                plate_uuid,
                destination.join(file_name).to_string_lossy().into_owned(),
            );
            well.position = kind.parse_position(file);

            match image::image_dimensions(file) {
                Ok((width, height)) => {
                    well.width = Some(width);
                    well.height = Some(height);
                }
                Err(e) => {
                    tracing::debug!(file = %file.display(), error = %e, "Unreadable image");
                    well.error = Some(format!("unable to read image: {}", e));
                }
            }

            Some(well)
        })
        .collect()
}

async fn blocking<T, F>(f: F) -> IngestResult<T>
where
    F: FnOnce() -> IngestResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::Internal(format!("Blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_completeness_full_plate() {
        assert_eq!(
            assess_completeness(288, 288, Duration::ZERO, HOUR),
            Completeness::Complete
        );
        assert_eq!(
            assess_completeness(300, 288, Duration::ZERO, HOUR),
            Completeness::Complete
        );
    }

    #[test]
    fn test_completeness_waits_then_overdue() {
        assert_eq!(
            assess_completeness(3, 288, Duration::from_secs(10), HOUR),
            Completeness::Waiting
        );
        assert_eq!(assess_completeness(3, 288, HOUR, HOUR), Completeness::Overdue);
        assert_eq!(
            assess_completeness(0, 96, 2 * HOUR, HOUR),
            Completeness::Overdue
        );
    }

    #[test]
    fn test_report_records_outcomes() {
        let mut report = TickReport::default();
        report.record("98ab_x", &DirectoryOutcome::Promoted { wells: 288, overdue: false });
        report.record("98ac_x", &DirectoryOutcome::Errored("barcode not found in registry".into()));
        report.record("98ae_x", &DirectoryOutcome::Excluded);
        report.record("98", &DirectoryOutcome::Ignored);

        assert_eq!(report.promoted, vec!["98ab_x".to_string()]);
        assert_eq!(report.errored, vec!["98ac_x".to_string()]);
        assert_eq!(report.excluded, 1);
        assert_eq!(report.wells_registered, 288);
        assert!(!report.is_quiet());
    }

    #[test]
    fn test_build_wells_records_unreadable_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("98ab_A01_1.jpg"), b"not an image").unwrap();
        let survey = archive::survey_directory(dir.path()).unwrap();

        let plate_uuid = uuid::Uuid::new_v4();
        let wells = build_wells(
            plate_uuid,
            PlateKind::Swissci3Drop,
            &survey,
            Path::new("/archive/98ab_x"),
        );

        assert_eq!(wells.len(), 1);
        assert_eq!(wells[0].position.as_deref(), Some("A011"));
        assert_eq!(wells[0].filename, "/archive/98ab_x/98ab_A01_1.jpg");
        assert_eq!(wells[0].plate_uuid, plate_uuid);
        assert!(wells[0].width.is_none());
        assert!(wells[0].error.is_some());
    }
}
