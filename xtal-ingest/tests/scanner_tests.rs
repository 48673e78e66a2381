//! Plate directory scanner integration tests
//!
//! Drive `PlateScanner::scan_tick` over real temporary directories, a SQLite
//! store and a fixture registry.

mod helpers;

use filetime::FileTime;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use helpers::*;
use xtal_common::db::PlateStore;
use xtal_common::{PlateFilter, WellFilter};
use xtal_ingest::services::plate_injector::{
    BARCODE_NOT_FOUND, MALFORMED_VISIT, VISIT_DIRECTORY_NOT_FOUND,
};
use xtal_ingest::services::PlateScanner;

async fn scanner_for(scenario: &Scenario, allow: Option<&[&str]>) -> (PlateScanner, Arc<dyn PlateStore>) {
    let store: Arc<dyn PlateStore> = scenario.store().await;
    let scanner = PlateScanner::new(
        scenario.settings(allow),
        store.clone(),
        fixture_registry(four_plate_rows()),
    );
    (scanner, store)
}

#[tokio::test]
async fn test_first_tick_promotes_only_the_registered_plate() {
    let scenario = four_plate_scenario();
    let (mut scanner, store) = scanner_for(&scenario, Some(ALLOW_LIST)).await;

    let report = scanner.scan_tick().await.unwrap();

    assert_eq!(report.promoted, vec![GOOD_PLATE.to_string()]);
    assert_eq!(
        report.errored,
        vec![UNKNOWN_PLATE.to_string(), MALFORMED_PLATE.to_string()]
    );
    assert_eq!(report.excluded, 1);
    assert_eq!(report.wells_registered, 288);
    assert!(report.failed.is_empty());

    // Good plate: copied in full, source untouched
    let destination = scenario.destination(VISIT, GOOD_PLATE);
    assert_eq!(file_count(&destination), 288);
    assert_eq!(file_count(&scenario.source.join(GOOD_PLATE)), 288);

    let plate = store
        .fetch_plates(&PlateFilter::barcode("98ab"))
        .await
        .unwrap()
        .remove(0);
    assert!(plate.error.is_none());
    assert_eq!(plate.visit.as_deref(), Some(VISIT));
    assert_eq!(plate.registry_plate_id, Some(10));
    assert_eq!(plate.collected_stem.as_deref(), Some(GOOD_PLATE));

    let wells = store
        .fetch_wells(&WellFilter {
            plate_uuid: Some(plate.uuid),
        })
        .await
        .unwrap();
    assert_eq!(wells.len(), 288);
    assert_eq!(wells[0].position.as_deref(), Some("000A1"));
    assert_eq!(wells[287].position.as_deref(), Some("287A1"));
    assert_eq!(wells[0].width, Some(IMAGE_WIDTH));
    assert_eq!(wells[0].height, Some(IMAGE_HEIGHT));
    assert!(wells[0].error.is_none());
    assert!(wells
        .iter()
        .all(|w| std::path::Path::new(&w.filename).starts_with(&destination)));

    // Unregistered barcode: error recorded, nothing promoted
    let unknown = store
        .fetch_plates(&PlateFilter::barcode("98ac"))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(unknown.error.as_deref(), Some(BARCODE_NOT_FOUND));
    assert!(unknown.collected_stem.is_none());
    assert!(!scenario.destination(VISIT, UNKNOWN_PLATE).exists());
    assert!(store
        .fetch_wells(&WellFilter {
            plate_uuid: Some(unknown.uuid)
        })
        .await
        .unwrap()
        .is_empty());

    // Malformed visit: distinct error text
    let malformed = store
        .fetch_plates(&PlateFilter::barcode("98ad"))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(malformed.error.as_deref(), Some(MALFORMED_VISIT));
    assert!(!scenario.destination(VISIT, MALFORMED_PLATE).exists());
    assert_eq!(file_count(&scenario.source.join(MALFORMED_PLATE)), 6);

    // Excluded barcode: never looked up
    assert!(store
        .fetch_plates(&PlateFilter::barcode("98ae"))
        .await
        .unwrap()
        .is_empty());
    assert!(!scenario.destination(VISIT, EXCLUDED_PLATE).exists());
}

#[tokio::test]
async fn test_unreadable_image_is_recorded_and_plate_still_promoted() {
    let scenario = four_plate_scenario();
    let corrupt = "98ab_100A_1.jpg";
    std::fs::write(scenario.source.join(GOOD_PLATE).join(corrupt), b"not a jpeg").unwrap();
    let (mut scanner, store) = scanner_for(&scenario, Some(ALLOW_LIST)).await;

    let report = scanner.scan_tick().await.unwrap();

    assert_eq!(report.promoted, vec![GOOD_PLATE.to_string()]);
    assert_eq!(report.wells_registered, 288);
    assert!(report.failed.is_empty());

    let plate = store
        .fetch_plates(&PlateFilter::barcode("98ab"))
        .await
        .unwrap()
        .remove(0);
    let wells = store
        .fetch_wells(&WellFilter {
            plate_uuid: Some(plate.uuid),
        })
        .await
        .unwrap();
    assert_eq!(wells.len(), 288);

    let broken: Vec<_> = wells.iter().filter(|w| w.error.is_some()).collect();
    assert_eq!(broken.len(), 1);
    let destination = scenario.destination(VISIT, GOOD_PLATE);
    assert_eq!(
        std::path::Path::new(&broken[0].filename),
        destination.join(corrupt)
    );
    assert!(broken[0].width.is_none());
    assert!(broken[0].height.is_none());
    assert!(wells
        .iter()
        .filter(|w| w.error.is_none())
        .all(|w| w.width == Some(IMAGE_WIDTH) && w.height == Some(IMAGE_HEIGHT)));

    // The unreadable file travels with the rest
    assert_eq!(file_count(&destination), 288);
    assert_eq!(
        std::fs::read(destination.join(corrupt)).unwrap(),
        b"not a jpeg".to_vec()
    );
}

#[tokio::test]
async fn test_second_tick_changes_nothing() {
    let scenario = four_plate_scenario();
    let (mut scanner, store) = scanner_for(&scenario, Some(ALLOW_LIST)).await;

    scanner.scan_tick().await.unwrap();
    let second = scanner.scan_tick().await.unwrap();

    assert!(second.promoted.is_empty());
    assert!(second.errored.is_empty());
    assert!(second.already_promoted.is_empty());
    // Allow-list misses are revisited every tick
    assert_eq!(second.excluded, 1);

    assert_eq!(store.fetch_wells(&WellFilter::default()).await.unwrap().len(), 288);
    assert_eq!(store.fetch_plates(&PlateFilter::default()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_restart_does_not_ingest_twice() {
    let scenario = four_plate_scenario();

    {
        let (mut scanner, store) = scanner_for(&scenario, Some(ALLOW_LIST)).await;
        scanner.scan_tick().await.unwrap();
        store.close().await;
    }

    // Fresh process: empty handled set, same store and archive
    let store: Arc<dyn PlateStore> = scenario.store().await;
    let (registry, calls) = counting_registry(four_plate_rows());
    let mut scanner = PlateScanner::new(scenario.settings(Some(ALLOW_LIST)), store.clone(), registry);

    let report = scanner.scan_tick().await.unwrap();

    assert!(report.promoted.is_empty());
    assert_eq!(report.already_promoted, vec![GOOD_PLATE.to_string()]);
    assert_eq!(report.errored.len(), 2);
    assert_eq!(store.fetch_wells(&WellFilter::default()).await.unwrap().len(), 288);
    assert_eq!(file_count(&scenario.destination(VISIT, GOOD_PLATE)), 288);

    // Only the incremental refresh reached the registry; every barcode was
    // already in the store
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_incomplete_plate_waits_then_promotes_when_overdue() {
    let scenario = Scenario::new();
    scenario.create_visit(VISIT);
    let source = scenario.plate_directory(GOOD_PLATE, 10);

    let (mut scanner, store) = scanner_for(&scenario, None).await;

    let report = scanner.scan_tick().await.unwrap();
    assert_eq!(report.incomplete, vec![GOOD_PLATE.to_string()]);
    assert!(report.promoted.is_empty());
    assert!(!scenario.destination(VISIT, GOOD_PLATE).exists());
    assert!(store.fetch_wells(&WellFilter::default()).await.unwrap().is_empty());

    // First observation is recorded even though the plate is incomplete
    let plate = store
        .fetch_plates(&PlateFilter::barcode("98ab"))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(plate.collected_stem.as_deref(), Some(GOOD_PLATE));

    // Still young: keeps waiting
    let report = scanner.scan_tick().await.unwrap();
    assert_eq!(report.incomplete, vec![GOOD_PLATE.to_string()]);

    // Age every image past the wait limit
    let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(2 * 3600));
    for entry in std::fs::read_dir(&source).unwrap() {
        filetime::set_file_mtime(entry.unwrap().path(), old).unwrap();
    }

    let report = scanner.scan_tick().await.unwrap();
    assert_eq!(report.promoted, vec![GOOD_PLATE.to_string()]);
    assert_eq!(report.wells_registered, 10);
    assert_eq!(file_count(&scenario.destination(VISIT, GOOD_PLATE)), 10);
}

#[tokio::test]
async fn test_missing_visit_directory_is_terminal() {
    let scenario = Scenario::new();
    // No visit directory created
    scenario.plate_directory(GOOD_PLATE, 288);

    let (mut scanner, store) = scanner_for(&scenario, None).await;
    let report = scanner.scan_tick().await.unwrap();

    assert_eq!(report.errored, vec![GOOD_PLATE.to_string()]);
    let plate = store
        .fetch_plates(&PlateFilter::barcode("98ab"))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(plate.visit.as_deref(), Some(VISIT));
    assert_eq!(plate.error.as_deref(), Some(VISIT_DIRECTORY_NOT_FOUND));
    // Resolution never creates archive directories
    assert!(!scenario.visits.join("cm00001").exists());
}

#[tokio::test]
async fn test_unreachable_registry_fails_tick_without_mutation() {
    let scenario = four_plate_scenario();
    let store: Arc<dyn PlateStore> = scenario.store().await;
    let mut scanner = PlateScanner::new(scenario.settings(None), store.clone(), unreachable_registry());

    let err = scanner.scan_tick().await.unwrap_err();
    assert!(err.is_transient());

    assert!(store.fetch_plates(&PlateFilter::default()).await.unwrap().is_empty());
    assert!(!scenario.destination(VISIT, GOOD_PLATE).exists());
    assert_eq!(scanner.handled_count(), 0);
}

#[tokio::test]
async fn test_short_directory_names_are_ignored() {
    let scenario = Scenario::new();
    std::fs::create_dir_all(scenario.source.join("98a")).unwrap();

    let (mut scanner, store) = scanner_for(&scenario, None).await;
    let report = scanner.scan_tick().await.unwrap();

    assert!(report.promoted.is_empty());
    assert!(report.errored.is_empty());
    assert!(store.fetch_plates(&PlateFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolve_barcode_uses_cache_after_tick() {
    let scenario = four_plate_scenario();
    let store: Arc<dyn PlateStore> = scenario.store().await;
    let (registry, calls) = counting_registry(four_plate_rows());
    let mut scanner = PlateScanner::new(scenario.settings(Some(ALLOW_LIST)), store, registry);

    scanner.scan_tick().await.unwrap();
    let after_tick = calls.load(std::sync::atomic::Ordering::SeqCst);

    let plate = scanner.resolve_barcode("98ab").await.unwrap();
    assert_eq!(plate.collected_stem.as_deref(), Some(GOOD_PLATE));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), after_tick);
}
