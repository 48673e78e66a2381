//! Execution context tests: the same operations across task, thread and
//! process strategies

mod helpers;

use std::time::Duration;

use helpers::*;
use xtal_common::config::{CollectorKind, StartAs};
use xtal_ingest::{ExecutionContext, IngestError};

async fn exercise(context: &mut ExecutionContext, scenario: &Scenario) {
    context.start().await.unwrap();
    assert!(context.is_started());

    let health = context.health().await;
    assert!(health.alive);
    assert_eq!(health.start_as, context.start_as());

    let report = context.request_tick().await.unwrap();
    assert_eq!(report.promoted, vec![GOOD_PLATE.to_string()]);
    assert_eq!(file_count(&scenario.destination(VISIT, GOOD_PLATE)), 288);

    let plate = context.resolve_barcode("98ab").await.unwrap();
    assert_eq!(plate.collected_stem.as_deref(), Some(GOOD_PLATE));

    let status = context.health().await.status.unwrap();
    assert!(status.running);
    assert_eq!(status.ticks, 1);
    assert_eq!(status.plates_promoted, 1);
    assert_eq!(status.wells_registered, 288);
    assert!(status.last_error.is_none());

    context.stop().await.unwrap();
    assert!(!context.is_started());
    assert!(!context.health().await.alive);
    assert!(matches!(
        context.request_tick().await,
        Err(IngestError::Stopped)
    ));
}

#[tokio::test]
async fn test_task_context() {
    let scenario = four_plate_scenario();
    let config = scenario.config(four_plate_rows(), Some(ALLOW_LIST));

    let mut context = ExecutionContext::new(config, StartAs::Task);
    exercise(&mut context, &scenario).await;
}

#[tokio::test]
async fn test_thread_context() {
    let scenario = four_plate_scenario();
    let config = scenario.config(four_plate_rows(), Some(ALLOW_LIST));

    let mut context = ExecutionContext::new(config, StartAs::Thread);
    exercise(&mut context, &scenario).await;
}

#[tokio::test]
async fn test_process_context() {
    let scenario = four_plate_scenario();
    let mut config = scenario.config(four_plate_rows(), Some(ALLOW_LIST));
    config.collector.process_port = Some(free_port());

    let mut context = ExecutionContext::new(config, StartAs::Process)
        .with_program(env!("CARGO_BIN_EXE_xtal-ingest"));
    exercise(&mut context, &scenario).await;
}

#[tokio::test]
async fn test_direct_poll_ticks_on_its_own() {
    let scenario = four_plate_scenario();
    let mut config = scenario.config(four_plate_rows(), Some(ALLOW_LIST));
    config.collector.kind = CollectorKind::DirectPoll;
    config.collector.tick_interval_ms = 50;

    let mut context = ExecutionContext::new(config, StartAs::Task);
    context.start().await.unwrap();

    let destination = scenario.destination(VISIT, GOOD_PLATE);
    let mut promoted = false;
    for _ in 0..200 {
        if destination.exists() {
            promoted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(promoted, "direct poll collector never promoted the plate");

    context.stop().await.unwrap();
    assert_eq!(file_count(&destination), 288);
}

#[tokio::test]
async fn test_start_fails_with_unusable_store() {
    let scenario = Scenario::new();
    let config = scenario.config(four_plate_rows(), None);
    // A directory where the database file should be
    std::fs::create_dir_all(&config.database_path).unwrap();

    let mut context = ExecutionContext::new(config, StartAs::Thread);
    assert!(context.start().await.is_err());
    assert!(!context.is_started());
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let scenario = four_plate_scenario();
    let config = scenario.config(four_plate_rows(), Some(ALLOW_LIST));

    let mut context = ExecutionContext::new(config, StartAs::Task);
    context.start().await.unwrap();
    assert!(matches!(context.start().await, Err(IngestError::Context(_))));
    context.stop().await.unwrap();

    // Stopping twice is harmless
    context.stop().await.unwrap();
}
