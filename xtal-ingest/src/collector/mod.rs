//! Collectors
//!
//! A collector is what the execution context drives: something that can scan
//! on a tick, resolve a single barcode and shut down. Which one runs is chosen
//! once at startup from `[collector] type`.

pub mod runner;

pub use runner::{collector_channel, CollectorCommand, CollectorHandle, CollectorRunner, CollectorStatus};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use xtal_common::config::{CollectorKind, IngestConfig};
use xtal_common::db::{PlateStore, SqliteStore};
use xtal_common::PlateDescriptor;

use crate::error::IngestResult;
use crate::registry::PlateRegistryClient;
use crate::services::{PlateScanner, ScannerSettings, TickReport};

/// Capabilities every collector provides
#[async_trait]
pub trait Collector: Send {
    fn kind(&self) -> CollectorKind;

    /// Period of automatic ticks; `None` means ticks only happen on request
    fn tick_interval(&self) -> Option<Duration>;

    async fn resolve_barcode(&mut self, barcode: &str) -> IngestResult<PlateDescriptor>;

    async fn scan_tick(&mut self) -> IngestResult<TickReport>;

    /// Release the store; called once after the last tick
    async fn shutdown(&mut self);
}

/// Scans source directories on a fixed period
pub struct DirectPollCollector {
    scanner: PlateScanner,
    interval: Duration,
}

impl DirectPollCollector {
    pub fn new(scanner: PlateScanner, interval: Duration) -> Self {
        Self { scanner, interval }
    }
}

#[async_trait]
impl Collector for DirectPollCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::DirectPoll
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn resolve_barcode(&mut self, barcode: &str) -> IngestResult<PlateDescriptor> {
        self.scanner.resolve_barcode(barcode).await
    }

    async fn scan_tick(&mut self) -> IngestResult<TickReport> {
        self.scanner.scan_tick().await
    }

    async fn shutdown(&mut self) {
        tracing::info!(handled = self.scanner.handled_count(), "Direct poll collector shutting down");
        self.scanner.store().close().await;
    }
}

/// Scans only when asked
pub struct ManualCollector {
    scanner: PlateScanner,
}

impl ManualCollector {
    pub fn new(scanner: PlateScanner) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Collector for ManualCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Manual
    }

    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    async fn resolve_barcode(&mut self, barcode: &str) -> IngestResult<PlateDescriptor> {
        self.scanner.resolve_barcode(barcode).await
    }

    async fn scan_tick(&mut self) -> IngestResult<TickReport> {
        self.scanner.scan_tick().await
    }

    async fn shutdown(&mut self) {
        tracing::info!(handled = self.scanner.handled_count(), "Manual collector shutting down");
        self.scanner.store().close().await;
    }
}

/// Open the store and registry named by `config` and build its collector
pub async fn build_collector(config: &IngestConfig) -> IngestResult<Box<dyn Collector>> {
    let store: Arc<dyn PlateStore> = Arc::new(SqliteStore::open(&config.database_path).await?);
    let registry = Arc::new(PlateRegistryClient::from_config(&config.registry)?);
    Ok(build_collector_with(config, store, registry))
}

/// Build the configured collector around an existing store and registry
pub fn build_collector_with(
    config: &IngestConfig,
    store: Arc<dyn PlateStore>,
    registry: Arc<PlateRegistryClient>,
) -> Box<dyn Collector> {
    let scanner = PlateScanner::new(ScannerSettings::from_config(&config.collector), store, registry);

    match config.collector.kind {
        CollectorKind::DirectPoll => Box::new(DirectPollCollector::new(
            scanner,
            Duration::from_millis(config.collector.tick_interval_ms),
        )),
        CollectorKind::Manual => Box::new(ManualCollector::new(scanner)),
    }
}
