//! Collector tick loop
//!
//! The loop owns the collector. Periodic ticks, requested ticks and barcode
//! lookups all go through it, one at a time, so scanner state never needs a
//! lock. Cancellation is only observed between operations: a tick that has
//! started always finishes, copies included.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use xtal_common::PlateDescriptor;

use super::Collector;
use crate::error::{IngestError, IngestResult};
use crate::services::TickReport;

const COMMAND_QUEUE: usize = 16;

/// Request sent to the tick loop
pub enum CollectorCommand {
    Tick(oneshot::Sender<IngestResult<TickReport>>),
    Resolve {
        barcode: String,
        reply: oneshot::Sender<IngestResult<PlateDescriptor>>,
    },
}

/// Published collector state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorStatus {
    pub running: bool,
    pub ticks: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub plates_promoted: u64,
    pub wells_registered: u64,
}

/// Cloneable handle to a running tick loop
#[derive(Clone)]
pub struct CollectorHandle {
    commands: mpsc::Sender<CollectorCommand>,
    cancel: CancellationToken,
    status: Arc<RwLock<CollectorStatus>>,
}

/// Receiving half; consumed by `run`
pub struct CollectorRunner {
    commands: mpsc::Receiver<CollectorCommand>,
    cancel: CancellationToken,
    status: Arc<RwLock<CollectorStatus>>,
}

/// Create a connected handle and runner
pub fn collector_channel() -> (CollectorHandle, CollectorRunner) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let cancel = CancellationToken::new();
    let status = Arc::new(RwLock::new(CollectorStatus::default()));

    (
        CollectorHandle {
            commands: tx,
            cancel: cancel.clone(),
            status: status.clone(),
        },
        CollectorRunner {
            commands: rx,
            cancel,
            status,
        },
    )
}

impl CollectorHandle {
    /// Run a tick now, after any tick already in progress
    pub async fn request_tick(&self) -> IngestResult<TickReport> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(CollectorCommand::Tick(reply))
            .await
            .map_err(|_| IngestError::Stopped)?;
        response.await.map_err(|_| IngestError::Stopped)?
    }

    pub async fn resolve_barcode(&self, barcode: &str) -> IngestResult<PlateDescriptor> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(CollectorCommand::Resolve {
                barcode: barcode.to_string(),
                reply,
            })
            .await
            .map_err(|_| IngestError::Stopped)?;
        response.await.map_err(|_| IngestError::Stopped)?
    }

    pub async fn status(&self) -> CollectorStatus {
        self.status.read().await.clone()
    }

    /// Ask the loop to stop after the current operation
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl CollectorRunner {
    /// Drive `collector` until stopped or every handle is dropped
    pub async fn run(mut self, mut collector: Box<dyn Collector>) {
        let mut interval = collector.tick_interval().map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        self.status.write().await.running = true;
        tracing::info!(
            kind = ?collector.kind(),
            interval_ms = ?collector.tick_interval().map(|d| d.as_millis()),
            "Collector started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(CollectorCommand::Tick(reply)) => {
                        let result = run_tick(collector.as_mut(), &self.status).await;
                        let _ = reply.send(result);
                    }
                    Some(CollectorCommand::Resolve { barcode, reply }) => {
                        let result = collector.resolve_barcode(&barcode).await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },

                _ = next_tick(&mut interval) => {
                    let _ = run_tick(collector.as_mut(), &self.status).await;
                }
            }
        }

        collector.shutdown().await;
        self.status.write().await.running = false;
        tracing::info!("Collector stopped");
    }
}

/// Run one tick and fold its outcome into the published status
async fn run_tick(
    collector: &mut dyn Collector,
    status: &RwLock<CollectorStatus>,
) -> IngestResult<TickReport> {
    let result = collector.scan_tick().await;

    let mut status = status.write().await;
    status.ticks += 1;
    status.last_tick_at = Some(Utc::now());

    match &result {
        Ok(report) => {
            status.plates_promoted += report.promoted.len() as u64;
            status.wells_registered += report.wells_registered as u64;
            status.last_error = if report.failed.is_empty() {
                None
            } else {
                Some(format!("promotion failed for {}", report.failed.join(", ")))
            };
        }
        Err(err) => {
            if err.is_transient() {
                tracing::warn!(error = %err, "Scan tick failed, retrying next tick");
            } else {
                tracing::error!(error = %err, "Scan tick failed");
            }
            status.last_error = Some(err.to_string());
        }
    }

    result
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
