//! Execution context
//!
//! Runs one collector in one of three places and exposes the same operations
//! for all of them:
//!
//! | `start_as` | where the tick loop runs                                  |
//! |------------|-----------------------------------------------------------|
//! | `task`     | tokio task on the caller's runtime                        |
//! | `thread`   | dedicated OS thread with a current-thread runtime         |
//! | `process`  | child copy of this binary, driven through its HTTP routes |

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use xtal_common::config::{IngestConfig, StartAs};
use xtal_common::PlateDescriptor;

use crate::api::HealthResponse;
use crate::collector::{build_collector, collector_channel, CollectorHandle, CollectorStatus};
use crate::error::{IngestError, IngestResult};
use crate::services::TickReport;

const PROCESS_READY_ATTEMPTS: u32 = 100;
const PROCESS_READY_DELAY: Duration = Duration::from_millis(100);
const PROCESS_EXIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Collector health as seen from the context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextHealth {
    pub start_as: StartAs,
    /// Tick loop (or child process) is up and answering
    pub alive: bool,
    pub status: Option<CollectorStatus>,
}

enum Runner {
    Task {
        handle: CollectorHandle,
        join: JoinHandle<()>,
    },
    Thread {
        handle: CollectorHandle,
        join: std::thread::JoinHandle<()>,
    },
    Process {
        child: Mutex<Child>,
        client: reqwest::Client,
        base_url: String,
        config_file: PathBuf,
    },
}

pub struct ExecutionContext {
    config: IngestConfig,
    start_as: StartAs,
    program: Option<PathBuf>,
    runner: Option<Runner>,
}

impl ExecutionContext {
    pub fn new(config: IngestConfig, start_as: StartAs) -> Self {
        Self {
            config,
            start_as,
            program: None,
            runner: None,
        }
    }

    /// Executable launched for `process` (default: the running binary)
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn start_as(&self) -> StartAs {
        self.start_as
    }

    pub fn is_started(&self) -> bool {
        self.runner.is_some()
    }

    /// Build the collector and start its tick loop
    pub async fn start(&mut self) -> IngestResult<()> {
        if self.runner.is_some() {
            return Err(IngestError::Context("collector already started".to_string()));
        }

        let runner = match self.start_as {
            StartAs::Task => self.start_task().await?,
            StartAs::Thread => self.start_thread().await?,
            StartAs::Process => self.start_process().await?,
        };

        tracing::info!(start_as = %self.start_as, "Collector context started");
        self.runner = Some(runner);
        Ok(())
    }

    async fn start_task(&self) -> IngestResult<Runner> {
        let collector = build_collector(&self.config).await?;
        let (handle, runner) = collector_channel();
        let join = tokio::spawn(runner.run(collector));
        Ok(Runner::Task { handle, join })
    }

    async fn start_thread(&self) -> IngestResult<Runner> {
        let (handle, runner) = collector_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<IngestResult<()>>();
        let config = self.config.clone();

        let join = std::thread::Builder::new()
            .name("xtal-collector".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(IngestError::Context(format!(
                            "collector runtime failed to start: {}",
                            e
                        ))));
                        return;
                    }
                };

                runtime.block_on(async move {
                    match build_collector(&config).await {
                        Ok(collector) => {
                            let _ = ready_tx.send(Ok(()));
                            runner.run(collector).await;
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                });
            })
            .map_err(|e| IngestError::Context(format!("collector thread failed to spawn: {}", e)))?;

        ready_rx
            .await
            .map_err(|_| IngestError::Context("collector thread exited during startup".to_string()))??;

        Ok(Runner::Thread { handle, join })
    }

    async fn start_process(&self) -> IngestResult<Runner> {
        let program = match &self.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()
                .map_err(|e| IngestError::Context(format!("cannot locate own executable: {}", e)))?,
        };

        let port = self.config.process_port();
        let config_file =
            std::env::temp_dir().join(format!("xtal-ingest-{}.toml", uuid::Uuid::new_v4()));

        let mut child_config = self.config.clone();
        child_config.collector.start_as = StartAs::Task;
        child_config.http.port = port;
        child_config.save(&config_file)?;

        let mut child = Command::new(&program)
            .arg("--config")
            .arg(&config_file)
            .arg("--start-as")
            .arg(StartAs::Task.to_string())
            .arg("--port")
            .arg(port.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                IngestError::Context(format!("cannot spawn {}: {}", program.display(), e))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| IngestError::Context(format!("HTTP client setup failed: {}", e)))?;
        let base_url = format!("http://{}:{}", self.config.http.host, port);

        for _ in 0..PROCESS_READY_ATTEMPTS {
            if let Some(exit) = child
                .try_wait()
                .map_err(|e| IngestError::Context(format!("child process lost: {}", e)))?
            {
                let _ = std::fs::remove_file(&config_file);
                return Err(IngestError::Context(format!(
                    "collector process exited during startup: {}",
                    exit
                )));
            }

            let probe = client
                .get(format!("{}/health", base_url))
                .timeout(PROCESS_READY_DELAY * 5)
                .send()
                .await;
            if matches!(&probe, Ok(response) if response.status().is_success()) {
                tracing::debug!(pid = ?child.id(), base_url = %base_url, "Collector process ready");
                return Ok(Runner::Process {
                    child: Mutex::new(child),
                    client,
                    base_url,
                    config_file,
                });
            }

            tokio::time::sleep(PROCESS_READY_DELAY).await;
        }

        let _ = child.kill().await;
        let _ = std::fs::remove_file(&config_file);
        Err(IngestError::Context(format!(
            "collector process did not answer on {}",
            base_url
        )))
    }

    /// Stop the tick loop, letting an in-progress tick finish
    pub async fn stop(&mut self) -> IngestResult<()> {
        let Some(runner) = self.runner.take() else {
            return Ok(());
        };

        match runner {
            Runner::Task { handle, join } => {
                handle.stop();
                join.await
                    .map_err(|e| IngestError::Context(format!("collector task failed: {}", e)))?;
            }
            Runner::Thread { handle, join } => {
                handle.stop();
                tokio::task::spawn_blocking(move || join.join())
                    .await
                    .map_err(|e| IngestError::Context(format!("join failed: {}", e)))?
                    .map_err(|_| IngestError::Context("collector thread panicked".to_string()))?;
            }
            Runner::Process {
                child,
                client,
                base_url,
                config_file,
            } => {
                let mut child = child.into_inner();
                if let Err(e) = client.post(format!("{}/shutdown", base_url)).send().await {
                    tracing::warn!(error = %e, "Shutdown request to collector process failed");
                }

                match tokio::time::timeout(PROCESS_EXIT_TIMEOUT, child.wait()).await {
                    Ok(Ok(exit)) => tracing::debug!(%exit, "Collector process exited"),
                    Ok(Err(e)) => tracing::warn!(error = %e, "Waiting for collector process failed"),
                    Err(_) => {
                        tracing::warn!("Collector process did not exit, killing it");
                        let _ = child.kill().await;
                    }
                }

                let _ = std::fs::remove_file(&config_file);
            }
        }

        tracing::info!(start_as = %self.start_as, "Collector context stopped");
        Ok(())
    }

    pub async fn health(&self) -> ContextHealth {
        let (alive, status) = match &self.runner {
            None => (false, None),
            Some(Runner::Task { handle, join }) => {
                (!join.is_finished() && !handle.is_stopping(), Some(handle.status().await))
            }
            Some(Runner::Thread { handle, join }) => {
                (!join.is_finished() && !handle.is_stopping(), Some(handle.status().await))
            }
            Some(Runner::Process {
                client, base_url, ..
            }) => match fetch_json::<HealthResponse>(client.get(format!("{}/health", base_url))).await {
                Ok(remote) => (remote.collector.alive, remote.collector.status),
                Err(e) => {
                    tracing::debug!(error = %e, "Collector process health check failed");
                    (false, None)
                }
            },
        };

        ContextHealth {
            start_as: self.start_as,
            alive,
            status,
        }
    }

    /// Run a scan tick now and return its report
    pub async fn request_tick(&self) -> IngestResult<TickReport> {
        match &self.runner {
            None => Err(IngestError::Stopped),
            Some(Runner::Task { handle, .. }) | Some(Runner::Thread { handle, .. }) => {
                handle.request_tick().await
            }
            Some(Runner::Process {
                client, base_url, ..
            }) => fetch_json(client.post(format!("{}/scan", base_url))).await,
        }
    }

    /// Look up (and inject if new) the plate for a barcode
    pub async fn resolve_barcode(&self, barcode: &str) -> IngestResult<PlateDescriptor> {
        match &self.runner {
            None => Err(IngestError::Stopped),
            Some(Runner::Task { handle, .. }) | Some(Runner::Thread { handle, .. }) => {
                handle.resolve_barcode(barcode).await
            }
            Some(Runner::Process {
                client, base_url, ..
            }) => fetch_json(client.get(format!("{}/plates/{}", base_url, barcode))).await,
        }
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> IngestResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| IngestError::Context(format!("collector process unreachable: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::Context(format!(
            "collector process returned {}: {}",
            status, body
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| IngestError::Context(format!("unexpected collector process response: {}", e)))
}
