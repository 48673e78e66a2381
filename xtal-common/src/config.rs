//! Configuration loading and config file resolution
//!
//! The whole service is described by one TOML file:
//!
//! ```toml
//! database_path = "/var/lib/xtal/xtal.db"
//!
//! [logging]
//! level = "info"
//!
//! [http]
//! port = 5780
//!
//! [collector]
//! type = "direct_poll"
//! start_as = "task"
//! source_directories = ["/dls/science/rockimager/SubwellImages"]
//! visits_root = "/dls/labxchem/data"
//! plates_subdirectory = "SubwellImages"
//! max_wait_seconds = 3600
//!
//! [registry]
//! backend = "sql"
//! url = "sqlite:///var/lib/xtal/registry.db"
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "XTAL_INGEST_CONFIG";

/// Project folder the registry query is restricted to
pub const DEFAULT_PROJECT_FOLDER: &str = "xchem";

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Path to the SQLite store
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub http: HttpConfig,

    pub collector: CollectorConfig,

    pub registry: RegistryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error); RUST_LOG overrides it
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily rolling log file (optional, console only if unset)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// HTTP front end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Collector implementations selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    /// Scan on a fixed period
    #[default]
    DirectPoll,
    /// Scan only when asked to
    Manual,
}

/// Where the collector's tick loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartAs {
    /// Tokio task in the current runtime
    #[default]
    Task,
    /// Dedicated OS thread with its own runtime
    Thread,
    /// Child process of the same binary, driven over HTTP
    Process,
}

impl fmt::Display for StartAs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StartAs::Task => "task",
            StartAs::Thread => "thread",
            StartAs::Process => "process",
        })
    }
}

impl FromStr for StartAs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" | "coro" => Ok(StartAs::Task),
            "thread" => Ok(StartAs::Thread),
            "process" => Ok(StartAs::Process),
            other => Err(Error::Config(format!(
                "Unknown start_as '{}', expected task, thread or process",
                other
            ))),
        }
    }
}

/// Plate directory collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(rename = "type", default)]
    pub kind: CollectorKind,

    #[serde(default)]
    pub start_as: StartAs,

    /// Directories whose immediate subdirectories are plate image directories
    pub source_directories: Vec<PathBuf>,

    /// Root of the visit archive
    pub visits_root: PathBuf,

    /// Directory under each visit that receives promoted plates
    #[serde(default = "default_plates_subdirectory")]
    pub plates_subdirectory: PathBuf,

    /// When set, only these barcodes are ever looked at
    #[serde(default)]
    pub ingest_only_barcodes: Option<Vec<String>>,

    /// Seconds after the newest image before an incomplete plate is promoted anyway
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Length of the barcode prefix of plate directory names
    #[serde(default = "default_barcode_length")]
    pub barcode_length: usize,

    /// Port of the child process when `start_as = "process"` (default: http port + 1)
    #[serde(default)]
    pub process_port: Option<u16>,
}

/// Registry backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RegistryConfig {
    /// Live registry database
    Sql {
        url: String,
        #[serde(default = "default_project_folder")]
        project_folder: String,
        /// Plate type names to accept (default: every known plate kind)
        #[serde(default)]
        plate_types: Option<Vec<String>>,
    },
    /// Seeded rows, for environments without a registry connection
    Fixture {
        #[serde(default = "default_project_folder")]
        project_folder: String,
        #[serde(default)]
        plate_types: Option<Vec<String>>,
        #[serde(default)]
        rows: Vec<RegistryRow>,
    },
}

/// One plate row as the registry reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRow {
    pub registry_plate_id: i64,
    pub barcode: String,
    pub experiment_name: String,
    pub plate_type: String,
    #[serde(default = "default_project_folder")]
    pub project_folder: String,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("xtal").join("xtal.db"))
        .unwrap_or_else(|| PathBuf::from("./xtal_data/xtal.db"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_plates_subdirectory() -> PathBuf {
    PathBuf::from("SubwellImages")
}

fn default_max_wait_seconds() -> u64 {
    3600
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_barcode_length() -> usize {
    4
}

fn default_project_folder() -> String {
    DEFAULT_PROJECT_FOLDER.to_string()
}

impl IngestConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: IngestConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as TOML (used to hand a config to a child process)
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the scanner cannot run with
    pub fn validate(&self) -> Result<()> {
        let collector = &self.collector;

        if collector.source_directories.is_empty() {
            return Err(Error::Config("collector.source_directories is empty".to_string()));
        }
        if collector.barcode_length == 0 {
            return Err(Error::Config("collector.barcode_length must be positive".to_string()));
        }
        if collector.tick_interval_ms == 0 {
            return Err(Error::Config("collector.tick_interval_ms must be positive".to_string()));
        }
        if collector.plates_subdirectory.as_os_str().is_empty()
            || collector.plates_subdirectory.is_absolute()
        {
            return Err(Error::Config(
                "collector.plates_subdirectory must be a relative directory name".to_string(),
            ));
        }
        if let RegistryConfig::Sql { url, .. } = &self.registry {
            if url.trim().is_empty() {
                return Err(Error::Config("registry.url is empty".to_string()));
            }
        }

        Ok(())
    }

    /// Port the child process listens on when running out of process
    pub fn process_port(&self) -> u16 {
        self.collector
            .process_port
            .unwrap_or_else(|| self.http.port.wrapping_add(1))
    }
}

/// Configuration file resolution, in priority order:
/// 1. Command-line argument
/// 2. `XTAL_INGEST_CONFIG` environment variable
/// 3. Platform config directory (`~/.config/xtal/ingest.toml` on Linux)
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    if let Some(path) = dirs::config_dir().map(|d| d.join("xtal").join("ingest.toml")) {
        if path.exists() {
            return Ok(path);
        }
    }

    Err(Error::Config(format!(
        "No configuration file found. Provide one of:\n\
         1. Command line: --config /path/to/ingest.toml\n\
         2. Environment: {}=/path/to/ingest.toml\n\
         3. Config directory: ~/.config/xtal/ingest.toml",
        CONFIG_ENV_VAR
    )))
}
