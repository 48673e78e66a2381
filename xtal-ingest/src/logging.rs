//! Tracing setup
//!
//! Console output always; a daily rolling file as well when
//! `[logging] file` names a directory. `RUST_LOG` overrides the configured
//! level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use xtal_common::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "xtal-ingest.log";

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("xtal_ingest={level},xtal_common={level},tower_http=info"))
    })
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the life of the process.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let mut guard = None;

    let file_layer = config.file.as_ref().and_then(|directory| {
        if let Err(e) = std::fs::create_dir_all(directory) {
            eprintln!(
                "Warning: cannot create log directory {}: {}",
                directory.display(),
                e
            );
            return None;
        }

        let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter(&config.level)),
        )
    });

    let console_layer = tracing_subscriber::fmt::layer().with_filter(filter(&config.level));

    // A subscriber may already be installed (tests, child process re-init)
    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
