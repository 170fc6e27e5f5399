//! Tracing pipeline setup.

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Clone, Debug, Default)]
pub struct TelemetryConfig {
    /// Repeated `-v` flags; 0 = error, 1 = info, 2+ = debug.
    pub verbosity: u8,
    /// When set, mirror events into rolling JSON files under this directory.
    pub log_dir: Option<PathBuf>,
}

/// Keeps the non-blocking file writer alive for the process lifetime.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(config.verbosity).into())
        .with_env_var("STOKEHOLD_LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(Box::new(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true),
    ));

    if let Some(dir) = &config.log_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "stokehold.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                layers.push(Box::new(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_target(true)
                        .with_current_span(true),
                ));
                guards.push(guard);
            }
            Err(err) => {
                eprintln!("log dir init failed for {}: {err}", dir.display());
            }
        }
    }

    layers.push(Box::new(filter));

    Registry::default().with(layers).init();

    TelemetryGuard { _guards: guards }
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::ERROR,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}
