use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use stokehold::config::Config;
use stokehold::daemon;
use stokehold::engine::BasicEngineFactory;
use stokehold::telemetry;

#[derive(Parser, Debug)]
#[command(name = "stokehold", version, about = "Application-hosting node")]
struct Cli {
    /// Path to the node configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Raise log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Mirror logs into rolling files under this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let _telemetry = telemetry::init(telemetry::TelemetryConfig {
        verbosity: cli.verbose,
        log_dir: cli.log_dir,
    });

    match daemon::run_node(config, Box::new(BasicEngineFactory)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}
