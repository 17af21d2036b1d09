//! File service worker.
//!
//! Serves the file service protocol over stdin/stdout until stdin closes.
//! Logs go to stderr; the filter is read from `FILE_SERVICE_LOG`.
//!
//! Usage:
//!   file-service-worker [--root <dir>] [--debug]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use file_service::transport::WORKER_LOG_ENV;
use file_service::worker::{FileContainer, announce_failure, serve};
use file_service::FailureSignal;

#[derive(Parser)]
#[command(name = "file-service-worker")]
#[command(about = "File service worker speaking line-delimited JSON on stdin/stdout")]
#[command(version)]
struct Cli {
    /// Workspace root to track
    #[arg(long)]
    root: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(WORKER_LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Some(root) = &cli.root
        && !root.is_dir()
    {
        let message = format!("workspace root is not a directory: {}", root.display());
        if let Err(e) = announce_failure(tokio::io::stdout(), &message, FailureSignal::default()).await {
            error!(error = %e, "Failed to announce initialization failure");
        }
        return ExitCode::FAILURE;
    }

    info!(root = ?cli.root, debug = cli.debug, "Starting worker");
    let container = Arc::new(FileContainer::new(cli.root));

    match serve(container, tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}
