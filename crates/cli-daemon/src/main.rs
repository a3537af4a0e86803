//! CLI entry point for vodkeeper
//!
//! Parses command line arguments, installs logging and runs the daemon until
//! Ctrl-C or SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vodkeeper::Daemon;

/// vodkeeper - encode, trim and age out stream recordings
#[derive(Parser, Debug)]
#[command(name = "vodkeeper")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip the ffmpeg/ffprobe checks. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vodkeeper=info,vodkeeper_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "vodkeeper starting");
    if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
    }

    let daemon = match Daemon::new(&args.config, args.skip_checks) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };
    info!(
        source = %daemon.config.paths.source_dir.display(),
        output = %daemon.config.paths.output_dir.display(),
        listen = %daemon.config.server.listen_address,
        cleaner = daemon.config.cleaner.enabled,
        "daemon initialized"
    );

    let token = daemon.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        token.cancel();
    });

    if let Err(e) = daemon.run().await {
        error!(error = %e, "daemon error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
