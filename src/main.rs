//! seqlogd - Local log aggregation daemon.

use std::path::PathBuf;

use clap::Parser;
use seqlog::config::Config;
use seqlog::logging;
use seqlog::server::{ControlHandle, LogDaemon, StopSignal};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "seqlogd")]
#[command(about = "Record-oriented local log aggregation daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    config: PathBuf,
}

/// Translates OS signals into control events for the daemon task.
///
/// Runs until the process exits. Sends to a stopped daemon are ignored.
async fn forward_signals(control: ControlHandle) {
    let mut hangup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");
    let mut terminate =
        signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("Failed to install SIGQUIT handler");

    loop {
        tokio::select! {
            _ = hangup.recv() => control.reload(),
            _ = terminate.recv() => control.stop(StopSignal::Terminate),
            _ = quit.recv() => control.stop(StopSignal::Quit),
            _ = tokio::signal::ctrl_c() => control.stop(StopSignal::Interrupt),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config must parse before logging exists; failures land on stderr.
    let config = Config::from_file(&args.config)?;
    let level_handle = logging::init(config.level_filter());

    info!("starting seqlogd v{}", env!("CARGO_PKG_VERSION"));

    let (mut daemon, control) = LogDaemon::new(config, args.config)?;
    daemon.set_level_handle(level_handle);

    tokio::spawn(forward_signals(control));

    if let Err(e) = daemon.run().await {
        error!("daemon failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
