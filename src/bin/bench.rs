//! seqlog-bench - load generator for a running seqlogd.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use seqlog::client::LogProducer;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "seqlog-bench")]
#[command(about = "Load generator for a running seqlogd")]
#[command(version)]
struct Args {
    /// Number of concurrent producers
    concurrency: usize,

    /// Records sent by each producer
    messages: u64,

    /// Daemon socket path
    socket: PathBuf,

    /// Daemon pid; when set, 20 reload signals are fired during the run
    #[arg(long)]
    daemon_pid: Option<i32>,
}

/// One producer task: a dedicated connection sending fixed-shape records.
async fn produce(id: usize, messages: u64, socket: PathBuf) -> seqlog::Result<u64> {
    let mut producer = LogProducer::new(socket);
    let filler = "x".repeat(80);
    for seq in 0..messages {
        let record = format!("bench {:03} {:08} {}", id, seq, filler);
        producer.send(record.as_bytes()).await?;
    }
    producer.close();
    Ok(messages)
}

/// Fires SIGHUP at the daemon every 100ms so reloads overlap the load.
async fn reload_storm(pid: i32) {
    for _ in 0..20 {
        sleep(Duration::from_millis(100)).await;
        // SAFETY: kill(2) delivers a signal; no memory is involved.
        if unsafe { libc::kill(pid, libc::SIGHUP) } != 0 {
            warn!(pid, "reload signal failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!(
        concurrency = args.concurrency,
        messages = args.messages,
        socket = %args.socket.display(),
        "starting load run"
    );

    let started = Instant::now();

    let mut workers = Vec::with_capacity(args.concurrency);
    for id in 0..args.concurrency {
        workers.push(tokio::spawn(produce(id, args.messages, args.socket.clone())));
    }

    let storm = args.daemon_pid.map(|pid| tokio::spawn(reload_storm(pid)));

    let mut total = 0u64;
    for worker in workers {
        total += worker.await??;
    }
    if let Some(storm) = storm {
        storm.await?;
    }

    let elapsed = started.elapsed();
    let rate = (total as f64 / elapsed.as_secs_f64()) as u64;
    info!(
        total,
        elapsed_ms = elapsed.as_millis() as u64,
        rate_per_sec = rate,
        "load run complete"
    );

    Ok(())
}
