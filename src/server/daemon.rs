//! The seqlog daemon: one cooperative task owning every connection.

use std::collections::BTreeSet;
use std::future::poll_fn;
use std::io;
use std::net::Shutdown;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::Poll;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::logging::{self, LevelHandle};
use crate::net::{SeqPacketConn, SeqPacketListener, MAX_RECORD};
use crate::server::registry::{ClientId, ClientRegistry};
use crate::server::sink::LogSink;
use crate::stats::DaemonStats;
use crate::Result;

/// Why the daemon is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM
    Terminate,
    /// SIGQUIT
    Quit,
    /// SIGINT
    Interrupt,
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopSignal::Terminate => write!(f, "TERM"),
            StopSignal::Quit => write!(f, "QUIT"),
            StopSignal::Interrupt => write!(f, "INT"),
        }
    }
}

/// Control events delivered to the daemon between loop iterations
#[derive(Debug, Clone, Copy)]
enum ControlEvent {
    Reload,
    Stop(StopSignal),
}

/// Handle for steering a running daemon
///
/// The signal task holds one of these in the real binary; tests drive it
/// directly. Events are acted on at event-loop boundaries, never mid-record.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl ControlHandle {
    /// Ask the daemon to re-read its configuration file.
    pub fn reload(&self) {
        let _ = self.tx.send(ControlEvent::Reload);
    }

    /// Ask the daemon to stop; `signal` only affects what gets logged.
    pub fn stop(&self, signal: StopSignal) {
        let _ = self.tx.send(ControlEvent::Stop(signal));
    }
}

/// One thing the socket side of the loop produced
enum SocketEvent {
    Incoming(SeqPacketConn, Option<String>),
    Payload(ClientId, usize),
    Closed(ClientId),
    ReadError(ClientId, io::Error),
}

enum LoopEvent {
    Control(Option<ControlEvent>),
    Socket(io::Result<SocketEvent>),
}

/// The log aggregation daemon
///
/// Single-tasked by design. Each loop iteration handles exactly one event:
/// a control event, a new connection, or one record from one client. The
/// registry and the sink are therefore never touched concurrently, and a
/// reload or stop can never land in the middle of a record.
pub struct LogDaemon {
    config: Config,
    config_path: PathBuf,
    listener: Option<SeqPacketListener>,
    registry: ClientRegistry,
    sink: LogSink,
    stats: Arc<DaemonStats>,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    level_handle: Option<LevelHandle>,
    read_buf: Vec<u8>,
    poll_cursor: ClientId,
    cleanup_paths: BTreeSet<PathBuf>,
}

impl LogDaemon {
    /// Bind the listen socket, open the log file and write the pid file.
    ///
    /// Returns the daemon plus the control handle used to reload or stop
    /// it. Must be called from within a tokio runtime.
    pub fn new(config: Config, config_path: PathBuf) -> Result<(Self, ControlHandle)> {
        config.validate()?;

        if config.socket_path.exists() {
            std::fs::remove_file(&config.socket_path)?;
        }
        let listener = SeqPacketListener::bind(&config.socket_path)?;

        let stats = DaemonStats::shared();
        let sink = LogSink::open(&config.log_file, stats.clone())?;
        let registry = ClientRegistry::new(stats.clone());

        let mut cleanup_paths = BTreeSet::new();
        cleanup_paths.insert(config.socket_path.clone());
        if let Some(pid_file) = &config.pid_file {
            write_pid_file(pid_file)?;
            cleanup_paths.insert(pid_file.clone());
        }

        let (tx, control_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                config,
                config_path,
                listener: Some(listener),
                registry,
                sink,
                stats,
                control_rx,
                level_handle: None,
                read_buf: vec![0u8; MAX_RECORD],
                poll_cursor: 0,
                cleanup_paths,
            },
            ControlHandle { tx },
        ))
    }

    /// Attach the handle used to change the log level on reload.
    pub fn set_level_handle(&mut self, handle: LevelHandle) {
        self.level_handle = Some(handle);
    }

    /// Shared counters for this daemon.
    pub fn stats(&self) -> Arc<DaemonStats> {
        self.stats.clone()
    }

    /// Run until a stop event arrives, then drain and clean up.
    ///
    /// The drain also runs when the loop exits with an error, so records
    /// already submitted are persisted even on the fatal path.
    pub async fn run(mut self) -> Result<()> {
        info!(
            socket = %self.config.socket_path.display(),
            pid = std::process::id(),
            "seqlogd started"
        );

        let outcome = self.event_loop().await;
        match &outcome {
            Ok(signal) => info!(%signal, "stop requested"),
            Err(e) => error!(error = %e, "event loop failed, draining before exit"),
        }

        let drain = self.drain().await;
        outcome.map(|_| ()).and(drain)
    }

    async fn event_loop(&mut self) -> Result<StopSignal> {
        loop {
            let event = {
                let control = &mut self.control_rx;
                let listener = self.listener.as_ref();
                let registry = &self.registry;
                let cursor = self.poll_cursor;
                let buf = &mut self.read_buf;
                tokio::select! {
                    biased;
                    ctl = control.recv() => LoopEvent::Control(ctl),
                    sock = next_socket_event(listener, registry, cursor, buf) => {
                        LoopEvent::Socket(sock)
                    }
                }
            };

            match event {
                LoopEvent::Control(Some(ControlEvent::Reload)) => self.reload(),
                LoopEvent::Control(Some(ControlEvent::Stop(signal))) => return Ok(signal),
                LoopEvent::Control(None) => {
                    warn!("control channel closed, stopping");
                    return Ok(StopSignal::Terminate);
                }
                LoopEvent::Socket(Ok(SocketEvent::Incoming(conn, peer))) => {
                    let id = self.registry.insert(conn, peer);
                    debug!(client = id, "client connected");
                }
                LoopEvent::Socket(Ok(SocketEvent::Payload(id, len))) => {
                    self.poll_cursor = id;
                    self.persist_record(id, len)?;
                }
                LoopEvent::Socket(Ok(SocketEvent::Closed(id))) => {
                    self.poll_cursor = id;
                    self.drop_client(id, "disconnected");
                }
                LoopEvent::Socket(Ok(SocketEvent::ReadError(id, e))) => {
                    self.poll_cursor = id;
                    if e.kind() == io::ErrorKind::Interrupted {
                        debug!(client = id, "read interrupted, retrying");
                    } else {
                        warn!(client = id, error = %e, "read failed, dropping client");
                        self.drop_client(id, "read error");
                    }
                }
                LoopEvent::Socket(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn persist_record(&mut self, id: ClientId, len: usize) -> Result<()> {
        trace!(client = id, len, "record received");
        self.sink.append(&self.read_buf[..len])?;
        self.stats.messages.inc();
        if self.config.sync_rate > 0 && self.stats.messages.get() % self.config.sync_rate == 0 {
            self.sink.sync()?;
        }
        Ok(())
    }

    fn drop_client(&mut self, id: ClientId, reason: &str) {
        if let Some(client) = self.registry.remove(id) {
            match &client.peer {
                Some(peer) => debug!(client = id, peer = %peer, reason, "client dropped"),
                None => debug!(client = id, reason, "client dropped"),
            }
        }
    }

    fn reload(&mut self) {
        info!(messages = self.stats.messages.get(), "reload requested");

        let loaded = match Config::from_file(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "reload failed, keeping previous configuration");
                return;
            }
        };

        // Reopening the log file is the only fallible application step, so
        // it goes first: failing here leaves the previous snapshot fully in
        // force.
        if let Err(e) = self.sink.reopen(&loaded.log_file) {
            warn!(error = %e, "could not switch log file, keeping previous configuration");
            return;
        }

        if let Some(handle) = &self.level_handle {
            if let Err(e) = logging::apply(handle, loaded.level_filter()) {
                warn!(error = %e, "could not apply log level");
            }
        }

        if loaded.socket_path != self.config.socket_path {
            warn!(
                listening = %self.config.socket_path.display(),
                requested = %loaded.socket_path.display(),
                "listen address can only change at restart, keeping current socket"
            );
        }

        if loaded.pid_file != self.config.pid_file {
            if let Some(pid_file) = &loaded.pid_file {
                match write_pid_file(pid_file) {
                    Ok(()) => {
                        self.cleanup_paths.insert(pid_file.clone());
                    }
                    Err(e) => warn!(error = %e, "could not write pid file"),
                }
            }
        }

        // The bound listen address stays authoritative across reloads.
        let socket_path = self.config.socket_path.clone();
        self.config = Config {
            socket_path,
            ..loaded
        };
        self.stats.reloads.inc();
        info!(
            log_file = %self.config.log_file.display(),
            sync_rate = self.config.sync_rate,
            "configuration reloaded"
        );
    }

    /// Stop accepting, half-close every client, wait out the grace period,
    /// then sweep already-buffered records into the sink before the final
    /// sync and file cleanup.
    async fn drain(&mut self) -> Result<()> {
        info!(clients = self.registry.len(), "draining connections");

        // Refuse further control events; anything already queued stays
        // unread.
        self.control_rx.close();

        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.shutdown() {
                debug!(error = %e, "listener shutdown failed");
            }
        }

        for (id, client) in self.registry.iter() {
            if let Err(e) = client.conn.shutdown(Shutdown::Both) {
                debug!(client = id, error = %e, "client shutdown failed");
            }
        }

        // Producers get the full grace period unconditionally; one caught
        // mid-send by the half-close has this long to finish.
        tokio::time::sleep(self.config.grace_period()).await;

        let outcome = self
            .sweep()
            .and_then(|_| self.sink.sync().map_err(Into::into));
        self.cleanup_files();
        info!(messages = self.stats.messages.get(), "seqlogd stopped");
        outcome
    }

    /// Read every record the kernel already buffered for the half-closed
    /// clients and persist it.
    fn sweep(&mut self) -> Result<()> {
        let mut drained = 0u64;
        while let Some((id, client)) = self.registry.pop_first() {
            let mut saved = 0u64;
            loop {
                match client.conn.try_recv(&mut self.read_buf) {
                    Ok(0) => break,
                    Ok(len) => {
                        self.sink.append(&self.read_buf[..len])?;
                        self.stats.messages.inc();
                        saved += 1;
                    }
                    // WouldBlock and real errors alike: this connection has
                    // nothing more to offer.
                    Err(_) => break,
                }
            }
            drained += saved;
            debug!(client = id, saved, "client drained");
        }
        debug!(drained, "pending records persisted");
        Ok(())
    }

    fn cleanup_files(&mut self) {
        for path in std::mem::take(&mut self.cleanup_paths) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "could not remove file");
            }
        }
    }
}

/// Wait for the next socket-side event: an incoming connection, or one
/// record / disconnect / error from one client.
///
/// The client scan starts after `cursor` and wraps, so a saturated producer
/// cannot shadow later ids. Readiness for every pending fd is registered
/// with the reactor before this returns `Pending`.
async fn next_socket_event(
    listener: Option<&SeqPacketListener>,
    registry: &ClientRegistry,
    cursor: ClientId,
    buf: &mut [u8],
) -> io::Result<SocketEvent> {
    poll_fn(move |cx| {
        if let Some(listener) = listener {
            match listener.poll_accept(cx) {
                Poll::Ready(Ok((conn, peer))) => {
                    return Poll::Ready(Ok(SocketEvent::Incoming(conn, peer)));
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }
        }

        for (id, client) in registry.scan_from(cursor) {
            match client.conn.poll_recv(cx, buf) {
                Poll::Ready(Ok(0)) => return Poll::Ready(Ok(SocketEvent::Closed(id))),
                Poll::Ready(Ok(len)) => return Poll::Ready(Ok(SocketEvent::Payload(id, len))),
                Poll::Ready(Err(e)) => return Poll::Ready(Ok(SocketEvent::ReadError(id, e))),
                Poll::Pending => {}
            }
        }

        Poll::Pending
    })
    .await
}

fn write_pid_file(path: &Path) -> io::Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
}
