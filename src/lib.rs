//! # seqlog - Record-Oriented Local Log Aggregation
//!
//! seqlog collects discrete log records from local producer processes over a
//! `SOCK_SEQPACKET` Unix socket and appends them to a single durable log file.
//!
//! ## Features
//!
//! - **Record Boundaries**: SEQPACKET sockets preserve message framing end to end,
//!   so one producer send is exactly one stored record
//! - **Single-Task Multiplexer**: one cooperative task owns every connection;
//!   no locks on the hot path
//! - **Durability Cadence**: buffered appends with a configurable fsync-every-N
//!   sync rate
//! - **Live Reload**: log level, log file and sync rate can be changed without
//!   restarting the daemon
//! - **Draining Shutdown**: on stop, connections are half-closed and already
//!   submitted records are persisted before the process exits
//!
//! ## Quick Start
//!
//! ### Daemon
//! ```no_run
//! use seqlog::config::Config;
//! use seqlog::server::{LogDaemon, StopSignal};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("seqlogd.toml")?;
//!     let (daemon, control) = LogDaemon::new(config, "seqlogd.toml".into())?;
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         control.stop(StopSignal::Interrupt);
//!     });
//!
//!     daemon.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Producer
//! ```no_run
//! use seqlog::client::LogProducer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut producer = LogProducer::new("/run/seqlog.sock");
//!     producer.send(b"frontend: request handled in 3ms").await?;
//!     producer.close();
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod logging;
pub mod net;
pub mod server;
pub mod stats;

/// Common error types used throughout seqlog
pub mod error {
    use std::fmt;

    /// seqlog error types
    #[derive(Debug)]
    pub enum SeqlogError {
        /// I/O operation failed
        Io(std::io::Error),
        /// Configuration error
        Config(String),
        /// Producer-side error
        Client(String),
    }

    impl fmt::Display for SeqlogError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                SeqlogError::Io(e) => write!(f, "I/O error: {}", e),
                SeqlogError::Config(e) => write!(f, "Configuration error: {}", e),
                SeqlogError::Client(e) => write!(f, "Client error: {}", e),
            }
        }
    }

    impl std::error::Error for SeqlogError {}

    impl From<std::io::Error> for SeqlogError {
        fn from(err: std::io::Error) -> Self {
            SeqlogError::Io(err)
        }
    }

    /// Result type alias for seqlog operations
    pub type Result<T> = std::result::Result<T, SeqlogError>;
}

pub use error::{Result, SeqlogError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::LogProducer;
    pub use crate::config::Config;
    pub use crate::net::{SeqPacketConn, SeqPacketListener, MAX_RECORD};
    pub use crate::server::{ControlHandle, LogDaemon, StopSignal};
    pub use crate::stats::DaemonStats;
    pub use crate::{Result, SeqlogError};
}
