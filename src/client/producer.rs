//! Producer-side client for submitting records to the daemon.

use std::io;
use std::net::Shutdown;
use std::path::PathBuf;

use tokio::time::{sleep, timeout, Duration};
use tracing::debug;

use crate::net::SeqPacketConn;
use crate::{Result, SeqlogError};

/// Ceiling on a single connect or send attempt.
const OP_TIMEOUT: Duration = Duration::from_millis(200);

/// Pause between attempts, so a down daemon is not hammered.
const RETRY_THROTTLE: Duration = Duration::from_millis(100);

/// Errors a producer treats as "the daemon is briefly unavailable".
///
/// Covers the daemon restarting (socket file missing, connection refused),
/// the daemon closing our connection (broken pipe, reset), and transient
/// resource exhaustion (timeouts, would-block).
fn is_recoverable(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::NotFound
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

/// Client for submitting log records to a seqlog daemon
///
/// The connection is established lazily and re-established whenever an
/// attempt fails with a recoverable error, with a throttle between
/// attempts. [`send`](LogProducer::send) returns once the record has been
/// accepted by the daemon's socket; a record that was mid-flight during a
/// daemon restart is sent again on the new connection, so delivery is
/// at-least-once.
pub struct LogProducer {
    socket_path: PathBuf,
    conn: Option<SeqPacketConn>,
}

impl LogProducer {
    /// Create a producer for the daemon socket at `path`.
    ///
    /// No connection is made until the first [`send`](LogProducer::send).
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            socket_path: path.into(),
            conn: None,
        }
    }

    /// Submit one record, retrying until the daemon accepts it.
    ///
    /// Retries indefinitely while failures are recoverable; anything else
    /// is returned. Records longer than [`MAX_RECORD`](crate::net::MAX_RECORD)
    /// are truncated by the transport. Empty records are rejected because
    /// the wire cannot tell them apart from end-of-stream.
    pub async fn send(&mut self, record: &[u8]) -> Result<()> {
        if record.is_empty() {
            return Err(SeqlogError::Client(
                "empty records are indistinguishable from end-of-stream".to_string(),
            ));
        }

        loop {
            if self.conn.is_none() {
                match timeout(OP_TIMEOUT, SeqPacketConn::connect(&self.socket_path)).await {
                    Ok(Ok(conn)) => self.conn = Some(conn),
                    Ok(Err(e)) if is_recoverable(e.kind()) => {
                        debug!(error = %e, "connect failed, retrying");
                        sleep(RETRY_THROTTLE).await;
                        continue;
                    }
                    Ok(Err(e)) => {
                        return Err(SeqlogError::Client(format!("connect failed: {}", e)));
                    }
                    Err(_elapsed) => {
                        debug!("connect timed out, retrying");
                        sleep(RETRY_THROTTLE).await;
                        continue;
                    }
                }
            }

            let Some(conn) = self.conn.as_ref() else {
                continue;
            };
            match timeout(OP_TIMEOUT, conn.send(record)).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) if is_recoverable(e.kind()) => {
                    debug!(error = %e, "send failed, reconnecting");
                    self.conn = None;
                    sleep(RETRY_THROTTLE).await;
                }
                Ok(Err(e)) => {
                    return Err(SeqlogError::Client(format!("send failed: {}", e)));
                }
                Err(_elapsed) => {
                    debug!("send timed out, reconnecting");
                    self.conn = None;
                    sleep(RETRY_THROTTLE).await;
                }
            }
        }
    }

    /// Close the connection to the daemon.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{SeqPacketListener, MAX_RECORD};
    use tempfile::tempdir;

    #[test]
    fn test_recoverable_error_classification() {
        assert!(is_recoverable(io::ErrorKind::TimedOut));
        assert!(is_recoverable(io::ErrorKind::WouldBlock));
        assert!(is_recoverable(io::ErrorKind::NotFound));
        assert!(is_recoverable(io::ErrorKind::BrokenPipe));
        assert!(is_recoverable(io::ErrorKind::ConnectionRefused));
        assert!(is_recoverable(io::ErrorKind::ConnectionReset));

        assert!(!is_recoverable(io::ErrorKind::PermissionDenied));
        assert!(!is_recoverable(io::ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_empty_record_rejected() {
        let mut producer = LogProducer::new("/tmp/unused.sock");
        let err = producer.send(b"").await.unwrap_err();
        assert!(matches!(err, SeqlogError::Client(_)));
    }

    #[tokio::test]
    async fn test_send_waits_for_daemon_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("late.sock");
        let mut producer = LogProducer::new(&path);

        let sender = tokio::spawn(async move {
            producer.send(b"waited for daemon").await.unwrap();
            producer
        });

        // The producer retries against the missing socket until we bind it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let listener = SeqPacketListener::bind(&path).unwrap();

        let (conn, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; MAX_RECORD];
        let n = conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"waited for daemon");

        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drops_connection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drop.sock");
        let listener = SeqPacketListener::bind(&path).unwrap();
        let mut producer = LogProducer::new(&path);

        producer.send(b"first").await.unwrap();
        let (first_conn, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; MAX_RECORD];
        let n = first_conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");
        drop(first_conn);

        producer.send(b"second").await.unwrap();
        let (second_conn, _) = listener.accept().await.unwrap();
        let n = second_conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");
    }

    #[tokio::test]
    async fn test_unrecoverable_error_is_returned() {
        // Unix socket paths max out near 108 bytes; this address can never
        // be valid, so the failure must not be retried.
        let long = "x".repeat(200);
        let mut producer = LogProducer::new(format!("/tmp/{}.sock", long));

        let err = producer.send(b"never delivered").await.unwrap_err();
        assert!(matches!(err, SeqlogError::Client(_)));
    }
}
