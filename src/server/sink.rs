//! Durable append sink for received records.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::net::MAX_RECORD;
use crate::stats::DaemonStats;

/// Append-only log file behind a write buffer
///
/// Appends are buffered; durability comes from [`sync`](LogSink::sync),
/// which the daemon calls on its record cadence and once more at shutdown.
pub struct LogSink {
    writer: BufWriter<File>,
    path: PathBuf,
    scratch: Vec<u8>,
    stats: Arc<DaemonStats>,
}

impl LogSink {
    /// Open the log file for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P, stats: Arc<DaemonStats>) -> io::Result<Self> {
        let file = Self::open_file(path.as_ref())?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.as_ref().to_path_buf(),
            scratch: Vec::with_capacity(MAX_RECORD + 1),
            stats,
        })
    }

    fn open_file(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Append one record followed by the record separator.
    ///
    /// A failed write is retried exactly once and the retry is counted. A
    /// second failure is returned to the caller; the daemon treats it as
    /// fatal rather than dropping the record silently.
    pub fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.scratch.clear();
        self.scratch.extend_from_slice(record);
        self.scratch.push(b'\n');

        if let Err(first) = self.writer.write_all(&self.scratch) {
            warn!(error = %first, "log write failed, retrying");
            self.stats.retries.inc();
            self.writer.write_all(&self.scratch)?;
        }
        Ok(())
    }

    /// Flush buffered records and sync the file to stable storage.
    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.stats.syncs.inc();
        debug!(path = %self.path.display(), "log file synced");
        Ok(())
    }

    /// Switch appends over to `new_path`.
    ///
    /// The new handle is opened before anything happens to the current one,
    /// so a failed open leaves the sink writing where it was. Called on
    /// every reload even when the path is unchanged; that is what lets an
    /// external rotation (rename the file, then trigger a reload) take
    /// effect. Buffered records are flushed to the old handle before it is
    /// closed.
    pub fn reopen<P: AsRef<Path>>(&mut self, new_path: P) -> io::Result<()> {
        let file = Self::open_file(new_path.as_ref())?;
        self.writer.flush()?;
        self.writer = BufWriter::new(file);
        self.path = new_path.as_ref().to_path_buf();
        Ok(())
    }

    /// Path currently being appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_adds_separator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let mut sink = LogSink::open(&path, DaemonStats::shared()).unwrap();

        sink.append(b"alpha").unwrap();
        sink.append(b"beta").unwrap();
        sink.sync().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "alpha\nbeta\n");
    }

    #[test]
    fn test_appends_stay_buffered_until_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let stats = DaemonStats::shared();
        let mut sink = LogSink::open(&path, stats.clone()).unwrap();

        sink.append(b"buffered").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert_eq!(stats.snapshot().syncs, 0);

        sink.sync().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "buffered\n");
        assert_eq!(stats.snapshot().syncs, 1);
    }

    #[test]
    fn test_reopen_switches_target() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.log");
        let second = dir.path().join("second.log");
        let mut sink = LogSink::open(&first, DaemonStats::shared()).unwrap();

        sink.append(b"one").unwrap();
        sink.reopen(&second).unwrap();
        sink.append(b"two").unwrap();
        sink.sync().unwrap();

        assert_eq!(std::fs::read_to_string(&first).unwrap(), "one\n");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "two\n");
        assert_eq!(sink.path(), second.as_path());
    }

    #[test]
    fn test_reopen_same_path_supports_rotation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let rotated = dir.path().join("records.log.1");
        let mut sink = LogSink::open(&path, DaemonStats::shared()).unwrap();

        sink.append(b"old").unwrap();
        sink.sync().unwrap();
        std::fs::rename(&path, &rotated).unwrap();

        sink.reopen(&path).unwrap();
        sink.append(b"new").unwrap();
        sink.sync().unwrap();

        assert_eq!(std::fs::read_to_string(&rotated).unwrap(), "old\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[test]
    fn test_reopen_failure_keeps_current_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.log");
        let mut sink = LogSink::open(&path, DaemonStats::shared()).unwrap();

        sink.append(b"kept").unwrap();
        let missing_parent = dir.path().join("no-such-dir").join("records.log");
        assert!(sink.reopen(&missing_parent).is_err());

        sink.append(b"still writable").unwrap();
        sink.sync().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "kept\nstill writable\n"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_write_retries_once() {
        let stats = DaemonStats::shared();
        let mut sink = LogSink::open("/dev/full", stats.clone()).unwrap();

        // Appends buffer until the writer has to spill to the device.
        let record = vec![b'x'; MAX_RECORD];
        let mut result = Ok(());
        for _ in 0..8 {
            result = sink.append(&record);
            if result.is_err() {
                break;
            }
        }

        assert!(result.is_err());
        assert_eq!(stats.snapshot().retries, 1);
    }
}
