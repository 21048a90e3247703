//! SOCK_SEQPACKET transport for seqlog.
//!
//! Records must arrive with the same boundaries they were sent with, so the
//! daemon listens on a connection-oriented `SOCK_SEQPACKET` Unix socket: one
//! `send` on the producer side is exactly one `recv` here, with no framing
//! protocol on top. Tokio has no seqpacket socket type, so these wrappers
//! build the sockets with `socket2` and drive them through
//! [`tokio::io::unix::AsyncFd`] readiness.
//!
//! All sockets are non-blocking. The poll methods follow the AsyncFd
//! discipline: take a readiness guard, attempt the syscall through
//! [`try_io`](tokio::io::unix::AsyncFdReadyGuard::try_io), and retry when a
//! stale readiness flag produced `WouldBlock`.

use std::io::{self, Read};
use std::net::Shutdown;
use std::path::Path;
use std::task::{ready, Context, Poll};

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

/// Largest record the daemon accepts, in bytes.
///
/// Reads use a buffer of exactly this size; the kernel truncates anything
/// larger at the transport layer before the daemon sees it.
pub const MAX_RECORD: usize = 2048;

/// Accept backlog for the daemon's listening socket.
pub const LISTEN_BACKLOG: i32 = 10;

/// Listening seqpacket socket bound to a filesystem path
#[derive(Debug)]
pub struct SeqPacketListener {
    fd: AsyncFd<Socket>,
}

impl SeqPacketListener {
    /// Bind a listening socket at `path` with the daemon's accept backlog.
    ///
    /// The path must not already exist; callers remove stale socket files
    /// before binding. Must be called from within a tokio runtime.
    pub fn bind<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
        socket.bind(&SockAddr::unix(path.as_ref())?)?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            fd: AsyncFd::new(socket)?,
        })
    }

    /// Poll for the next incoming connection.
    ///
    /// Returns the accepted connection and its peer path, which is almost
    /// always absent because client sockets connect unnamed.
    pub fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<(SeqPacketConn, Option<String>)>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            match guard.try_io(|fd| fd.get_ref().accept()) {
                Ok(Ok((socket, addr))) => {
                    let conn = SeqPacketConn::new(socket)?;
                    let peer = addr.as_pathname().map(|p| p.display().to_string());
                    return Poll::Ready(Ok((conn, peer)));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> io::Result<(SeqPacketConn, Option<String>)> {
        std::future::poll_fn(|cx| self.poll_accept(cx)).await
    }

    /// Stop the socket from accepting further connections.
    ///
    /// Dropping the listener afterwards closes the fd; the socket file on
    /// disk is removed separately.
    pub fn shutdown(&self) -> io::Result<()> {
        self.fd.get_ref().shutdown(Shutdown::Both)
    }
}

/// Connected seqpacket socket
#[derive(Debug)]
pub struct SeqPacketConn {
    fd: AsyncFd<Socket>,
}

impl SeqPacketConn {
    fn new(socket: Socket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            fd: AsyncFd::new(socket)?,
        })
    }

    /// Connect to the daemon socket at `path`.
    pub async fn connect<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
        socket.set_nonblocking(true)?;
        let addr = SockAddr::unix(path.as_ref())?;
        match socket.connect(&addr) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                let fd = AsyncFd::new(socket)?;
                {
                    let mut guard = fd.writable().await?;
                    guard.clear_ready();
                }
                if let Some(err) = fd.get_ref().take_error()? {
                    return Err(err);
                }
                return Ok(Self { fd });
            }
            Err(e) => return Err(e),
        }
        Ok(Self {
            fd: AsyncFd::new(socket)?,
        })
    }

    /// Poll for the next record from the peer.
    ///
    /// `Ok(0)` means the peer disconnected. Seqpacket sockets cannot tell a
    /// zero-length record apart from end-of-stream, so producers never send
    /// empty records.
    pub fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            match guard.try_io(|fd| {
                let mut socket: &Socket = fd.get_ref();
                socket.read(buf)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive the next record, waiting for one to arrive.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        std::future::poll_fn(|cx| self.poll_recv(cx, buf)).await
    }

    /// Receive without waiting.
    ///
    /// Used by the shutdown drain, which sweeps already-buffered records out
    /// of each connection: `WouldBlock` there means the connection has
    /// nothing more to offer.
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut socket: &Socket = self.fd.get_ref();
        socket.read(buf)
    }

    /// Send one record to the peer, waiting for socket buffer space.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|fd| fd.get_ref().send(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Shut down one or both directions of the connection.
    ///
    /// On Linux, records the peer already queued to us stay readable after
    /// shutdown; only the empty queue reports end-of-stream. The drain
    /// depends on this.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.fd.get_ref().shutdown(how)
    }

    /// Connected pair for tests, bypassing the listener.
    #[cfg(test)]
    pub(crate) fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = Socket::pair(Domain::UNIX, Type::SEQPACKET, None)?;
        Ok((Self::new(a)?, Self::new(b)?))
    }
}
