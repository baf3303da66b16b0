use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Credentials of the process on the other end of a Unix socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// A blocking client-side stream to a listening pool.
///
/// The pool itself never uses this type; its accepted sockets are the
/// non-blocking `mio` streams returned by [`crate::UnixDomainSocket`].
pub struct IpcStream {
    inner: UnixStream,
}

impl IpcStream {
    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Self { inner })
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = self.inner.try_clone()?;
        Ok(Self { inner })
    }

    /// Shut down the write half, signalling end-of-stream to the pool.
    pub fn shutdown_write(&self) -> Result<()> {
        self.inner
            .shutdown(std::net::Shutdown::Write)
            .map_err(Into::into)
    }

    /// Credentials of the listening process, where the platform exposes them.
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        peer_credentials(&self.inner)
    }
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("fd", &self.inner.as_raw_fd())
            .finish()
    }
}

/// Read `SO_PEERCRED` from a connected Unix socket (Linux only).
#[cfg(target_os = "linux")]
pub fn peer_credentials<S: AsRawFd>(socket: &S) -> Option<PeerCredentials> {
    let fd = socket.as_raw_fd();
    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
    // and `fd` is an open Unix socket descriptor borrowed for the call.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
        Some(PeerCredentials {
            uid: cred.uid,
            gid: cred.gid,
            pid: cred.pid as u32,
        })
    } else {
        None
    }
}

/// Peer credentials are not exposed on this platform.
#[cfg(not(target_os = "linux"))]
pub fn peer_credentials<S: AsRawFd>(_socket: &S) -> Option<PeerCredentials> {
    None
}
