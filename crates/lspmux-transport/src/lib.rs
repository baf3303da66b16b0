//! Local stream transport for lspmux.
//!
//! The server side is a non-blocking Unix domain socket listener that plugs
//! into a `mio` registry. The client side is a plain blocking stream, used by
//! the CLI and by tests to talk to a running pool.

pub mod error;
#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
#[cfg(unix)]
pub use stream::{peer_credentials, IpcStream, PeerCredentials};
#[cfg(unix)]
pub use uds::{ListenerConfig, UnixDomainSocket};
