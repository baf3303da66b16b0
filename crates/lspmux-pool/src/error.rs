use crate::handler::PeerId;

/// Errors that can occur in pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Transport-level error (bind, accept).
    #[error("transport error: {0}")]
    Transport(#[from] lspmux_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] lspmux_frame::FrameError),

    /// Poller or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No live connection has this id.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The connection has already been closed.
    #[error("connection {0} is closed")]
    ConnectionClosed(PeerId),

    /// The pool has been shut down.
    #[error("pool is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, PoolError>;
