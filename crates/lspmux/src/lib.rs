//! Content-Length framed message multiplexing over Unix domain sockets.
//!
//! A single thread accepts local peers, reassembles each peer's byte stream
//! into frames (a header block with a mandatory `Content-Length`, a blank
//! line, then the body) and hands every frame to a caller-supplied handler.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket listener and blocking client stream
//! - [`frame`]: incremental frame parser, encoder, blocking reader/writer
//! - [`pool`]: readiness-driven connection pool and its `mio` event loop

/// Re-export transport types.
pub mod transport {
    pub use lspmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use lspmux_frame::*;
}

/// Re-export pool types.
pub mod pool {
    pub use lspmux_pool::*;
}
