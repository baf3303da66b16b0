//! Readiness-driven multiplexing of framed local connections.
//!
//! One thread waits on a poller and hands each ready `(token, readiness)`
//! pair to a [`ConnectionPool`]. The pool accepts peers on its listening
//! socket and forwards everything else to the owning [`Connection`], which
//! reads its socket in budgeted chunks into a frame parser and hands
//! complete frames to the injected [`FrameHandler`].
//!
//! The poller is reached only through the [`Registrar`] trait, so pool and
//! connection logic can be driven by hand in tests. [`EventLoop`] is the
//! `mio`-backed driver used by the CLI.

pub mod connection;
pub mod error;
pub mod event_loop;
pub mod handler;
pub mod pool;
pub mod registrar;

pub use connection::{CloseReason, Connection, DEFAULT_READ_BUDGET, DEFAULT_READ_CHUNK};
pub use error::{PoolError, Result};
pub use event_loop::{EventLoop, StopHandle, WAKER};
pub use handler::{FrameHandler, PeerId};
pub use pool::{ConnectionPool, PoolConfig, PoolState, DEFAULT_EVENT_CAPACITY, LISTENER};
pub use registrar::{interest_for, Readiness, Registrar};
