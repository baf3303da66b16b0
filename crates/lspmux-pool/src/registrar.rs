use std::io;

use mio::event::{Event, Source};
use mio::{Interest, Registry, Token};

/// The poller capability the pool needs: register, modify, unregister.
///
/// Waiting for readiness is left to whoever drives the pool; see
/// [`crate::EventLoop`].
pub trait Registrar {
    fn register(&self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()>;

    fn modify(&self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()>;

    fn unregister(&self, source: &mut dyn Source) -> io::Result<()>;
}

impl Registrar for Registry {
    fn register(&self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        Registry::register(self, source, token, interest)
    }

    fn modify(&self, source: &mut dyn Source, token: Token, interest: Interest) -> io::Result<()> {
        self.reregister(source, token, interest)
    }

    fn unregister(&self, source: &mut dyn Source) -> io::Result<()> {
        self.deregister(source)
    }
}

/// Interest for an open connection: always READ, WRITE only while output
/// is pending.
pub fn interest_for(pending_write: bool) -> Interest {
    if pending_write {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    }
}

/// Which I/O directions a handle is ready for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    readable: bool,
    writable: bool,
}

impl Readiness {
    pub const READABLE: Readiness = Readiness {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Readiness = Readiness {
        readable: false,
        writable: true,
    };
    pub const BOTH: Readiness = Readiness {
        readable: true,
        writable: true,
    };

    pub fn is_readable(self) -> bool {
        self.readable
    }

    pub fn is_writable(self) -> bool {
        self.writable
    }

    pub fn is_empty(self) -> bool {
        !self.readable && !self.writable
    }
}

impl std::ops::BitOr for Readiness {
    type Output = Readiness;

    fn bitor(self, rhs: Readiness) -> Readiness {
        Readiness {
            readable: self.readable || rhs.readable,
            writable: self.writable || rhs.writable,
        }
    }
}

impl From<&Event> for Readiness {
    /// Hang-ups and errors count as readable so the next receive surfaces
    /// them (as end-of-stream or an I/O error).
    fn from(event: &Event) -> Self {
        Readiness {
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}
