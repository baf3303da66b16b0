use std::io::{self, ErrorKind, Read, Write};

use bytes::{Buf, BytesMut};
use lspmux_frame::{FrameConfig, FrameError, FrameParser};
use mio::event::Source;
use mio::net::UnixStream;
use tracing::{debug, trace, warn};

use crate::error::{PoolError, Result};
use crate::handler::{FrameHandler, PeerId};
use crate::registrar::{interest_for, Readiness, Registrar};

/// Default size of a single receive.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Default number of receives a connection may make per readable event.
pub const DEFAULT_READ_BUDGET: usize = 16;

/// Why a connection was closed.
#[derive(Debug)]
pub enum CloseReason {
    /// A receive returned zero bytes.
    PeerClosed,
    /// A send accepted zero bytes.
    WriteZero,
    /// The peer broke the framing rules.
    Framing(FrameError),
    /// The socket or the registrar failed.
    Io(io::Error),
    /// Closed by the owner.
    Local,
}

/// One peer: its socket, pending output and frame parser.
///
/// A connection is open until its socket is released; after that every
/// operation is a no-op and the socket is never unregistered twice.
pub struct Connection<S = UnixStream> {
    id: PeerId,
    stream: Option<S>,
    outbound: BytesMut,
    parser: FrameParser,
    read_buf: Box<[u8]>,
    read_budget: usize,
    input_pending: bool,
    close_reason: Option<CloseReason>,
    frames_received: u64,
}

impl<S> Connection<S>
where
    S: Read + Write + Source,
{
    /// Take ownership of an accepted, non-blocking stream and register it
    /// for READ.
    pub fn open<R>(
        id: PeerId,
        mut stream: S,
        frame_config: FrameConfig,
        read_chunk_size: usize,
        registrar: &R,
    ) -> Result<Self>
    where
        R: Registrar + ?Sized,
    {
        registrar.register(&mut stream, id.into(), interest_for(false))?;
        debug!(peer = %id, "connection opened");
        Ok(Self {
            id,
            stream: Some(stream),
            outbound: BytesMut::new(),
            parser: FrameParser::with_config(frame_config),
            read_buf: vec![0u8; read_chunk_size.max(1)].into_boxed_slice(),
            read_budget: DEFAULT_READ_BUDGET,
            input_pending: false,
            close_reason: None,
            frames_received: 0,
        })
    }

    /// Limit the receives made for one readable event. Zero is treated as one.
    pub fn with_read_budget(mut self, budget: usize) -> Self {
        self.read_budget = budget.max(1);
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// True when the last readable event used its whole read budget, so the
    /// socket may still hold data that no new readiness edge will announce.
    pub fn has_pending_input(&self) -> bool {
        self.input_pending && !self.is_closed()
    }

    /// Handle one readiness notification.
    ///
    /// Readable: receive chunks until the socket would block or the read
    /// budget is spent, handing the frames each chunk completes to `handler`
    /// before the next receive. Replies are queued once at the end of the
    /// event. Writable: send pending output until it is gone or the socket
    /// would block.
    pub fn event<R, H>(&mut self, readiness: Readiness, registrar: &R, handler: &mut H)
    where
        R: Registrar + ?Sized,
        H: FrameHandler + ?Sized,
    {
        if self.is_closed() {
            return;
        }

        if readiness.is_readable() {
            let mut reply = BytesMut::new();
            let outcome = self.receive(handler, &mut reply);
            if !reply.is_empty() {
                if let Err(err) = self.queue_send(&reply, registrar) {
                    debug!(peer = %self.id, error = %err, "dropping reply");
                }
            }
            if let Err(reason) = outcome {
                self.close_with(reason, registrar);
                return;
            }
        }

        if readiness.is_writable() && !self.is_closed() {
            if let Err(reason) = self.transmit() {
                self.close_with(reason, registrar);
                return;
            }
            if let Err(err) = self.push_interest(registrar) {
                self.close_with(CloseReason::Io(err), registrar);
            }
        }
    }

    /// Append already-framed bytes to the outbound buffer and ask for WRITE
    /// readiness. Only call from the dispatch thread.
    pub fn queue_send<R>(&mut self, bytes: &[u8], registrar: &R) -> Result<()>
    where
        R: Registrar + ?Sized,
    {
        if self.is_closed() {
            return Err(PoolError::ConnectionClosed(self.id));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        self.outbound.extend_from_slice(bytes);
        trace!(peer = %self.id, queued = bytes.len(), pending = self.outbound.len(), "queued output");
        if let Err(err) = self.push_interest(registrar) {
            let returned = io::Error::new(err.kind(), err.to_string());
            self.close_with(CloseReason::Io(err), registrar);
            return Err(PoolError::Io(returned));
        }
        Ok(())
    }

    /// Unregister and release the socket. Safe to call any number of times.
    pub fn close<R>(&mut self, registrar: &R)
    where
        R: Registrar + ?Sized,
    {
        self.close_with(CloseReason::Local, registrar);
    }

    fn receive<H>(
        &mut self,
        handler: &mut H,
        reply: &mut BytesMut,
    ) -> std::result::Result<(), CloseReason>
    where
        H: FrameHandler + ?Sized,
    {
        self.input_pending = false;
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        let id = self.id;
        let frames_received = &mut self.frames_received;
        let mut reads = 0;
        while reads < self.read_budget {
            let read = match stream.read(&mut self.read_buf) {
                Ok(0) => return Err(CloseReason::PeerClosed),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(CloseReason::Io(err)),
            };
            reads += 1;
            trace!(peer = %id, read, "received bytes");
            self.parser
                .feed(&self.read_buf[..read], |frame| {
                    *frames_received += 1;
                    debug!(peer = %id, size = frame.body.len(), "frame received");
                    handler.handle(id, frame, reply);
                })
                .map_err(CloseReason::Framing)?;
        }

        trace!(peer = %id, reads, "read budget spent");
        self.input_pending = true;
        Ok(())
    }

    fn transmit(&mut self) -> std::result::Result<(), CloseReason> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => return Err(CloseReason::WriteZero),
                Ok(n) => {
                    trace!(peer = %self.id, sent = n, "sent bytes");
                    self.outbound.advance(n);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(CloseReason::Io(err)),
            }
        }
        Ok(())
    }

    fn push_interest<R>(&mut self, registrar: &R) -> io::Result<()>
    where
        R: Registrar + ?Sized,
    {
        let interest = interest_for(!self.outbound.is_empty());
        match self.stream.as_mut() {
            Some(stream) => registrar.modify(stream, self.id.into(), interest),
            None => Ok(()),
        }
    }

    fn close_with<R>(&mut self, reason: CloseReason, registrar: &R)
    where
        R: Registrar + ?Sized,
    {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        if let Err(err) = registrar.unregister(&mut stream) {
            debug!(peer = %self.id, error = %err, "unregister failed");
        }
        drop(stream);

        match &reason {
            CloseReason::Framing(err) => {
                warn!(peer = %self.id, error = %err, "framing violation; closing connection")
            }
            CloseReason::Io(err) => warn!(peer = %self.id, error = %err, "connection I/O error"),
            CloseReason::WriteZero => debug!(peer = %self.id, "send accepted no bytes; closing"),
            CloseReason::PeerClosed => debug!(peer = %self.id, "peer closed connection"),
            CloseReason::Local => debug!(peer = %self.id, "connection closed"),
        }

        if !self.outbound.is_empty() {
            debug!(peer = %self.id, dropped = self.outbound.len(), "discarding unsent output");
            self.outbound.clear();
        }
        self.close_reason = Some(reason);
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.stream.is_none())
            .field("pending_output", &self.outbound.len())
            .field("frames_received", &self.frames_received)
            .finish()
    }
}
