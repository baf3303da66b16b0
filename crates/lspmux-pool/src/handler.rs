use std::sync::mpsc::Sender;

use bytes::BytesMut;
use lspmux_frame::Frame;
use mio::Token;
use tracing::debug;

/// Identifies one accepted connection; doubles as its registrar token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub usize);

impl From<PeerId> for Token {
    fn from(id: PeerId) -> Token {
        Token(id.0)
    }
}

impl From<Token> for PeerId {
    fn from(token: Token) -> PeerId {
        PeerId(token.0)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Consumer of decoded frames.
///
/// Called on the dispatch thread, once per frame, in the order the frames
/// arrived on that connection. Bytes appended to `reply` are queued on the
/// same connection after the handler returns; they must already be framed
/// (see [`lspmux_frame::encode_frame`]).
pub trait FrameHandler {
    fn handle(&mut self, peer: PeerId, frame: Frame, reply: &mut BytesMut);
}

impl<F> FrameHandler for F
where
    F: FnMut(PeerId, Frame, &mut BytesMut),
{
    fn handle(&mut self, peer: PeerId, frame: Frame, reply: &mut BytesMut) {
        self(peer, frame, reply)
    }
}

/// Forwards frames to another thread; never replies.
impl FrameHandler for Sender<(PeerId, Frame)> {
    fn handle(&mut self, peer: PeerId, frame: Frame, _reply: &mut BytesMut) {
        if self.send((peer, frame)).is_err() {
            debug!(%peer, "frame receiver dropped; discarding frame");
        }
    }
}
