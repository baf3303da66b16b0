use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use lspmux_transport::IpcStream;

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::parser::FrameParser;

const READ_CHUNK: usize = 8 * 1024;

/// Reads complete frames from any blocking `Read` stream.
///
/// Client-side counterpart of the pool's non-blocking connections: callers
/// always get whole frames, however the stream delivers bytes.
pub struct FrameReader<T> {
    inner: T,
    parser: FrameParser,
    ready: VecDeque<Frame>,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Reader whose parser enforces the limits in `config`.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            parser: FrameParser::with_config(config),
            ready: VecDeque::new(),
        }
    }

    /// Block until a whole frame is available.
    ///
    /// End of stream, including in the middle of a frame, is
    /// [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            let ready = &mut self.ready;
            self.parser
                .feed(&chunk[..read], |frame| ready.push_back(frame))?;
        }
    }

    /// Limits applied while parsing.
    pub fn config(&self) -> &FrameConfig {
        self.parser.config()
    }
}

impl FrameReader<IpcStream> {
    /// Like [`FrameReader::with_config`], also applying `config.read_timeout`
    /// to the socket.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: lspmux_transport::TransportError) -> FrameError {
    match err {
        lspmux_transport::TransportError::Io(io)
        | lspmux_transport::TransportError::Accept(io) => FrameError::Io(io),
        lspmux_transport::TransportError::Bind { source, .. }
        | lspmux_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
