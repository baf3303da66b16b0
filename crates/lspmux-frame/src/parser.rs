use bytes::BytesMut;
use tracing::trace;

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::headers::Headers;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

#[derive(Debug)]
enum State {
    /// Looking for the blank line that ends the header block. Bytes before
    /// `scanned` are complete, non-empty header lines.
    Header { scanned: usize },
    /// Headers parsed; waiting until `header_len + content_length` bytes are
    /// buffered.
    Body {
        header_len: usize,
        content_length: usize,
        headers: Headers,
    },
    /// A framing violation was reported; no further input is accepted.
    Poisoned,
}

/// Incremental frame decoder.
///
/// Bytes can be fed in chunks of any size; each complete frame is handed to
/// the callback as soon as its last byte arrives, and a single feed may
/// complete several frames.
#[derive(Debug)]
pub struct FrameParser {
    buf: BytesMut,
    state: State,
    config: FrameConfig,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: State::Header { scanned: 0 },
            config,
        }
    }

    /// Append `bytes` and emit every frame that is now complete.
    ///
    /// On a framing violation the error is returned, nothing more is emitted,
    /// and the parser stays poisoned until [`FrameParser::reset`]. Frames
    /// completed earlier in the same call have already been emitted.
    pub fn feed<F>(&mut self, bytes: &[u8], mut on_frame: F) -> Result<()>
    where
        F: FnMut(Frame),
    {
        if matches!(self.state, State::Poisoned) {
            return Err(FrameError::Poisoned);
        }
        if bytes.is_empty() {
            return Ok(());
        }

        self.buf.extend_from_slice(bytes);
        loop {
            match self.step() {
                Ok(Some(frame)) => on_frame(frame),
                Ok(None) => return Ok(()),
                Err(err) => {
                    self.state = State::Poisoned;
                    self.buf.clear();
                    return Err(err);
                }
            }
        }
    }

    /// Drop all buffered bytes and return to the initial state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::Header { scanned: 0 };
    }

    /// Number of bytes received but not yet emitted as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True while a frame's header block or body is partially received.
    pub fn is_mid_frame(&self) -> bool {
        match self.state {
            State::Header { .. } => !self.buf.is_empty(),
            State::Body { .. } => true,
            State::Poisoned => false,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(self.state, State::Poisoned)
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Advance the state machine by at most one frame.
    fn step(&mut self) -> Result<Option<Frame>> {
        if let State::Header { scanned } = self.state {
            let Some(header_len) = self.scan_header_block(scanned)? else {
                return Ok(None);
            };
            let headers = Headers::parse_block(&self.buf[..header_len])?;
            let content_length = headers.content_length()?;
            if content_length > self.config.max_body_size {
                return Err(FrameError::PayloadTooLarge {
                    size: content_length,
                    max: self.config.max_body_size,
                });
            }
            trace!(header_len, content_length, "frame headers complete");
            self.state = State::Body {
                header_len,
                content_length,
                headers,
            };
        }

        match std::mem::replace(&mut self.state, State::Header { scanned: 0 }) {
            State::Body {
                header_len,
                content_length,
                headers,
            } if self.buf.len() >= header_len + content_length => {
                let content = self.buf.split_to(header_len + content_length).freeze();
                let body = content.slice(header_len..);
                trace!(size = content.len(), "frame complete");
                Ok(Some(Frame {
                    content,
                    body,
                    headers,
                }))
            }
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    /// Find the end of the header block, starting at a line boundary.
    ///
    /// Returns the length of the block including the blank line, or `None`
    /// after recording how far complete lines have been scanned.
    fn scan_header_block(&mut self, scanned: usize) -> Result<Option<usize>> {
        let mut line_start = scanned;
        while let Some(offset) = self.buf[line_start..].iter().position(|&b| b == b'\n') {
            let line_end = line_start + offset;
            let line = &self.buf[line_start..line_end];
            let next = line_end + 1;
            if line.is_empty() || line == b"\r" {
                self.check_header_size(next)?;
                return Ok(Some(next));
            }
            line_start = next;
        }

        self.check_header_size(self.buf.len())?;
        self.state = State::Header {
            scanned: line_start,
        };
        Ok(None)
    }

    fn check_header_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_header_size {
            return Err(FrameError::HeaderTooLarge {
                size,
                max: self.config.max_header_size,
            });
        }
        Ok(())
    }
}
