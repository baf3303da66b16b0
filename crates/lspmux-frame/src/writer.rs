use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use lspmux_transport::IpcStream;
use serde::Serialize;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::headers::Headers;
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any blocking `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Writer that refuses bodies over `config.max_body_size`.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a frame exactly as it was received or built.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.check_size(frame.body.len())?;
        write_all(&mut self.inner, &frame.content)?;
        self.flush()
    }

    /// Encode and send a body with optional extra headers.
    pub fn send(&mut self, body: &[u8], extra_headers: &Headers) -> Result<()> {
        self.check_size(body.len())?;

        self.buf.clear();
        encode_frame(body, extra_headers, &mut self.buf)?;
        write_all(&mut self.inner, &self.buf)?;
        self.flush()
    }

    /// Serialize `value` as JSON and send it as one frame.
    pub fn send_json<V: Serialize + ?Sized>(
        &mut self,
        value: &V,
        extra_headers: &Headers,
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.send(&body, extra_headers)
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_body_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.config.max_body_size,
            });
        }
        Ok(())
    }
}

impl FrameWriter<IpcStream> {
    /// Like [`FrameWriter::with_config`], also applying `config.write_timeout`
    /// to the socket.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

fn write_all<W: Write>(inner: &mut W, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match inner.write(&bytes[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}
