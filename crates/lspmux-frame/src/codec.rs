use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FrameError, Result};
use crate::headers::Headers;

/// The mandatory header carrying the body length.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Default maximum header block size: 64 KiB.
pub const DEFAULT_MAX_HEADER: usize = 64 * 1024;

/// Default maximum body size: 16 MiB.
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// One decoded message.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Header block, blank line and body exactly as received.
    pub content: Bytes,
    /// Exactly `Content-Length` bytes; shares storage with `content`.
    pub body: Bytes,
    /// Parsed header set.
    pub headers: Headers,
}

impl Frame {
    /// Build a frame for sending, computing `Content-Length` from `body`.
    pub fn new(body: impl Into<Bytes>, extra_headers: Headers) -> Result<Self> {
        let body = body.into();
        let mut wire = BytesMut::new();
        encode_frame(&body, &extra_headers, &mut wire)?;

        let content = wire.freeze();
        let header_len = content.len() - body.len();
        let mut headers = extra_headers;
        headers.remove(CONTENT_LENGTH);
        let headers = std::iter::once((CONTENT_LENGTH.to_string(), body.len().to_string()))
            .chain(
                headers
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string())),
            )
            .collect();

        Ok(Self {
            body: content.slice(header_len..),
            content,
            headers,
        })
    }

    /// Convenience lookup into [`Frame::headers`].
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Decode the body as JSON.
    ///
    /// A failure here concerns this frame's payload only; the stream it came
    /// from is still correctly framed.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(FrameError::InvalidBody)
    }

    /// The body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// The total wire size of this frame (headers + blank line + body).
    pub fn wire_size(&self) -> usize {
        self.content.len()
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// Content-Length: <len>\r\n
/// <extra header>: <value>\r\n      (zero or more)
/// \r\n
/// <body>
/// ```
///
/// A `Content-Length` entry in `extra_headers` is ignored; the real length
/// is always written first.
pub fn encode_frame(body: &[u8], extra_headers: &Headers, dst: &mut BytesMut) -> Result<()> {
    for (name, value) in extra_headers.iter() {
        let bad_name = name.is_empty() || name.contains(':') || name.contains(['\r', '\n']);
        if bad_name || value.contains(['\r', '\n']) {
            return Err(FrameError::MalformedHeader {
                line: format!("{name}: {value}"),
            });
        }
    }

    let length_line = format!("{CONTENT_LENGTH}: {}\r\n", body.len());
    dst.reserve(length_line.len() + body.len() + 2);
    dst.put_slice(length_line.as_bytes());
    for (name, value) in extra_headers.iter() {
        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }
        dst.put_slice(name.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
    dst.put_slice(body);
    Ok(())
}

/// Serialize `value` as JSON and encode it as one frame.
pub fn encode_json<T: Serialize + ?Sized>(
    value: &T,
    extra_headers: &Headers,
    dst: &mut BytesMut,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    encode_frame(&body, extra_headers, dst)
}

/// Configuration for framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum header block size in bytes. Default: 64 KiB.
    pub max_header_size: usize,
    /// Maximum body size in bytes. Default: 16 MiB.
    pub max_body_size: usize,
    /// Read timeout for blocking client reads.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking client writes.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER,
            max_body_size: DEFAULT_MAX_BODY,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
