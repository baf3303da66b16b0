/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header block has no `Content-Length` header.
    #[error("header block is missing Content-Length")]
    MissingContentLength,

    /// `Content-Length` is not a decimal integer.
    #[error("invalid Content-Length value {value:?}")]
    InvalidContentLength { value: String },

    /// A header line could not be split into `name: value`.
    #[error("malformed header line {line:?}")]
    MalformedHeader { line: String },

    /// The header block grew past the configured limit without terminating.
    #[error("header block too large ({size} bytes, max {max})")]
    HeaderTooLarge { size: usize, max: usize },

    /// The declared body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The body could not be decoded (or encoded) as JSON.
    #[error("invalid JSON body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// The parser hit a framing violation earlier and accepts no more input.
    #[error("parser is poisoned by an earlier framing error")]
    Poisoned,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the byte stream itself is broken and the connection carrying
    /// it cannot be resynchronised.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FrameError::MissingContentLength
                | FrameError::InvalidContentLength { .. }
                | FrameError::MalformedHeader { .. }
                | FrameError::HeaderTooLarge { .. }
                | FrameError::PayloadTooLarge { .. }
                | FrameError::Poisoned
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
