//! Header-delimited message framing, as used by the Language Server Protocol.
//!
//! Every message on the wire is:
//! - zero or more `Name: Value` header lines, each ended by `\r\n` or `\n`
//! - one empty line
//! - exactly `Content-Length` bytes of body
//!
//! [`FrameParser`] rebuilds frames from an arbitrarily chunked byte stream.
//! [`encode_frame`] produces the same format for the opposite direction.

pub mod codec;
pub mod error;
pub mod headers;
pub mod parser;
pub mod reader;
pub mod writer;

pub use codec::{
    encode_frame, encode_json, Frame, FrameConfig, CONTENT_LENGTH, DEFAULT_MAX_BODY,
    DEFAULT_MAX_HEADER,
};
pub use error::{FrameError, Result};
pub use headers::Headers;
pub use parser::FrameParser;
pub use reader::FrameReader;
pub use writer::FrameWriter;
