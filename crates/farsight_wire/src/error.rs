//! Error types for binary stream decoding.

use thiserror::Error;

/// Errors produced while reading or writing wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// The stream ended before the requested value could be read.
    #[error("unexpected end of stream: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A length-prefixed string was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A message opcode that this protocol version does not define.
    #[error("unknown message opcode: {0:#04x}")]
    UnknownMessage(u8),

    /// A status byte outside the defined login status set.
    #[error("unknown login status code: {0}")]
    UnknownStatus(u8),

    /// A compressed sub-stream failed to inflate or deflate.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// A declared length exceeds what the stream can possibly hold.
    #[error("declared length {declared} exceeds stream remainder {remaining}")]
    BadLength { declared: usize, remaining: usize },
}
