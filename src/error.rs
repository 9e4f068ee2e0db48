use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the protocol engine.
///
/// Parse errors carry a stable numeric code (see [`Error::code`]) so
/// embedders can report them uniformly; everything else is transport or
/// usage trouble.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request line")]
    InvalidRequestLine,

    #[error("invalid request header")]
    InvalidRequestHeader,

    #[error("unsupported http version")]
    UnsupportedHttpVersion,

    #[error("invalid content-length: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid chunk length")]
    InvalidChunkLength,

    #[error("invalid chunk delimiter")]
    InvalidChunkDelimiter,

    #[error("header block too large, current size: {current_size}, max size: {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("invalid response state: {reason}")]
    InvalidResponseState { reason: &'static str },

    /// The peer closed the stream in the middle of an operation.
    #[error("transport closed")]
    Closed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn response_state(reason: &'static str) -> Self {
        Error::InvalidResponseState { reason }
    }

    /// Stable numeric code for parse errors, `None` for transport and
    /// usage errors.
    pub fn code(&self) -> Option<u8> {
        match self {
            Error::InvalidRequestLine => Some(1),
            Error::InvalidRequestHeader => Some(2),
            Error::UnsupportedHttpVersion => Some(3),
            Error::InvalidContentLength { .. } => Some(4),
            Error::InvalidChunkLength => Some(5),
            Error::InvalidChunkDelimiter => Some(6),
            _ => None,
        }
    }

    /// True for a clean end-of-stream from the peer.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// True for request parse errors where an embedder would typically
    /// answer 400 or drop the connection.
    pub fn is_parse(&self) -> bool {
        self.code().is_some()
    }
}
