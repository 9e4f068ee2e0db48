use http::HeaderMap;

use crate::error::Result;
use crate::protocol::headers;

/// Request body framing, derived from the headers exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// No body headers at all.
    None,
    /// Body of a known length from `Content-Length`.
    Identity(u64),
    /// `Transfer-Encoding` body made of length-prefixed chunks.
    Chunked,
}

impl BodyMode {
    /// Chunked wins over Content-Length when both are present; the
    /// Content-Length is discarded without a protocol error.
    pub fn from_headers(headers: &HeaderMap) -> Result<BodyMode> {
        if headers::is_chunked(headers) {
            return Ok(BodyMode::Chunked);
        }
        match headers::content_length(headers)? {
            Some(length) => Ok(BodyMode::Identity(length)),
            None => Ok(BodyMode::None),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, BodyMode::None | BodyMode::Identity(0))
    }
}
