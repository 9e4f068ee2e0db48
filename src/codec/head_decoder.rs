use http::{HeaderMap, HeaderName, HeaderValue, Method};
use httparse::Status;
use tracing::{debug, trace};

use crate::buffer::LineBuffer;
use crate::error::{Error, Result};
use crate::protocol::{append_coalesced, BodyMode, RequestHead};

const MAX_HEADER_NUM: usize = 64;

/// Parse a complete request head out of the line buffer.
///
/// The caller has already loaded through the `CRLF CRLF` terminator;
/// everything past the head stays in the buffer as initial body bytes.
pub(crate) fn decode_head(lines: &mut LineBuffer) -> Result<(RequestHead, BodyMode)> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut req = httparse::Request::new(&mut headers);

    let consumed = match req.parse(lines.as_slice()).map_err(map_parse_error)? {
        Status::Complete(n) => n,
        // the terminator is buffered, so a partial parse means the head
        // itself is malformed
        Status::Partial => return Err(Error::InvalidRequestLine),
    };

    if req.version != Some(1) {
        return Err(Error::UnsupportedHttpVersion);
    }

    let method = req
        .method
        .ok_or(Error::InvalidRequestLine)?
        .parse::<Method>()
        .map_err(|_| Error::InvalidRequestLine)?;
    let target = req.path.ok_or(Error::InvalidRequestLine)?.to_owned();

    let mut header_map = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| Error::InvalidRequestHeader)?;
        let value =
            HeaderValue::from_bytes(header.value).map_err(|_| Error::InvalidRequestHeader)?;
        append_coalesced(&mut header_map, name, value);
    }

    trace!(head_size = consumed, "parsed request head");
    lines.advance(consumed);

    let head = RequestHead::new(method, target, header_map);
    let mode = BodyMode::from_headers(head.headers())?;
    debug!(method = %head.method(), uri = head.target(), body = ?mode, "request");

    Ok((head, mode))
}

fn map_parse_error(e: httparse::Error) -> Error {
    match e {
        httparse::Error::Version => Error::UnsupportedHttpVersion,
        httparse::Error::HeaderName | httparse::Error::HeaderValue | httparse::Error::TooManyHeaders => {
            Error::InvalidRequestHeader
        }
        _ => Error::InvalidRequestLine,
    }
}
