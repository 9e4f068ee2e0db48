use http::{HeaderMap, StatusCode};

/// Mutable response side of an exchange: status, headers, trailers.
#[derive(Debug)]
pub struct ResponseHead {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) trailers: HeaderMap,
}

impl ResponseHead {
    pub(crate) fn new() -> ResponseHead {
        ResponseHead {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }
}

/// Progress of the response write stream.
///
/// Framing is decided on the first write that carries payload (or on the
/// final flush for empty bodies) and the head goes out at that moment.
#[derive(Debug, Default)]
pub(crate) struct WriteState {
    pub bytes_written: u64,
    pub chunked: bool,
    pub headers_sent: bool,
}
