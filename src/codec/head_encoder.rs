use bytes::{BufMut, BytesMut};
use http::{HeaderMap, StatusCode};

/// Serialize `HTTP/1.1 SP code SP reason CRLF` plus headers and the blank
/// line. Unknown status codes get an empty reason but a well-formed line.
pub(crate) fn encode_head(status: StatusCode, headers: &HeaderMap, dst: &mut BytesMut) {
    dst.put_slice(b"HTTP/1.1 ");
    dst.put_slice(status.as_str().as_bytes());
    dst.put_slice(b" ");
    dst.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    dst.put_slice(b"\r\n");

    put_header_lines(headers, dst);
    dst.put_slice(b"\r\n");
}

/// `NAME ": " VALUE CRLF` for every header, names rendered in the
/// conventional Train-Case.
pub(crate) fn put_header_lines(headers: &HeaderMap, dst: &mut BytesMut) {
    for (name, value) in headers.iter() {
        put_canonical_name(name.as_str().as_bytes(), dst);
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
}

fn put_canonical_name(name: &[u8], dst: &mut BytesMut) {
    let mut upper = true;
    for &b in name {
        dst.put_u8(if upper { b.to_ascii_uppercase() } else { b });
        upper = b == b'-';
    }
}
