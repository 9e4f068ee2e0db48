use bytes::{BufMut, BytesMut};
use http::HeaderMap;

use crate::codec::head_encoder::put_header_lines;

pub(crate) const CHUNK_SUFFIX: &[u8] = b"\r\n";

/// Chunk envelope prefix: `hex(len) CRLF`. The payload and the trailing
/// `CRLF` complete the envelope in the same gather write.
pub(crate) fn encode_chunk_prefix(len: usize, dst: &mut BytesMut) {
    let mut hex = [0u8; 16];
    let mut at = hex.len();
    let mut rest = len;
    loop {
        at -= 1;
        hex[at] = b"0123456789abcdef"[rest % 16];
        rest /= 16;
        if rest == 0 {
            break;
        }
    }
    dst.put_slice(&hex[at..]);
    dst.put_slice(CHUNK_SUFFIX);
}

/// Body terminator: zero-length chunk, then trailers, then a blank line.
pub(crate) fn encode_eof(trailers: &HeaderMap, dst: &mut BytesMut) {
    dst.put_slice(b"0\r\n");
    put_header_lines(trailers, dst);
    dst.put_slice(b"\r\n");
}
