use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

use crate::buffer::LineBuffer;
use crate::error::{Error, Result};
use crate::protocol::{append_coalesced, BodyMode};

/// What the decoder needs from its driver next.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// `n` body bytes were copied into the destination.
    Data(usize),
    /// The body is complete; trailers (if any) have been captured.
    Eof,
    /// A full `CRLF` line must be buffered before decoding can continue.
    NeedLine,
    /// More raw bytes must be buffered before decoding can continue.
    NeedData,
}

/// Decodes the request body out of the shared line buffer, independent of
/// how bytes arrive. The sync and async read paths drive the same machine.
#[derive(Debug)]
pub(crate) struct BodyDecoder {
    state: State,
}

#[derive(Debug)]
enum State {
    Identity { remaining: u64 },
    NeedHeader,
    NeedData { remaining: u64 },
    NeedDelim,
    NeedTrailers,
    Done,
}

impl BodyDecoder {
    pub fn new(mode: BodyMode) -> BodyDecoder {
        let state = match mode {
            BodyMode::None => State::Done,
            BodyMode::Identity(length) => State::Identity { remaining: length },
            BodyMode::Chunked => State::NeedHeader,
        };
        BodyDecoder { state }
    }

    /// The whole declared body has been surfaced (or there was none).
    pub fn is_complete(&self) -> bool {
        match self.state {
            State::Done => true,
            State::Identity { remaining } => remaining == 0,
            _ => false,
        }
    }

    /// Advance the machine as far as the buffered bytes allow.
    pub fn decode(
        &mut self,
        lines: &mut LineBuffer,
        dst: &mut [u8],
        trailers: &mut HeaderMap,
    ) -> Result<Step> {
        loop {
            match self.state {
                State::Done => return Ok(Step::Eof),

                State::Identity { remaining } => {
                    if remaining == 0 {
                        self.state = State::Done;
                        return Ok(Step::Eof);
                    }
                    if lines.is_empty() {
                        return Ok(Step::NeedData);
                    }
                    let n = copy_body(lines, dst, remaining);
                    self.state = State::Identity {
                        remaining: remaining - n as u64,
                    };
                    return Ok(Step::Data(n));
                }

                State::NeedHeader => {
                    let Some(line) = lines.take_line() else {
                        return Ok(Step::NeedLine);
                    };
                    let size = parse_chunk_size(&line)?;
                    trace!(size, "chunk header");
                    if size == 0 {
                        self.state = State::NeedTrailers;
                    } else {
                        self.state = State::NeedData { remaining: size };
                    }
                }

                State::NeedData { remaining } => {
                    if lines.is_empty() {
                        return Ok(Step::NeedData);
                    }
                    let n = copy_body(lines, dst, remaining);
                    let remaining = remaining - n as u64;
                    self.state = if remaining == 0 {
                        State::NeedDelim
                    } else {
                        State::NeedData { remaining }
                    };
                    return Ok(Step::Data(n));
                }

                State::NeedDelim => {
                    if lines.len() < 2 {
                        return Ok(Step::NeedData);
                    }
                    if &lines.as_slice()[..2] != b"\r\n" {
                        return Err(Error::InvalidChunkDelimiter);
                    }
                    lines.advance(2);
                    self.state = State::NeedHeader;
                }

                State::NeedTrailers => {
                    let Some(line) = lines.take_line() else {
                        return Ok(Step::NeedLine);
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                        return Ok(Step::Eof);
                    }
                    parse_trailer(&line, trailers)?;
                }
            }
        }
    }
}

fn copy_body(lines: &mut LineBuffer, dst: &mut [u8], remaining: u64) -> usize {
    let max = dst.len().min(remaining.min(usize::MAX as u64) as usize);
    lines.take(&mut dst[..max])
}

/// `hex-length [; ext]*`; extensions are ignored, the length must parse.
fn parse_chunk_size(line: &Bytes) -> Result<u64> {
    let digits = match line.iter().position(|&b| b == b';') {
        Some(at) => &line[..at],
        None => &line[..],
    };
    let digits = trim_ascii(digits);
    if digits.is_empty() {
        return Err(Error::InvalidChunkLength);
    }

    let mut size: u64 = 0;
    for &b in digits {
        let value = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(Error::InvalidChunkLength),
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(u64::from(value)))
            .ok_or(Error::InvalidChunkLength)?;
    }
    Ok(size)
}

fn parse_trailer(line: &Bytes, trailers: &mut HeaderMap) -> Result<()> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(Error::InvalidRequestHeader)?;
    let name =
        HeaderName::from_bytes(&line[..colon]).map_err(|_| Error::InvalidRequestHeader)?;
    let value = HeaderValue::from_bytes(trim_ascii(&line[colon + 1..]))
        .map_err(|_| Error::InvalidRequestHeader)?;
    append_coalesced(trailers, name, value);
    Ok(())
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(decoder: &mut BodyDecoder, lines: &mut LineBuffer) -> (Vec<u8>, HeaderMap) {
        let mut out = Vec::new();
        let mut trailers = HeaderMap::new();
        let mut chunk = [0u8; 7];
        loop {
            match decoder.decode(lines, &mut chunk, &mut trailers).unwrap() {
                Step::Data(n) => out.extend_from_slice(&chunk[..n]),
                Step::Eof => return (out, trailers),
                step => panic!("unexpected step with full buffer: {step:?}"),
            }
        }
    }

    #[test]
    fn no_body_is_immediately_eof() {
        let mut decoder = BodyDecoder::new(BodyMode::None);
        let mut lines = LineBuffer::new();
        let mut trailers = HeaderMap::new();
        assert_eq!(
            decoder.decode(&mut lines, &mut [0; 8], &mut trailers).unwrap(),
            Step::Eof
        );
        assert!(decoder.is_complete());
    }

    #[test]
    fn identity_counts_down() {
        let mut decoder = BodyDecoder::new(BodyMode::Identity(11));
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"foo bar bazEXTRA");

        let (body, _) = read_all(&mut decoder, &mut lines);
        assert_eq!(body, b"foo bar baz");
        assert_eq!(lines.as_slice(), b"EXTRA");
        assert!(decoder.is_complete());
    }

    #[test]
    fn identity_requests_more_data() {
        let mut decoder = BodyDecoder::new(BodyMode::Identity(4));
        let mut lines = LineBuffer::new();
        let mut trailers = HeaderMap::new();
        assert_eq!(
            decoder.decode(&mut lines, &mut [0; 8], &mut trailers).unwrap(),
            Step::NeedData
        );
    }

    #[test]
    fn chunked_basic() {
        let mut decoder = BodyDecoder::new(BodyMode::Chunked);
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\nNEXT");

        let (body, trailers) = read_all(&mut decoder, &mut lines);
        assert_eq!(body, b"hello world");
        assert!(trailers.is_empty());
        assert_eq!(lines.as_slice(), b"NEXT");
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let mut decoder = BodyDecoder::new(BodyMode::Chunked);
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"10; name=value; other\r\n1234567890abcdef\r\n0\r\n\r\n");

        let (body, _) = read_all(&mut decoder, &mut lines);
        assert_eq!(body, b"1234567890abcdef");
    }

    #[test]
    fn trailers_are_captured() {
        let mut decoder = BodyDecoder::new(BodyMode::Chunked);
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"3\r\nOK\n\r\n0\r\nTrailer-Foo: 42\r\nTrailer-Foo: 43\r\n\r\n");

        let (body, trailers) = read_all(&mut decoder, &mut lines);
        assert_eq!(body, b"OK\n");
        assert_eq!(trailers.get("trailer-foo").unwrap(), "42, 43");
    }

    #[test]
    fn bad_chunk_size() {
        let mut decoder = BodyDecoder::new(BodyMode::Chunked);
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"zz\r\n");
        let err = decoder
            .decode(&mut lines, &mut [0; 8], &mut HeaderMap::new())
            .unwrap_err();
        assert_eq!(err.code(), Some(5));
    }

    #[test]
    fn overflowing_chunk_size() {
        let mut decoder = BodyDecoder::new(BodyMode::Chunked);
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"fffffffffffffffff\r\n");
        let err = decoder
            .decode(&mut lines, &mut [0; 8], &mut HeaderMap::new())
            .unwrap_err();
        assert_eq!(err.code(), Some(5));
    }

    #[test]
    fn missing_chunk_delimiter() {
        let mut decoder = BodyDecoder::new(BodyMode::Chunked);
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"2\r\nabXX0\r\n\r\n");

        let mut chunk = [0u8; 8];
        let mut trailers = HeaderMap::new();
        assert_eq!(
            decoder.decode(&mut lines, &mut chunk, &mut trailers).unwrap(),
            Step::Data(2)
        );
        let err = decoder
            .decode(&mut lines, &mut chunk, &mut trailers)
            .unwrap_err();
        assert_eq!(err.code(), Some(6));
    }

    #[test]
    fn asks_for_a_line_when_header_is_partial() {
        let mut decoder = BodyDecoder::new(BodyMode::Chunked);
        let mut lines = LineBuffer::new();
        lines.push_bytes(b"5");
        assert_eq!(
            decoder
                .decode(&mut lines, &mut [0; 8], &mut HeaderMap::new())
                .unwrap(),
            Step::NeedLine
        );
    }
}
