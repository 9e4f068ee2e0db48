use std::io::{Read, Write};
use std::task::{Context, Poll};

use bytes::BytesMut;
use http::header::{CONTENT_LENGTH, EXPECT, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::buffer::{LineBuffer, CRLF, CRLF_CRLF};
use crate::codec::{self, BodyDecoder, Step};
use crate::error::{Error, Result};
use crate::protocol::{ensure_date, is_chunked, wants_close, Query, RequestHead, ResponseHead, WriteState};
use crate::transport::Transport;

const MAX_HEAD_BYTES: usize = 8 * 1024;
const MAX_LINE_BYTES: usize = 8 * 1024;
const DISCARD_CHUNK: usize = 64 * 1024;

/// One request/response pair bound to a transport.
///
/// Reading hides the request body framing (identity or chunked with
/// trailers); writing hides the response framing, emitting the status line
/// and headers lazily on the first write. [`finish`] runs the completion
/// protocol: drain the unread request body, hand over-read bytes back to
/// the transport, and terminate the response body. After a successful
/// finish the transport serves the next exchange or, for a `101` response,
/// a post-upgrade protocol via [`into_transport`].
///
/// Every operation takes `&mut self`, so a connection's steps are
/// naturally serialized; the async finish is the one place where the read
/// and write directions of the transport progress together.
///
/// [`finish`]: Exchange::finish
/// [`into_transport`]: Exchange::into_transport
#[derive(Debug)]
pub struct Exchange<S> {
    transport: Transport<S>,
    lines: LineBuffer,
    head: RequestHead,
    body: BodyDecoder,
    request_trailers: HeaderMap,
    response: ResponseHead,
    write: WriteState,
    finished: bool,
}

impl<S> Exchange<S> {
    fn build(transport: Transport<S>, mut lines: LineBuffer) -> Result<Exchange<S>> {
        let (head, mode) = codec::decode_head(&mut lines)?;
        Ok(Exchange {
            transport,
            lines,
            body: BodyDecoder::new(mode),
            request_trailers: HeaderMap::new(),
            response: ResponseHead::new(),
            write: WriteState::default(),
            finished: false,
            head,
        })
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn target(&self) -> &str {
        self.head.target()
    }

    pub fn path(&self) -> &str {
        self.head.path()
    }

    pub fn query(&self) -> &Query {
        self.head.query()
    }

    pub fn fragment(&self) -> &str {
        self.head.fragment()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    /// Trailer headers received after a chunked request body. Empty until
    /// the body has been read (or drained) to the end.
    pub fn request_trailers(&self) -> &HeaderMap {
        &self.request_trailers
    }

    /// The client asked for a `100 Continue` before sending its body.
    pub fn expects_continue(&self) -> bool {
        self.head
            .headers()
            .get(EXPECT)
            .map(|v| v.as_bytes().starts_with(b"100-"))
            .unwrap_or(false)
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn response_headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response.headers
    }

    /// Trailers to send after a chunked response body. Setting any on a
    /// response that ends up unchunked fails `finish` with
    /// [`Error::InvalidResponseState`].
    pub fn response_trailers(&self) -> &HeaderMap {
        self.response.trailers()
    }

    pub fn response_trailers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response.trailers
    }

    /// The terminal `finish` has completed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// A `101 Switching Protocols` response has been finished; the
    /// transport belongs to the new protocol.
    pub fn is_upgrade(&self) -> bool {
        self.finished && self.response.status == StatusCode::SWITCHING_PROTOCOLS
    }

    /// Neither side asked for the connection to close.
    pub fn keep_alive(&self) -> bool {
        !wants_close(self.head.headers()) && !wants_close(&self.response.headers)
    }

    /// Reclaim the transport, restoring any over-read bytes first so the
    /// next reader starts exactly where this exchange left off.
    pub fn into_transport(mut self) -> Transport<S> {
        let residual = self.lines.take_residual();
        self.transport.put_back(&residual);
        self.transport
    }

    fn framing_exempt(&self) -> bool {
        let status = self.response.status;
        status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || self.head.method() == Method::HEAD
    }

    /// Decide framing and serialize the response head, once.
    fn encode_head_if_needed(&mut self, payload_len: usize, eof: bool, out: &mut BytesMut) {
        if self.write.headers_sent {
            return;
        }
        let status = self.response.status;

        // a provisional response carries no Date; the final one will
        if !status.is_informational() {
            ensure_date(&mut self.response.headers);
        }

        if self.framing_exempt() {
            // 1xx, 204, 304 and HEAD: no body framing at all
        } else if is_chunked(&self.response.headers) {
            self.write.chunked = true;
            self.response.headers.remove(CONTENT_LENGTH);
        } else if self.response.headers.contains_key(CONTENT_LENGTH) {
            // identity, exactly as declared
        } else if payload_len > 0 {
            self.write.chunked = true;
            self.response
                .headers
                .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        } else if eof {
            self.response
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }

        codec::encode_head(status, &self.response.headers, out);
        self.write.headers_sent = true;
        trace!(status = %status, chunked = self.write.chunked, "response head serialized");
    }

    fn check_writable(&self) -> Result<()> {
        if self.finished {
            return Err(Error::response_state("write after finish"));
        }
        Ok(())
    }

    fn is_provisional(&self) -> bool {
        let status = self.response.status;
        status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS
    }

    fn build_provisional_bytes(&mut self) -> BytesMut {
        let mut out = BytesMut::new();
        self.encode_head_if_needed(0, false, &mut out);
        out
    }

    /// A provisional response went out; the exchange stays open for the
    /// final one.
    fn reset_after_provisional(&mut self) {
        trace!(status = %self.response.status, "provisional response sent");
        self.write = WriteState::default();
    }

    /// Head (if still unsent) plus the body terminator with trailers.
    fn build_final_bytes(&mut self) -> Result<BytesMut> {
        let mut out = BytesMut::new();
        self.encode_head_if_needed(0, true, &mut out);
        if self.write.chunked {
            codec::encode_eof(&self.response.trailers, &mut out);
        } else if !self.response.trailers.is_empty() {
            return Err(Error::response_state("trailers require a chunked response"));
        }
        Ok(out)
    }

    fn needs_drain(&self) -> bool {
        !self.response.status.is_informational() && !self.body.is_complete()
    }

    fn restore_over_read(&mut self) {
        let residual = self.lines.take_residual();
        self.transport.put_back(&residual);
    }
}

// * Blocking side *******************************************************

impl<S: Read + Write> Exchange<S> {
    /// Read one request head off the transport and bind the exchange.
    pub fn accept(mut transport: Transport<S>) -> Result<Exchange<S>> {
        let mut lines = LineBuffer::new();
        lines.load_until(&mut transport, CRLF_CRLF, MAX_HEAD_BYTES)?;
        Exchange::build(transport, lines)
    }

    /// Read decoded request body bytes; `Ok(0)` marks the end of the body.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self
                .body
                .decode(&mut self.lines, buf, &mut self.request_trailers)?
            {
                Step::Data(n) => return Ok(n),
                Step::Eof => return Ok(0),
                Step::NeedLine => {
                    self.lines
                        .load_until(&mut self.transport, CRLF, MAX_LINE_BYTES)?;
                }
                Step::NeedData => {
                    self.lines.fill(&mut self.transport)?;
                }
            }
        }
    }

    /// Write response body bytes. The first write with payload emits the
    /// status line and headers and fixes the framing. An empty write is a
    /// flush marker.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        if buf.is_empty() {
            if self.write.headers_sent {
                self.transport.flush()?;
            }
            return Ok(0);
        }

        let mut head = BytesMut::new();
        self.encode_head_if_needed(buf.len(), false, &mut head);

        if self.write.chunked {
            codec::encode_chunk_prefix(buf.len(), &mut head);
            self.transport
                .write_all_vectored(&[&head[..], buf, codec::CHUNK_SUFFIX])?;
        } else if head.is_empty() {
            self.transport.write_all(buf)?;
        } else {
            self.transport.write_all_vectored(&[&head[..], buf])?;
        }

        self.write.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Complete the exchange: drain the unread request body, restore
    /// over-read bytes to the transport, and terminate the response.
    ///
    /// A 1xx status (other than 101) makes this provisional: the head goes
    /// out, nothing is drained, and the exchange stays open for the final
    /// response.
    pub fn finish(&mut self) -> Result<()> {
        self.check_writable()?;

        if self.is_provisional() {
            let out = self.build_provisional_bytes();
            self.transport.write_all(&out)?;
            self.transport.flush()?;
            self.reset_after_provisional();
            return Ok(());
        }

        if self.needs_drain() {
            self.drain()?;
        }
        let out = self.build_final_bytes()?;
        self.restore_over_read();
        self.transport.write_all(&out)?;
        self.transport.flush()?;
        self.finished = true;
        trace!(
            bytes = self.write.bytes_written,
            chunked = self.write.chunked,
            "exchange finished"
        );
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let mut scratch = vec![0u8; DISCARD_CHUNK];
        let mut discarded = 0u64;
        loop {
            match self.read(&mut scratch)? {
                0 => {
                    trace!(discarded, "drained unread request body");
                    return Ok(());
                }
                n => discarded += n as u64,
            }
        }
    }
}

// * Async side **********************************************************

impl<S: AsyncRead + AsyncWrite + Unpin> Exchange<S> {
    /// Async counterpart of [`accept`](Exchange::accept).
    pub async fn accept_async(mut transport: Transport<S>) -> Result<Exchange<S>> {
        let mut lines = LineBuffer::new();
        std::future::poll_fn(|cx| {
            lines.poll_load_until(cx, &mut transport, CRLF_CRLF, MAX_HEAD_BYTES)
        })
        .await?;
        Exchange::build(transport, lines)
    }

    fn poll_read_body(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            match self
                .body
                .decode(&mut self.lines, buf, &mut self.request_trailers)?
            {
                Step::Data(n) => return Poll::Ready(Ok(n)),
                Step::Eof => return Poll::Ready(Ok(0)),
                Step::NeedLine => {
                    std::task::ready!(self.lines.poll_load_until(
                        cx,
                        &mut self.transport,
                        CRLF,
                        MAX_LINE_BYTES
                    ))?;
                }
                Step::NeedData => {
                    std::task::ready!(self.lines.poll_fill(cx, &mut self.transport))?;
                }
            }
        }
    }

    /// Async counterpart of [`read`](Exchange::read).
    pub async fn read_async(&mut self, buf: &mut [u8]) -> Result<usize> {
        std::future::poll_fn(|cx| self.poll_read_body(cx, buf)).await
    }

    /// Async counterpart of [`write`](Exchange::write).
    pub async fn write_async(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        if buf.is_empty() {
            if self.write.headers_sent {
                self.transport.flush_async().await?;
            }
            return Ok(0);
        }

        let mut head = BytesMut::new();
        self.encode_head_if_needed(buf.len(), false, &mut head);

        if self.write.chunked {
            codec::encode_chunk_prefix(buf.len(), &mut head);
            self.transport
                .write_all_vectored_async(&[&head[..], buf, codec::CHUNK_SUFFIX])
                .await?;
        } else if head.is_empty() {
            self.transport.write_all_async(buf).await?;
        } else {
            self.transport
                .write_all_vectored_async(&[&head[..], buf])
                .await?;
        }

        self.write.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Async counterpart of [`finish`](Exchange::finish).
    ///
    /// The drain of the unread request body and the final response flush
    /// progress together; the future resolves only once both legs have
    /// completed, reporting the last error observed on either.
    pub async fn finish_async(&mut self) -> Result<()> {
        self.check_writable()?;

        if self.is_provisional() {
            let out = self.build_provisional_bytes();
            self.transport.write_all_async(&out).await?;
            self.transport.flush_async().await?;
            self.reset_after_provisional();
            return Ok(());
        }

        let out = self.build_final_bytes()?;
        let mut scratch = if self.needs_drain() {
            Some(vec![0u8; DISCARD_CHUNK])
        } else {
            None
        };

        let mut drain_done = scratch.is_none();
        let mut written = 0usize;
        let mut flushed = false;
        let mut last_error: Option<Error> = None;

        std::future::poll_fn(|cx| {
            // read leg: discard whatever the application left unread
            while !drain_done {
                let scratch = scratch.as_deref_mut().unwrap();
                match self.poll_read_body(cx, scratch) {
                    Poll::Pending => break,
                    Poll::Ready(Ok(0)) => drain_done = true,
                    Poll::Ready(Ok(_)) => {}
                    Poll::Ready(Err(e)) => {
                        last_error = Some(e);
                        drain_done = true;
                    }
                }
            }

            // write leg: response head (if still unsent) and terminator
            loop {
                if written < out.len() {
                    match self.transport.poll_write(cx, &out[written..]) {
                        Poll::Pending => break,
                        Poll::Ready(Ok(n)) => written += n,
                        Poll::Ready(Err(e)) => {
                            last_error = Some(e);
                            written = out.len();
                            flushed = true;
                        }
                    }
                } else if !flushed {
                    match self.transport.poll_flush(cx) {
                        Poll::Pending => break,
                        Poll::Ready(Ok(())) => flushed = true,
                        Poll::Ready(Err(e)) => {
                            last_error = Some(e);
                            flushed = true;
                        }
                    }
                } else {
                    break;
                }
            }

            if drain_done && written >= out.len() && flushed {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;

        self.restore_over_read();
        self.finished = true;
        match last_error {
            Some(e) => Err(e),
            None => {
                trace!(
                    bytes = self.write.bytes_written,
                    chunked = self.write.chunked,
                    "exchange finished"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// In-memory stream: reads from a script, collects writes.
    struct Pipe {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Pipe {
        fn new(input: &[u8]) -> Pipe {
            Pipe {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn accept(input: &[u8]) -> Exchange<Pipe> {
        Exchange::accept(Transport::new(Pipe::new(input))).unwrap()
    }

    fn output(exchange: Exchange<Pipe>) -> Vec<u8> {
        exchange.into_transport().into_parts().0.output
    }

    #[test]
    fn first_write_emits_head_once() {
        let mut ex = accept(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ex.response_headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        ex.write(b"01234").unwrap();
        ex.write(b"56789").unwrap();
        ex.finish().unwrap();

        let out = output(ex);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(text.matches("HTTP/1.1").count(), 1);
        assert!(text.ends_with("\r\n\r\n0123456789"));
    }

    #[test]
    fn body_without_content_length_is_chunked() {
        let mut ex = accept(b"GET / HTTP/1.1\r\n\r\n");
        ex.write(b"how now").unwrap();
        ex.write(b"brown cow").unwrap();
        ex.finish().unwrap();

        let out = output(ex);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with("7\r\nhow now\r\n9\r\nbrown cow\r\n0\r\n\r\n"));
    }

    #[test]
    fn empty_body_gets_content_length_zero() {
        let mut ex = accept(b"GET / HTTP/1.1\r\n\r\n");
        ex.finish().unwrap();

        let out = output(ex);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(!text.contains("Transfer-Encoding"));
    }

    #[test]
    fn head_request_skips_framing() {
        let mut ex = accept(b"HEAD / HTTP/1.1\r\n\r\n");
        ex.finish().unwrap();

        let text = String::from_utf8(output(ex)).unwrap();
        assert!(!text.contains("Content-Length"));
        assert!(!text.contains("Transfer-Encoding"));
        assert!(text.contains("Date: "));
    }

    #[test]
    fn no_content_skips_framing() {
        let mut ex = accept(b"GET / HTTP/1.1\r\n\r\n");
        ex.set_status(StatusCode::NO_CONTENT);
        ex.finish().unwrap();

        let text = String::from_utf8(output(ex)).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn write_after_finish_is_rejected() {
        let mut ex = accept(b"GET / HTTP/1.1\r\n\r\n");
        ex.finish().unwrap();
        let err = ex.write(b"late").unwrap_err();
        assert!(matches!(err, Error::InvalidResponseState { .. }));
        let err = ex.finish().unwrap_err();
        assert!(matches!(err, Error::InvalidResponseState { .. }));
    }

    #[test]
    fn trailers_on_identity_response_fail_finish() {
        let mut ex = accept(b"GET / HTTP/1.1\r\n\r\n");
        ex.response_headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("2"));
        ex.response_trailers_mut()
            .insert("x-sum", HeaderValue::from_static("1"));
        ex.write(b"ok").unwrap();
        let err = ex.finish().unwrap_err();
        assert!(matches!(err, Error::InvalidResponseState { .. }));
    }

    #[test]
    fn trailers_are_sent_after_chunked_body() {
        let mut ex = accept(b"GET / HTTP/1.1\r\n\r\n");
        ex.write(b"payload").unwrap();
        ex.response_trailers_mut()
            .insert("x-sum", HeaderValue::from_static("99"));
        ex.finish().unwrap();

        let text = String::from_utf8(output(ex)).unwrap();
        assert!(text.ends_with("7\r\npayload\r\n0\r\nX-Sum: 99\r\n\r\n"));
    }

    #[test]
    fn finish_drains_unread_body_and_restores_position() {
        let mut ex = accept(b"PUT /u HTTP/1.1\r\nContent-Length: 11\r\n\r\nfoo bar bazNEXT");
        ex.finish().unwrap();

        let transport = ex.into_transport();
        assert_eq!(transport.pending(), 4);
        let (pipe, residual) = transport.into_parts();
        assert_eq!(&residual[..], b"NEXT");
        assert!(pipe.output.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn declared_transfer_encoding_erases_content_length() {
        let mut ex = accept(b"GET / HTTP/1.1\r\n\r\n");
        ex.response_headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
        ex.response_headers_mut()
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        ex.write(b"data").unwrap();
        ex.finish().unwrap();

        let text = String::from_utf8(output(ex)).unwrap();
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("4\r\ndata\r\n0\r\n\r\n"));
    }
}
