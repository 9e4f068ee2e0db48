use std::io::{Read, Write};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::transport::Transport;

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const CRLF_CRLF: &[u8] = b"\r\n\r\n";

const FILL_CHUNK: usize = 8 * 1024;

/// Buffered reader that loads until a delimiter is present, then hands out
/// one line at a time.
///
/// The buffer is shared with the body decoder: bytes over-read past the
/// header terminator stay here and become the first body bytes, and
/// whatever is left after an exchange goes back to the transport through
/// [`take_residual`].
///
/// [`take_residual`]: LineBuffer::take_residual
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: BytesMut,
    // prefix already scanned for the current delimiter search
    searched: usize,
}

impl LineBuffer {
    pub fn new() -> LineBuffer {
        LineBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume `n` bytes from the front.
    pub fn advance(&mut self, n: usize) {
        self.buf.advance(n);
        self.searched = 0;
    }

    /// Copy up to `dst.len()` buffered bytes out, consuming them.
    pub fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = self.buf.len().min(dst.len());
        dst[..n].copy_from_slice(&self.buf[..n]);
        self.advance(n);
        n
    }

    /// The next line without its `CRLF`, if a complete line is buffered.
    pub fn take_line(&mut self) -> Option<Bytes> {
        let at = find(&self.buf, CRLF, 0)?;
        let line = self.buf.split_to(at).freeze();
        self.buf.advance(CRLF.len());
        self.searched = 0;
        Some(line)
    }

    /// Hand the unconsumed remainder over for [`Transport::put_back`].
    pub fn take_residual(&mut self) -> BytesMut {
        self.searched = 0;
        std::mem::take(&mut self.buf)
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Block until `delim` is buffered. Fails with [`Error::Closed`] when
    /// the stream ends first and with [`Error::TooLargeHeader`] past `max`.
    pub fn load_until<S: Read + Write>(
        &mut self,
        transport: &mut Transport<S>,
        delim: &[u8],
        max: usize,
    ) -> Result<()> {
        loop {
            if find(&self.buf, delim, self.searched).is_some() {
                return Ok(());
            }
            self.mark_searched(delim);
            self.check_limit(max)?;
            self.fill(transport)?;
        }
    }

    pub fn poll_load_until<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        cx: &mut Context<'_>,
        transport: &mut Transport<S>,
        delim: &[u8],
        max: usize,
    ) -> Poll<Result<()>> {
        loop {
            if find(&self.buf, delim, self.searched).is_some() {
                return Poll::Ready(Ok(()));
            }
            self.mark_searched(delim);
            self.check_limit(max)?;
            std::task::ready!(self.poll_fill(cx, transport))?;
        }
    }

    /// Read whatever is available from the transport into the buffer.
    pub fn fill<S: Read + Write>(&mut self, transport: &mut Transport<S>) -> Result<usize> {
        let mut chunk = [0u8; FILL_CHUNK];
        let n = transport.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    pub fn poll_fill<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        cx: &mut Context<'_>,
        transport: &mut Transport<S>,
    ) -> Poll<Result<usize>> {
        let mut chunk = [0u8; FILL_CHUNK];
        let n = std::task::ready!(transport.poll_read(cx, &mut chunk))?;
        self.buf.extend_from_slice(&chunk[..n]);
        Poll::Ready(Ok(n))
    }

    fn mark_searched(&mut self, delim: &[u8]) {
        self.searched = self.buf.len().saturating_sub(delim.len() - 1);
    }

    fn check_limit(&self, max: usize) -> Result<()> {
        if self.buf.len() > max {
            return Err(Error::TooLargeHeader {
                current_size: self.buf.len(),
                max_size: max,
            });
        }
        Ok(())
    }
}

/// First occurrence of `delim` at or after `from`, scanning a little
/// earlier so a delimiter split across fills is still seen.
fn find(haystack: &[u8], delim: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < delim.len() {
        return None;
    }
    haystack[from..]
        .windows(delim.len())
        .position(|w| w == delim)
        .map(|at| from + at)
}
