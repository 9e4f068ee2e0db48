use std::io::{self, IoSlice, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

use crate::error::{Error, Result};

/// A full-duplex byte stream with a put-back buffer for over-read bytes.
///
/// The engine inevitably reads past logical boundaries (header terminators,
/// chunk trailers); bytes that belong to the next request or to a
/// post-upgrade protocol are handed back with [`put_back`] and served again
/// before the underlying stream is touched.
///
/// Works in two modes over the same state: blocking when `S: Read + Write`
/// (plain `std::net::TcpStream` or a blocking TLS stream), poll-based and
/// `async` when `S: AsyncRead + AsyncWrite + Unpin` (`tokio` sockets or a
/// TLS wrapper over them).
///
/// [`put_back`]: Transport::put_back
#[derive(Debug)]
pub struct Transport<S> {
    stream: S,
    put_back: BytesMut,
}

impl<S> Transport<S> {
    pub fn new(stream: S) -> Transport<S> {
        Transport {
            stream,
            put_back: BytesMut::new(),
        }
    }

    /// Prepend bytes to the next read. Must not be called while a read is
    /// outstanding.
    pub fn put_back(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        trace!(count = bytes.len(), "put back over-read bytes");
        if self.put_back.is_empty() {
            self.put_back.extend_from_slice(bytes);
        } else {
            let mut joined = BytesMut::with_capacity(bytes.len() + self.put_back.len());
            joined.extend_from_slice(bytes);
            joined.extend_from_slice(&self.put_back);
            self.put_back = joined;
        }
    }

    /// Bytes waiting in the put-back buffer.
    pub fn pending(&self) -> usize {
        self.put_back.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Release the underlying stream together with any bytes still in the
    /// put-back buffer.
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.put_back)
    }

    fn read_put_back(&mut self, buf: &mut [u8]) -> usize {
        let n = self.put_back.len().min(buf.len());
        buf[..n].copy_from_slice(&self.put_back[..n]);
        self.put_back.advance(n);
        n
    }
}

// * Blocking operations *************************************************

impl<S: Read + Write> Transport<S> {
    /// Read into `buf`, serving the put-back buffer first. End-of-stream is
    /// reported as [`Error::Closed`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.put_back.is_empty() {
            return Ok(self.read_put_back(buf));
        }
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.stream.write(buf) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Write several buffers as one logical unit, using a vectored write
    /// for the head of the sequence where the stream supports it.
    pub fn write_all_vectored(&mut self, parts: &[&[u8]]) -> Result<()> {
        let mut cursor = PartCursor::new(parts);
        while !cursor.is_done() {
            let mut slices = [IoSlice::new(&[]); MAX_GATHER];
            let count = cursor.fill(parts, &mut slices);
            let written = loop {
                match self.stream.write_vectored(&slices[..count]) {
                    Ok(0) => return Err(Error::Closed),
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            };
            cursor.advance(parts, written);
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    /// Flush buffered data; dropping the transport closes the stream.
    pub fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

// * Poll-based async operations *****************************************

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    pub fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if !self.put_back.is_empty() {
            return Poll::Ready(Ok(self.read_put_back(buf)));
        }
        let mut read_buf = ReadBuf::new(buf);
        match Pin::new(&mut self.stream).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
            Poll::Ready(Ok(())) => match read_buf.filled().len() {
                0 => Poll::Ready(Err(Error::Closed)),
                n => Poll::Ready(Ok(n)),
            },
        }
    }

    pub fn poll_write(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
        match std::task::ready!(Pin::new(&mut self.stream).poll_write(cx, buf)) {
            Ok(0) if !buf.is_empty() => Poll::Ready(Err(Error::Closed)),
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    pub fn poll_write_vectored(
        &mut self,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<Result<usize>> {
        match std::task::ready!(Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)) {
            Ok(0) if bufs.iter().any(|b| !b.is_empty()) => Poll::Ready(Err(Error::Closed)),
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    pub fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.stream)
            .poll_flush(cx)
            .map(|r| r.map_err(Error::from))
    }

    pub async fn read_async(&mut self, buf: &mut [u8]) -> Result<usize> {
        std::future::poll_fn(|cx| self.poll_read(cx, buf)).await
    }

    pub async fn write_async(&mut self, buf: &[u8]) -> Result<usize> {
        std::future::poll_fn(|cx| self.poll_write(cx, buf)).await
    }

    pub async fn write_all_async(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = std::future::poll_fn(|cx| self.poll_write(cx, buf)).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Async counterpart of [`write_all_vectored`]: a chunk envelope
    /// (prefix, payload, suffix) usually leaves in a single gather write.
    ///
    /// [`write_all_vectored`]: Transport::write_all_vectored
    pub async fn write_all_vectored_async(&mut self, parts: &[&[u8]]) -> Result<()> {
        let mut cursor = PartCursor::new(parts);
        while !cursor.is_done() {
            let written = std::future::poll_fn(|cx| {
                let mut slices = [IoSlice::new(&[]); MAX_GATHER];
                let count = cursor.fill(parts, &mut slices);
                self.poll_write_vectored(cx, &slices[..count])
            })
            .await?;
            cursor.advance(parts, written);
        }
        Ok(())
    }

    pub async fn flush_async(&mut self) -> Result<()> {
        std::future::poll_fn(|cx| self.poll_flush(cx)).await
    }

    /// Flush and shut down the write half of the stream.
    pub async fn close_async(&mut self) -> Result<()> {
        std::future::poll_fn(|cx| {
            Pin::new(&mut self.stream)
                .poll_shutdown(cx)
                .map(|r| r.map_err(Error::from))
        })
        .await
    }
}

const MAX_GATHER: usize = 4;

/// Tracks progress through a sequence of buffers across partial writes.
struct PartCursor {
    part: usize,
    offset: usize,
    total_parts: usize,
}

impl PartCursor {
    fn new(parts: &[&[u8]]) -> PartCursor {
        assert!(parts.len() <= MAX_GATHER);
        let mut cursor = PartCursor {
            part: 0,
            offset: 0,
            total_parts: parts.len(),
        };
        cursor.skip_empty(parts);
        cursor
    }

    fn is_done(&self) -> bool {
        self.part >= self.total_parts
    }

    fn fill<'a>(&self, parts: &[&'a [u8]], slices: &mut [IoSlice<'a>; MAX_GATHER]) -> usize {
        let mut count = 0;
        for (i, part) in parts.iter().enumerate().skip(self.part) {
            let rest = if i == self.part { &part[self.offset..] } else { part };
            if !rest.is_empty() {
                slices[count] = IoSlice::new(rest);
                count += 1;
            }
        }
        count
    }

    fn advance(&mut self, parts: &[&[u8]], mut written: usize) {
        while written > 0 && self.part < self.total_parts {
            let remaining = parts[self.part].len() - self.offset;
            if written < remaining {
                self.offset += written;
                return;
            }
            written -= remaining;
            self.part += 1;
            self.offset = 0;
        }
        self.skip_empty(parts);
    }

    fn skip_empty(&mut self, parts: &[&[u8]]) {
        while self.part < self.total_parts && self.offset == parts[self.part].len() {
            self.part += 1;
            self.offset = 0;
        }
    }
}
