#![allow(dead_code)]

//! Shared helpers for the integration suites: an in-memory blocking
//! stream and small wire-level parsers to check emitted bytes.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

/// Install the tracing subscriber once so `RUST_LOG` works in tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Blocking in-memory stream: reads a scripted request byte stream,
/// collects everything written into a shared buffer the test keeps.
#[derive(Debug)]
pub struct Pipe {
    input: Cursor<Vec<u8>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl Pipe {
    pub fn new(input: &[u8]) -> (Pipe, Arc<Mutex<Vec<u8>>>) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let pipe = Pipe {
            input: Cursor::new(input.to_vec()),
            output: Arc::clone(&output),
        };
        (pipe, output)
    }
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Split one response into (status line, lowercase header map, body bytes).
pub fn split_head(raw: &[u8]) -> (String, HashMap<String, String>, Vec<u8>) {
    let at = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("missing head terminator");
    let head = std::str::from_utf8(&raw[..at]).expect("head is not utf-8");

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap().to_owned();
    let mut headers = HashMap::new();
    for line in lines {
        let (name, value) = line.split_once(':').expect("header line without colon");
        headers.insert(name.trim().to_lowercase(), value.trim().to_owned());
    }

    (status_line, headers, raw[at + 4..].to_vec())
}

/// Decode a chunked body back into (payload, lowercase trailer map),
/// asserting the wire grammar along the way.
pub fn decode_chunked(mut body: &[u8]) -> (Vec<u8>, HashMap<String, String>) {
    fn take_line<'a>(body: &mut &'a [u8]) -> &'a [u8] {
        let at = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .expect("missing CRLF");
        let line = &body[..at];
        *body = &body[at + 2..];
        line
    }

    let mut payload = Vec::new();
    loop {
        let line = take_line(&mut body);
        let digits = std::str::from_utf8(line).unwrap();
        let digits = digits.split(';').next().unwrap().trim();
        let size = usize::from_str_radix(digits, 16).expect("bad chunk size");
        if size == 0 {
            break;
        }
        payload.extend_from_slice(&body[..size]);
        assert_eq!(&body[size..size + 2], b"\r\n", "missing chunk delimiter");
        body = &body[size + 2..];
    }

    let mut trailers = HashMap::new();
    loop {
        let line = take_line(&mut body);
        if line.is_empty() {
            break;
        }
        let text = std::str::from_utf8(line).unwrap();
        let (name, value) = text.split_once(':').expect("trailer without colon");
        trailers.insert(name.trim().to_lowercase(), value.trim().to_owned());
    }

    assert!(
        body.is_empty(),
        "bytes after chunked terminator: {:?}",
        body
    );
    (payload, trailers)
}
