//! An embeddable HTTP/1.1 server protocol engine.
//!
//! One request/response pair is an [`Exchange`] bound to a [`Transport`].
//! The exchange presents the request body as a plain read stream and
//! accepts the response body as a plain write stream, hiding
//! Content-Length and chunked framing on both sides. [`Connection`] reuses
//! the transport for the next exchange (keep-alive) or hands it to a
//! post-upgrade protocol such as WebSocket.
//!
//! The accept loop, routing, TLS implementation, and error-to-response
//! adaption are the embedder's business: any byte stream works as a
//! transport, blocking (`std::io`) or async (`tokio::io`).
//!
//! ```no_run
//! use std::net::TcpListener;
//! use micro_h1::{Connection, Transport};
//!
//! # fn main() -> micro_h1::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:8080")?;
//! for stream in listener.incoming() {
//!     let connection = Connection::new(Transport::new(stream?));
//!     let _outcome = connection.serve(|exchange| {
//!         let mut body = Vec::new();
//!         let mut chunk = [0u8; 4096];
//!         loop {
//!             match exchange.read(&mut chunk)? {
//!                 0 => break,
//!                 n => body.extend_from_slice(&chunk[..n]),
//!             }
//!         }
//!         exchange.write(format!("got {} bytes", body.len()).as_bytes())?;
//!         Ok(())
//!     })?;
//! }
//! # Ok(())
//! # }
//! ```

mod buffer;
mod codec;
mod connection;
mod error;
mod exchange;
pub mod protocol;
mod transport;

pub use connection::{Connection, Handler, Outcome, State};
pub use error::{Error, Result};
pub use exchange::Exchange;
pub use transport::Transport;
