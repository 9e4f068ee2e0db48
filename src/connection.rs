use std::io::{Read, Write};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::exchange::Exchange;
use crate::transport::Transport;

/// Where a connection ended up after its last exchange.
#[derive(Debug)]
pub enum Outcome<S> {
    /// The peer went away or one side asked for `Connection: close`.
    Closed,
    /// A `101` exchange finished; the transport, with any over-read bytes
    /// restored, belongs to the new protocol.
    Upgraded(Transport<S>),
}

/// Driver state, observable through [`Connection::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Reading,
    Serving,
    Finishing,
    Upgraded,
    Closed,
}

/// Serves a linear sequence of exchanges over one transport.
///
/// After an exchange finishes, the transport is positioned at the first
/// byte of the next request (the exchange's put-back discipline guarantees
/// this), so the driver simply accepts again until either side closes or
/// an upgrade takes the transport away.
#[derive(Debug)]
pub struct Connection<S> {
    transport: Option<Transport<S>>,
    state: State,
}

/// Per-request application callback for [`Connection::serve_async`].
///
/// The handler reads the request body and writes the response through the
/// exchange; the driver finishes the exchange afterwards if the handler
/// did not.
#[async_trait]
pub trait Handler<S>: Send + Sync
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn handle(&self, exchange: &mut Exchange<S>) -> Result<()>;
}

impl<S> Connection<S> {
    pub fn new(transport: Transport<S>) -> Connection<S> {
        Connection {
            transport: Some(transport),
            state: State::Idle,
        }
    }

    pub fn from_stream(stream: S) -> Connection<S> {
        Connection::new(Transport::new(stream))
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Take a finished exchange back. Returns `None` when the connection
    /// is ready for the next exchange, or the terminal [`Outcome`].
    pub fn recycle(&mut self, exchange: Exchange<S>) -> Result<Option<Outcome<S>>> {
        if !exchange.is_finished() {
            return Err(Error::response_state("recycle before finish"));
        }
        if exchange.is_upgrade() {
            debug!("connection upgraded");
            self.state = State::Upgraded;
            return Ok(Some(Outcome::Upgraded(exchange.into_transport())));
        }
        if !exchange.keep_alive() {
            trace!("connection: close requested");
            self.state = State::Closed;
            return Ok(Some(Outcome::Closed));
        }
        self.transport = Some(exchange.into_transport());
        self.state = State::Idle;
        Ok(None)
    }

    fn take_transport(&mut self) -> Option<Transport<S>> {
        let transport = self.transport.take()?;
        self.state = State::Reading;
        Some(transport)
    }

    fn settle_accept(&mut self, result: Result<Exchange<S>>) -> Result<Option<Exchange<S>>> {
        match result {
            Ok(exchange) => {
                self.state = State::Serving;
                Ok(Some(exchange))
            }
            Err(Error::Closed) => {
                trace!("peer closed between exchanges");
                self.state = State::Closed;
                Ok(None)
            }
            Err(e) => {
                self.state = State::Closed;
                Err(e)
            }
        }
    }
}

impl<S: Read + Write> Connection<S> {
    /// Accept the next exchange, or `None` once the connection is done.
    pub fn next(&mut self) -> Result<Option<Exchange<S>>> {
        let Some(transport) = self.take_transport() else {
            return Ok(None);
        };
        let result = Exchange::accept(transport);
        self.settle_accept(result)
    }

    /// Run the connection to completion, calling `handler` once per
    /// exchange. The driver finishes any exchange the handler left open.
    pub fn serve<F>(mut self, mut handler: F) -> Result<Outcome<S>>
    where
        F: FnMut(&mut Exchange<S>) -> Result<()>,
    {
        loop {
            let Some(mut exchange) = self.next()? else {
                return Ok(Outcome::Closed);
            };
            handler(&mut exchange)?;
            self.state = State::Finishing;
            if !exchange.is_finished() {
                exchange.finish()?;
            }
            if let Some(outcome) = self.recycle(exchange)? {
                return Ok(outcome);
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connection<S> {
    /// Async counterpart of [`next`](Connection::next).
    pub async fn next_async(&mut self) -> Result<Option<Exchange<S>>> {
        let Some(transport) = self.take_transport() else {
            return Ok(None);
        };
        let result = Exchange::accept_async(transport).await;
        self.settle_accept(result)
    }

    /// Async counterpart of [`serve`](Connection::serve).
    pub async fn serve_async<H>(mut self, handler: &H) -> Result<Outcome<S>>
    where
        H: Handler<S>,
    {
        loop {
            let Some(mut exchange) = self.next_async().await? else {
                return Ok(Outcome::Closed);
            };
            handler.handle(&mut exchange).await?;
            self.state = State::Finishing;
            if !exchange.is_finished() {
                exchange.finish_async().await?;
            }
            if let Some(outcome) = self.recycle(exchange)? {
                return Ok(outcome);
            }
        }
    }
}
