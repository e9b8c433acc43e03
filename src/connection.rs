//! Per-connection event handling.
//!
//! Every accepted socket is driven by its own task. Each read outcome is
//! turned into a single [`ConnEvent`] and applied to the [`Connection`]
//! state object, which logs it and writes the acknowledgement.

use crate::protocol::{acknowledge, display_text};
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

/// Lifecycle of a connection.
///
/// `Connecting -> Open -> Closed`, or `Open -> Errored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted but not yet announced.
    Connecting,
    /// Reading and acknowledging messages.
    Open,
    /// Peer closed its side.
    Closed,
    /// Read or write failed.
    Errored,
}

impl ConnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnState::Closed | ConnState::Errored)
    }
}

/// Something that happened on a connection's socket.
#[derive(Debug)]
pub enum ConnEvent {
    /// One read worth of bytes arrived.
    DataReceived(Bytes),
    /// Peer closed the stream (read returned EOF).
    Closed,
    /// Socket error.
    Errored(io::Error),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    state: ConnState,
    buffer: BytesMut,
    buffer_size: usize,
    acks_sent: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream. Reads are at most `buffer_size` bytes.
    pub fn new(stream: S, peer: SocketAddr, buffer_size: usize) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Connecting,
            buffer: BytesMut::with_capacity(buffer_size),
            buffer_size,
            acks_sent: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Number of acknowledgements fully written so far.
    pub fn acks_sent(&self) -> u64 {
        self.acks_sent
    }

    /// Announce the connection and start accepting events.
    pub fn open(&mut self) {
        if self.state != ConnState::Connecting {
            return;
        }
        info!(
            address = %self.peer.ip(),
            port = self.peer.port(),
            "Client connected"
        );
        self.state = ConnState::Open;
    }

    /// Drive the connection until it reaches a terminal state.
    pub async fn run(&mut self) -> ConnState {
        self.open();

        while !self.state.is_terminal() {
            let event = self.next_event().await;
            self.handle(event).await;
        }

        self.state
    }

    /// Wait for the next read outcome on the socket.
    pub async fn next_event(&mut self) -> ConnEvent {
        self.buffer.clear();
        self.buffer.resize(self.buffer_size, 0);

        match self.stream.read(&mut self.buffer[..]).await {
            Ok(0) => ConnEvent::Closed,
            Ok(n) => {
                self.buffer.truncate(n);
                ConnEvent::DataReceived(self.buffer.split().freeze())
            }
            Err(e) => ConnEvent::Errored(e),
        }
    }

    /// Apply one event. Events arriving after a terminal state are dropped.
    pub async fn handle(&mut self, event: ConnEvent) {
        if self.state.is_terminal() {
            debug!(peer = %self.peer, ?event, state = ?self.state, "Ignoring event");
            return;
        }

        match event {
            ConnEvent::DataReceived(payload) => {
                info!(
                    address = %self.peer.ip(),
                    port = self.peer.port(),
                    bytes = payload.len(),
                    text = %display_text(&payload),
                    "Message received"
                );

                match self.stream.write_all(acknowledge(&payload)).await {
                    Ok(()) => self.acks_sent += 1,
                    Err(e) => self.fail(e),
                }
            }
            ConnEvent::Closed => {
                info!(
                    address = %self.peer.ip(),
                    port = self.peer.port(),
                    "Client disconnected"
                );
                self.state = ConnState::Closed;
            }
            ConnEvent::Errored(e) => self.fail(e),
        }
    }

    fn fail(&mut self, e: io::Error) {
        error!(
            address = %self.peer.ip(),
            port = self.peer.port(),
            error = %e,
            "Client error"
        );
        self.state = ConnState::Errored;
    }
}
