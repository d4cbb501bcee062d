//! Connection State Machine
//!
//! Per-socket buffers and parse state. A connection never blocks: reads and
//! writes run until the socket reports `WouldBlock`, and parsing only
//! advances when the receive buffer holds enough bytes.
//!
//! ## States
//! ```text
//! AwaitingHeaderLength ──► AwaitingHeaderBody ──► AwaitingPayload ──► Dispatched
//!          ▲                                                            │
//!          │                 (no reply: relay, Continue)                │
//!          ├────────────────────────────────────────────────────────────┤
//!          │                                                            ▼
//!          └──────────────────── drained ◄───────────────────── AwaitingWriteDrain
//! ```

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use mio::{Interest, Token};

use crate::error::{HubError, Result};
use crate::protocol::{
    decode_header, decode_header_length, decode_payload, Decoded, Header, Message,
    HEADER_LENGTH_SIZE,
};

/// Where a connection is in its request/response cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ParseState {
    AwaitingHeaderLength,
    AwaitingHeaderBody { len: usize },
    AwaitingPayload { header: Header },
    /// A complete message has been handed to the router
    Dispatched,
    /// A reply to this connection's own request is queued
    AwaitingWriteDrain,
}

/// Result of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Bytes remain queued; wait for the next writable event
    Pending,
    /// Send buffer fully flushed
    Drained,
    /// Send buffer flushed and the connection was marked for disconnect
    Disconnect,
}

/// Streams that can be shut down in both directions before they are dropped
pub trait Shutdown {
    fn shutdown_both(&self) -> io::Result<()>;
}

impl Shutdown for mio::net::TcpStream {
    fn shutdown_both(&self) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}

/// One endpoint's socket plus its protocol state
pub struct Connection<S> {
    token: Token,
    stream: S,
    peer: SocketAddr,
    name: Option<String>,

    recv_buf: BytesMut,
    send_buf: BytesMut,
    scratch: Vec<u8>,

    state: ParseState,
    pending_disconnect: bool,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap a non-blocking stream
    pub fn new(token: Token, stream: S, peer: SocketAddr, read_chunk_size: usize) -> Self {
        Self {
            token,
            stream,
            peer,
            name: None,
            recv_buf: BytesMut::with_capacity(read_chunk_size),
            send_buf: BytesMut::new(),
            scratch: vec![0u8; read_chunk_size.max(1)],
            state: ParseState::AwaitingHeaderLength,
            pending_disconnect: false,
        }
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Handle a readable event.
    ///
    /// Drains the socket into the receive buffer, then advances the parser.
    /// Returns a message once one is complete. A zero-byte read means the
    /// peer closed and is reported as `PeerClosed`.
    pub fn on_readable(&mut self) -> Result<Option<Message>> {
        self.fill()?;
        self.poll_message()
    }

    fn fill(&mut self) -> Result<usize> {
        let mut total = 0;
        loop {
            match self.stream.read(&mut self.scratch) {
                Ok(0) => return Err(HubError::PeerClosed(self.peer)),
                Ok(n) => {
                    self.recv_buf.extend_from_slice(&self.scratch[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        tracing::trace!("Read {} bytes from {} ({} buffered)", total, self.peer, self.recv_buf.len());
        Ok(total)
    }

    /// Advance the parser over bytes already buffered.
    ///
    /// Does nothing while a message is dispatched or its reply is draining.
    pub fn poll_message(&mut self) -> Result<Option<Message>> {
        loop {
            match std::mem::replace(&mut self.state, ParseState::AwaitingHeaderLength) {
                ParseState::AwaitingHeaderLength => {
                    let len = match decode_header_length(&self.recv_buf) {
                        Some((len, _)) => len as usize,
                        None => return Ok(None),
                    };
                    self.recv_buf.advance(HEADER_LENGTH_SIZE);
                    self.state = ParseState::AwaitingHeaderBody { len };
                }
                ParseState::AwaitingHeaderBody { len } => {
                    match decode_header(&self.recv_buf, len)? {
                        Decoded::Complete(header) => {
                            self.recv_buf.advance(len);
                            tracing::debug!(
                                "Header from {}: {} ({} bytes)",
                                self.peer,
                                header.content_type,
                                header.content_length
                            );
                            self.state = ParseState::AwaitingPayload { header };
                        }
                        Decoded::NeedMore => {
                            self.state = ParseState::AwaitingHeaderBody { len };
                            return Ok(None);
                        }
                    }
                }
                ParseState::AwaitingPayload { header } => {
                    let len = header.content_length;
                    if let Decoded::NeedMore = decode_payload(&self.recv_buf, len) {
                        self.state = ParseState::AwaitingPayload { header };
                        return Ok(None);
                    }
                    let payload = self.recv_buf.split_to(len).freeze();
                    let message = Message::from_parts(header, payload)?;
                    self.state = ParseState::Dispatched;
                    return Ok(Some(message));
                }
                other => {
                    self.state = other;
                    return Ok(None);
                }
            }
        }
    }

    /// Record how the router handled the dispatched message
    pub fn finish_dispatch(&mut self, replying: bool) {
        if self.state == ParseState::Dispatched {
            self.state = if replying {
                ParseState::AwaitingWriteDrain
            } else {
                ParseState::AwaitingHeaderLength
            };
        }
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Append a frame to the outbound queue. Queued frames are never replaced.
    pub fn enqueue(&mut self, frame: &[u8]) {
        self.send_buf.extend_from_slice(frame);
    }

    /// Handle a writable event: send until drained or `WouldBlock`
    pub fn on_writable(&mut self) -> Result<WriteProgress> {
        while !self.send_buf.is_empty() {
            match self.stream.write(&self.send_buf) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => {
                    tracing::trace!("Sent {} bytes to {}", n, self.peer);
                    self.send_buf.advance(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(WriteProgress::Pending),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match self.stream.flush() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(WriteProgress::Pending),
            Err(e) => return Err(e.into()),
        }

        self.clear();
        if self.pending_disconnect {
            return Ok(WriteProgress::Disconnect);
        }
        Ok(WriteProgress::Drained)
    }

    /// Reset after a full drain. Bytes of a following frame already in the
    /// receive buffer are kept.
    fn clear(&mut self) {
        self.send_buf.clear();
        if self.state == ParseState::AwaitingWriteDrain {
            self.state = ParseState::AwaitingHeaderLength;
        }
    }

    /// Close once the send buffer has drained
    pub fn mark_disconnect(&mut self) {
        self.pending_disconnect = true;
    }

    /// Half-duplex readiness: write while output is queued, read otherwise
    pub fn interest(&self) -> Interest {
        if self.send_buf.is_empty() {
            Interest::READABLE
        } else {
            Interest::WRITABLE
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Registry name, if the peer address was recognised
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn state(&self) -> &ParseState {
        &self.state
    }

    pub fn is_pending_disconnect(&self) -> bool {
        self.pending_disconnect
    }

    /// Bytes queued for sending
    pub fn pending_output(&self) -> &[u8] {
        &self.send_buf
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_stream(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + Shutdown> Connection<S> {
    /// Shut the socket down and release it.
    ///
    /// Queued output that has not been written is discarded. A peer that
    /// already went away is not an error.
    pub fn close(self) -> Result<S> {
        if !self.send_buf.is_empty() {
            tracing::debug!(
                "Closing {} with {} unsent bytes",
                self.peer,
                self.send_buf.len()
            );
        }
        match self.stream.shutdown_both() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }
        Ok(self.stream)
    }
}
