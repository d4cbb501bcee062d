//! Endpoint Client
//!
//! Blocking TCP client used by console, instrument and compute endpoints.
//! The client binds its registry address before connecting so the hub can
//! tell who it is.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use serde_json::{json, Value};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{HubError, Result};
use crate::protocol::{read_message, write_message, ContentType, Message};
use crate::registry::Registry;
use crate::router::DISCONNECT_NOTICE;

/// What came back for a hub command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exchange {
    /// The hub's answer; `None` if the hub announced shutdown first
    pub reply: Option<Message>,
    /// Relays and error replies that arrived ahead of the answer, in order
    pub unsolicited: Vec<Message>,
}

/// True for the relay the hub sends every endpoint before halting
pub fn is_disconnect_notice(message: &Message) -> bool {
    message.content_type() == &ContentType::Relay && message.text() == Some(DISCONNECT_NOTICE)
}

/// A connected endpoint
pub struct EndpointClient {
    name: String,
    hub: SocketAddr,
    stream: TcpStream,
}

impl EndpointClient {
    /// Connect as `name` to the hub registered as `hub_name`.
    ///
    /// If `name` has a registry entry the connection originates from that
    /// address; otherwise an ephemeral port is used and the hub will see an
    /// unknown peer.
    pub fn connect(name: &str, hub_name: &str, registry: &Registry) -> Result<Self> {
        let hub = registry
            .resolve(hub_name)
            .ok_or_else(|| HubError::Config(format!("No registry entry for hub '{}'", hub_name)))?;
        Self::connect_to(name, registry.resolve(name), hub)
    }

    /// Connect to `hub`, optionally from a fixed local address
    pub fn connect_to(name: &str, local: Option<SocketAddr>, hub: SocketAddr) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(hub), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        if let Some(local) = local {
            socket.bind(&local.into())?;
        }
        socket.connect(&hub.into())?;

        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;

        tracing::info!("{} connected to hub at {}", name, hub);
        Ok(Self {
            name: name.to_string(),
            hub,
            stream,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hub_addr(&self) -> SocketAddr {
        self.hub
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Configure the receive timeout (`None` blocks forever)
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    // =========================================================================
    // Request Builders
    // =========================================================================

    /// Command for the hub or, if `to` names a peer, for that peer
    pub fn command(&self, to: &str, text: &str) -> Result<Message> {
        Ok(Message::json(ContentType::Command, &json!(text))?
            .with_to(to)
            .with_from(self.name.as_str()))
    }

    /// Relay of `text` to `to`
    pub fn relay(&self, to: &str, text: &str) -> Result<Message> {
        Ok(Message::json(ContentType::Relay, &json!(text))?
            .with_to(to)
            .with_from(self.name.as_str()))
    }

    /// Answer the last relay this endpoint received (no explicit target)
    pub fn answer(&self, text: &str) -> Result<Message> {
        Ok(Message::json(ContentType::Relay, &json!(text))?.with_from(self.name.as_str()))
    }

    /// Plain JSON request for the hub
    pub fn text(&self, value: &Value) -> Result<Message> {
        Ok(Message::json(ContentType::Text, value)?.with_from(self.name.as_str()))
    }

    /// Binary request with a custom type string
    pub fn binary(&self, kind: &str, payload: Vec<u8>) -> Message {
        Message::binary(kind, payload).with_from(self.name.as_str())
    }

    // =========================================================================
    // I/O
    // =========================================================================

    pub fn send(&mut self, message: &Message) -> Result<()> {
        tracing::debug!("{} sending {} to {:?}", self.name, message.content_type(), message.to());
        write_message(&mut self.stream, message)
    }

    /// Block until the next message arrives
    pub fn recv(&mut self) -> Result<Message> {
        match read_message(&mut self.stream) {
            Err(HubError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(HubError::PeerClosed(self.hub))
            }
            other => other,
        }
    }

    /// Send and return the next message, whatever it is
    pub fn request(&mut self, message: &Message) -> Result<Message> {
        self.send(message)?;
        self.recv()
    }

    /// Wait up to `wait` for a message to start arriving.
    ///
    /// Only the first byte is waited on; once it is there the whole frame is
    /// read under the previous timeout, so a slow frame is never cut in half.
    pub fn try_recv(&mut self, wait: Duration) -> Result<Option<Message>> {
        let previous = self.stream.read_timeout()?;
        self.stream.set_read_timeout(Some(wait))?;
        let mut first = [0u8; 1];
        let peeked = self.stream.peek(&mut first);
        self.stream.set_read_timeout(previous)?;

        match peeked {
            Ok(0) => Err(HubError::PeerClosed(self.hub)),
            Ok(_) => self.recv().map(Some),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Everything that arrives before the line goes quiet for `wait`.
    /// Stops early after a disconnect notice.
    pub fn drain(&mut self, wait: Duration) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv(wait)? {
            let notice = is_disconnect_notice(&message);
            messages.push(message);
            if notice {
                break;
            }
        }
        Ok(messages)
    }

    /// Send `text` as a command to the hub and read up to its answer.
    ///
    /// Relays from peers and error replies to earlier relays can be queued
    /// ahead of the answer; they are collected rather than mistaken for it.
    pub fn call(&mut self, hub_name: &str, text: &str) -> Result<Exchange> {
        let request = self.command(hub_name, text)?;
        self.send(&request)?;

        let mut exchange = Exchange::default();
        loop {
            let message = self.recv()?;
            if is_disconnect_notice(&message) {
                exchange.unsolicited.push(message);
                return Ok(exchange);
            }
            if message.content_type() == &ContentType::Command && message.from() == Some(hub_name) {
                exchange.reply = Some(message);
                return Ok(exchange);
            }
            exchange.unsolicited.push(message);
        }
    }
}
