//! Router Module
//!
//! Decides what happens to each decoded message.
//!
//! ## Routing Rules
//! - `command` for the hub (no `to`, or `to` = hub name) -> escalated to the
//!   command dispatcher, answered on the same connection
//! - `command` with `to` naming a peer, and every `relay` -> payload
//!   forwarded verbatim to that peer's outbound queue; the sender gets no
//!   reply for this hop
//! - `relay` without `to` -> return leg: forwarded to the oldest endpoint
//!   still waiting on an answer from the sender
//! - `text/json`, binary -> answered by the hub
//!
//! Unknown targets and bad commands are answered with an error reply; the
//! sender's connection stays usable.

pub mod dispatcher;

use std::collections::{HashMap, VecDeque};

use mio::Token;
use serde_json::{json, Value};

use crate::error::{HubError, Result};
use crate::protocol::{encode, ContentType, Header, Message};
use crate::registry::{Registry, UNKNOWN_ENDPOINT};

pub use dispatcher::{Dispatcher, Effect, HubCommand, HubStatus, SessionInfo, Verdict};

/// Content type of the hub's answer to binary requests
pub const SERVER_BINARY_TYPE: &str = "binary/custom-server-binary-type";

/// Result text of the notice sent to every endpoint when the hub halts
pub const DISCONNECT_NOTICE: &str = "!server_disconnect";

/// What to do with a routed message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing to send
    Continue,
    /// Frame for the connection that sent the message
    Reply(Vec<u8>),
    /// Frame for another connection's outbound queue
    Relay { to: Token, frame: Vec<u8> },
    /// Hub command to be executed against hub state
    EscalateCommand { text: String, request: Header },
    /// Final frame for the sender, after which its connection closes
    Disconnect(Vec<u8>),
}

/// Message router with return-leg bookkeeping
#[derive(Debug)]
pub struct Router {
    hub_name: String,

    /// relay destination -> originators awaiting its answer, oldest first
    return_paths: HashMap<Token, VecDeque<Token>>,
}

impl Router {
    pub fn new(hub_name: impl Into<String>) -> Self {
        Self {
            hub_name: hub_name.into(),
            return_paths: HashMap::new(),
        }
    }

    pub fn hub_name(&self) -> &str {
        &self.hub_name
    }

    /// Route one message from `source`.
    ///
    /// Only connection-fatal errors are returned; addressing and command
    /// errors become `Outcome::Reply` with an error body.
    pub fn route(&mut self, source: Token, message: Message, registry: &Registry) -> Result<Outcome> {
        let routed = match message.content_type() {
            ContentType::Command => match message.to() {
                Some(to) if to != self.hub_name => self.relay(source, &message, registry),
                _ => Self::escalate(&message),
            },
            ContentType::Relay => self.relay(source, &message, registry),
            ContentType::Text => self.echo(source, &message, registry),
            ContentType::Binary(_) => self.binary_reply(source, &message, registry),
        };

        match routed {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_connection_fatal() => Err(e),
            Err(e) => {
                tracing::warn!("Rejected {} from {:?}: {}", message.content_type(), source, e);
                Ok(Outcome::Reply(self.error_reply(source, &message.header, &e, registry)?))
            }
        }
    }

    fn escalate(message: &Message) -> Result<Outcome> {
        let text = message.text().ok_or_else(|| {
            HubError::Command("command payload must be a string".to_string())
        })?;
        Ok(Outcome::EscalateCommand {
            text: text.to_string(),
            request: message.header.clone(),
        })
    }

    fn relay(&mut self, source: Token, message: &Message, registry: &Registry) -> Result<Outcome> {
        let source_name = registry.name_of(source).unwrap_or(UNKNOWN_ENDPOINT).to_string();

        let (dest, dest_name) = match message.to() {
            Some(to) => {
                let dest = registry
                    .session(to)
                    .ok_or_else(|| HubError::Addressing(format!("no session named '{}'", to)))?;
                (dest, to.to_string())
            }
            None => {
                let origin = self.peek_return_path(source).ok_or_else(|| {
                    HubError::Addressing(format!(
                        "'{}' sent a relay with no target and has nothing to answer",
                        source_name
                    ))
                })?;
                let name = registry.name_of(origin).unwrap_or(UNKNOWN_ENDPOINT).to_string();
                (origin, name)
            }
        };

        let mut header = message.header.clone();
        header.to = Some(dest_name.clone());
        if header.from.is_none() {
            header.from = Some(source_name.clone());
        }
        // Addressing grows the header; a frame that no longer fits is
        // refused before any return path is touched.
        let frame = encode(&header, message.payload())?;

        if message.to().is_some() {
            if !self.take_return_path(source, dest) {
                self.push_return_path(dest, source);
            }
        } else {
            self.pop_return_path(source);
        }

        tracing::info!(
            "Relaying {} ({} bytes) from {} to {}",
            header.content_type,
            header.content_length,
            source_name,
            dest_name
        );
        Ok(Outcome::Relay { to: dest, frame })
    }

    fn echo(&self, source: Token, message: &Message, registry: &Registry) -> Result<Outcome> {
        let body = message.json_body().cloned().unwrap_or(Value::Null);
        tracing::info!("Received request {} from {:?}", body, source);
        let frame = self.reply(source, &message.header, ContentType::Text, &json!({ "result": body }), registry)?;
        Ok(Outcome::Reply(frame))
    }

    fn binary_reply(&self, source: Token, message: &Message, registry: &Registry) -> Result<Outcome> {
        let payload = message.payload();
        let preview = &payload[..payload.len().min(10)];
        let content = format!("First 10 bytes of request: {:?}", preview);

        let mut header = Header::new(ContentType::Binary(SERVER_BINARY_TYPE.to_string()), content.len())
            .with_from(self.hub_name.as_str());
        header.to = self.reply_target(source, &message.header, registry);

        Ok(Outcome::Reply(encode(&header, content.as_bytes())?))
    }

    // =========================================================================
    // Reply Frames
    // =========================================================================

    /// JSON reply from the hub to `source`
    pub fn reply(
        &self,
        source: Token,
        request: &Header,
        content_type: ContentType,
        content: &Value,
        registry: &Registry,
    ) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(content)?;
        let mut header = Header::new(content_type, payload.len()).with_from(self.hub_name.as_str());
        header.to = self.reply_target(source, request, registry);
        encode(&header, &payload)
    }

    /// `{"result": ...}` answer to a hub command
    pub fn command_reply(&self, source: Token, request: &Header, result: &str, registry: &Registry) -> Result<Vec<u8>> {
        self.reply(source, request, ContentType::Command, &json!({ "result": result }), registry)
    }

    /// Error answer; the request's JSON content type is kept so the sender
    /// reads it like any other reply
    pub fn error_reply(&self, source: Token, request: &Header, err: &HubError, registry: &Registry) -> Result<Vec<u8>> {
        let kind = match err {
            HubError::Addressing(_) => "addressing",
            HubError::Command(_) => "command",
            HubError::FrameTooLarge(_) => "oversized",
            _ => "error",
        };
        let content_type = if request.content_type.is_json() {
            request.content_type.clone()
        } else {
            ContentType::Text
        };
        let content = json!({ "result": format!("Error: {}", err), "error": kind });
        self.reply(source, request, content_type, &content, registry)
    }

    /// Relay frame telling an endpoint the hub is going away
    pub fn disconnect_notice(&self, token: Token, registry: &Registry) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(&json!({ "result": DISCONNECT_NOTICE }))?;
        let mut header = Header::new(ContentType::Relay, payload.len()).with_from(self.hub_name.as_str());
        header.to = registry.name_of(token).map(str::to_string);
        encode(&header, &payload)
    }

    fn reply_target(&self, source: Token, request: &Header, registry: &Registry) -> Option<String> {
        request
            .from
            .clone()
            .or_else(|| registry.name_of(source).map(str::to_string))
    }

    // =========================================================================
    // Return Paths
    // =========================================================================

    /// Queue `origin` as waiting on `dest`, at most once per pair
    fn push_return_path(&mut self, dest: Token, origin: Token) {
        let queue = self.return_paths.entry(dest).or_default();
        if !queue.contains(&origin) {
            queue.push_back(origin);
        }
    }

    fn peek_return_path(&self, dest: Token) -> Option<Token> {
        self.return_paths.get(&dest)?.front().copied()
    }

    fn pop_return_path(&mut self, dest: Token) -> Option<Token> {
        let queue = self.return_paths.get_mut(&dest)?;
        let origin = queue.pop_front();
        if queue.is_empty() {
            self.return_paths.remove(&dest);
        }
        origin
    }

    /// Consume `dest -> origin` if `origin` was waiting on `dest`
    fn take_return_path(&mut self, dest: Token, origin: Token) -> bool {
        let Some(queue) = self.return_paths.get_mut(&dest) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|t| *t == origin) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            self.return_paths.remove(&dest);
        }
        true
    }

    /// Originators still waiting on an answer from `dest`
    pub fn pending_returns(&self, dest: Token) -> usize {
        self.return_paths.get(&dest).map_or(0, VecDeque::len)
    }

    /// Drop all bookkeeping involving a closed connection
    pub fn forget(&mut self, token: Token) {
        self.return_paths.remove(&token);
        self.return_paths.retain(|_, origins| {
            origins.retain(|t| *t != token);
            !origins.is_empty()
        });
    }
}
