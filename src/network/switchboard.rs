//! Switchboard
//!
//! Owns every live connection together with the registry and router, and
//! turns readiness events into protocol progress. The reactor feeds it
//! events and afterwards collects the interest changes and closed
//! connections it has to apply; `arm` is the only place a poller registry
//! is touched.
//!
//! Generic over the stream type so the whole routing path can run over
//! in-memory streams.

use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::net::SocketAddr;

use mio::event::Source;
use mio::{Interest, Token};

use crate::config::Config;
use crate::error::{HubError, Result};
use crate::protocol::{Header, Message};
use crate::registry::{Registry, UNKNOWN_ENDPOINT};
use crate::router::{Dispatcher, Effect, HubStatus, Outcome, Router, SessionInfo};

use super::connection::{Connection, WriteProgress};

/// Token reserved for the listening socket
pub const LISTENER: Token = Token(0);

pub struct Switchboard<S> {
    registry: Registry,
    router: Router,
    dispatcher: Dispatcher,

    connections: HashMap<Token, Connection<S>>,
    next_token: usize,
    max_connections: usize,
    read_chunk_size: usize,

    /// Cleared once `halt` has been requested
    running: bool,
    shimming: bool,

    /// Connections whose interest may have changed since the last sync
    dirty: BTreeSet<Token>,
    /// Connections removed since the last sync, awaiting deregistration
    closed: Vec<Connection<S>>,
}

impl<S: Read + Write> Switchboard<S> {
    pub fn new(config: &Config, registry: Registry) -> Self {
        Self {
            registry,
            router: Router::new(config.hub_name.clone()),
            dispatcher: Dispatcher::new(),
            connections: HashMap::new(),
            next_token: LISTENER.0 + 1,
            max_connections: config.max_connections,
            read_chunk_size: config.read_chunk_size,
            running: true,
            shimming: false,
            dirty: BTreeSet::new(),
            closed: Vec::new(),
        }
    }

    // =========================================================================
    // Accepting
    // =========================================================================

    /// Take ownership of a freshly accepted stream.
    ///
    /// The peer address is classified against the registry; unrecognised
    /// peers, and peers whose name already has a live session, stay
    /// `unknown`.
    pub fn accept(&mut self, stream: S, peer: SocketAddr) -> Result<Token> {
        if !self.is_accepting() {
            return Err(HubError::Refused(format!(
                "not accepting {}: {} connections open, running = {}",
                peer,
                self.connections.len(),
                self.running
            )));
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        let mut conn = Connection::new(token, stream, peer, self.read_chunk_size);

        match self.registry.resolve_by_address(peer).map(str::to_string) {
            Some(name) => match self.registry.register(&name, token) {
                Ok(()) => {
                    tracing::info!("{} connected from {}", name, peer);
                    conn.set_name(name);
                }
                Err(e) => tracing::warn!("{} from {}: {}", name, peer, e),
            },
            None => tracing::info!("Accepted {} connection from {}", UNKNOWN_ENDPOINT, peer),
        }

        self.connections.insert(token, conn);
        self.dirty.insert(token);
        Ok(token)
    }

    pub fn is_accepting(&self) -> bool {
        self.running && self.connections.len() < self.max_connections
    }

    // =========================================================================
    // Event Handling
    // =========================================================================

    /// Dispatch one readiness event, read before write.
    ///
    /// Any error closes only this connection.
    pub fn handle_event(&mut self, token: Token, readable: bool, writable: bool) {
        if readable {
            if let Err(e) = self.read_ready(token) {
                self.fail(token, e);
                return;
            }
        }
        if writable {
            if let Err(e) = self.write_ready(token) {
                self.fail(token, e);
            }
        }
    }

    fn read_ready(&mut self, token: Token) -> Result<()> {
        let message = match self.connections.get_mut(&token) {
            Some(conn) => conn.on_readable()?,
            None => return Ok(()),
        };
        self.pump(token, message)
    }

    fn write_ready(&mut self, token: Token) -> Result<()> {
        let progress = match self.connections.get_mut(&token) {
            Some(conn) => conn.on_writable()?,
            None => return Ok(()),
        };
        self.dirty.insert(token);

        match progress {
            WriteProgress::Pending => Ok(()),
            WriteProgress::Drained => {
                // A following frame may already be buffered.
                let message = match self.connections.get_mut(&token) {
                    Some(conn) => conn.poll_message()?,
                    None => None,
                };
                self.pump(token, message)
            }
            WriteProgress::Disconnect => {
                self.close(token);
                Ok(())
            }
        }
    }

    /// Route `first` and every further complete message already buffered
    fn pump(&mut self, token: Token, first: Option<Message>) -> Result<()> {
        let mut next = first;
        while let Some(message) = next {
            self.dispatch(token, message)?;
            next = match self.connections.get_mut(&token) {
                Some(conn) => conn.poll_message()?,
                None => None,
            };
        }
        self.dirty.insert(token);
        Ok(())
    }

    fn dispatch(&mut self, token: Token, message: Message) -> Result<()> {
        let outcome = match self.router.route(token, message, &self.registry)? {
            Outcome::EscalateCommand { text, request } => {
                self.run_command(token, &text, &request)?
            }
            other => other,
        };
        self.apply(token, outcome)
    }

    fn run_command(&mut self, token: Token, text: &str, request: &Header) -> Result<Outcome> {
        let status = self.status();
        let verdict = match self.dispatcher.execute(text, &status) {
            Ok(verdict) => verdict,
            Err(e) if !e.is_connection_fatal() => {
                tracing::warn!("Command '{}' from {:?} failed: {}", text, token, e);
                let frame = self.router.error_reply(token, request, &e, &self.registry)?;
                return Ok(Outcome::Reply(frame));
            }
            Err(e) => return Err(e),
        };

        let frame = self.router.command_reply(token, request, &verdict.result, &self.registry)?;
        let outcome = match verdict.effect {
            Effect::None => Outcome::Reply(frame),
            Effect::SetShimming(enabled) => {
                tracing::info!("Shimming {}", if enabled { "enabled" } else { "disabled" });
                self.shimming = enabled;
                Outcome::Reply(frame)
            }
            Effect::Disconnect => {
                tracing::info!("Disconnecting {}", self.describe(token));
                Outcome::Disconnect(frame)
            }
            Effect::Halt => {
                self.running = false;
                Outcome::Reply(frame)
            }
        };
        Ok(outcome)
    }

    fn apply(&mut self, token: Token, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Continue | Outcome::EscalateCommand { .. } => {
                if let Some(conn) = self.connections.get_mut(&token) {
                    conn.finish_dispatch(false);
                }
            }
            Outcome::Reply(frame) => {
                if let Some(conn) = self.connections.get_mut(&token) {
                    conn.enqueue(&frame);
                    conn.finish_dispatch(true);
                }
            }
            Outcome::Disconnect(frame) => {
                if let Some(conn) = self.connections.get_mut(&token) {
                    conn.enqueue(&frame);
                    conn.mark_disconnect();
                    conn.finish_dispatch(true);
                }
            }
            Outcome::Relay { to, frame } => {
                match self.connections.get_mut(&to) {
                    Some(dest) => {
                        dest.enqueue(&frame);
                        self.dirty.insert(to);
                    }
                    None => tracing::warn!("Dropping relay for closed connection {:?}", to),
                }
                if let Some(conn) = self.connections.get_mut(&token) {
                    conn.finish_dispatch(false);
                }
            }
        }

        if !self.running {
            self.broadcast_disconnect()?;
        }
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Start the two-phase halt: every connection is sent the disconnect
    /// notice and closes once it has drained.
    pub fn begin_halt(&mut self) -> Result<()> {
        self.running = false;
        self.broadcast_disconnect()
    }

    fn broadcast_disconnect(&mut self) -> Result<()> {
        let tokens: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| !conn.is_pending_disconnect())
            .map(|(token, _)| *token)
            .collect();

        if !tokens.is_empty() {
            tracing::info!("Halting: notifying {} connection(s)", tokens.len());
        }

        for token in tokens {
            let notice = self.router.disconnect_notice(token, &self.registry)?;
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.enqueue(&notice);
                conn.mark_disconnect();
            }
            self.dirty.insert(token);
        }
        Ok(())
    }

    /// Halt requested and every connection has drained and closed
    pub fn is_halted(&self) -> bool {
        !self.running && self.connections.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // =========================================================================
    // Closing
    // =========================================================================

    fn fail(&mut self, token: Token, err: HubError) {
        match err {
            HubError::PeerClosed(_) => tracing::info!("{} closed the connection", self.describe(token)),
            other => tracing::warn!("Closing {} after error: {}", self.describe(token), other),
        }
        self.close(token);
    }

    /// Remove a connection and everything that refers to it
    pub fn close(&mut self, token: Token) {
        if let Some(conn) = self.connections.remove(&token) {
            self.registry.remove(token);
            self.router.forget(token);
            tracing::info!("Peer disconnected: {}", conn.peer());
            self.dirty.remove(&token);
            self.closed.push(conn);
        }
    }

    // =========================================================================
    // Reactor Hand-off
    // =========================================================================

    /// Interest each touched connection now wants
    pub fn take_interest_changes(&mut self) -> Vec<(Token, Interest)> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|token| self.connections.get(&token).map(|c| (token, c.interest())))
            .collect()
    }

    /// Connections closed since the last call
    pub fn take_closed(&mut self) -> Vec<Connection<S>> {
        std::mem::take(&mut self.closed)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn status(&self) -> HubStatus {
        let sessions = self
            .registry
            .sessions()
            .into_iter()
            .filter_map(|(name, token)| {
                self.connections.get(&token).map(|conn| SessionInfo {
                    name: name.to_string(),
                    peer: conn.peer(),
                })
            })
            .collect();

        HubStatus {
            running: self.running,
            shimming: self.shimming,
            sessions,
            connections: self.connections.len(),
        }
    }

    fn describe(&self, token: Token) -> String {
        match self.connections.get(&token) {
            Some(conn) => format!(
                "{} ({})",
                conn.name().unwrap_or(UNKNOWN_ENDPOINT),
                conn.peer()
            ),
            None => format!("{:?}", token),
        }
    }

    pub fn connection(&self, token: Token) -> Option<&Connection<S>> {
        self.connections.get(&token)
    }

    pub fn connection_mut(&mut self, token: Token) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&token)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn is_shimming(&self) -> bool {
        self.shimming
    }
}

impl<S: Read + Write + Source> Switchboard<S> {
    /// Register (`fresh`) or re-arm a connection with the poller.
    ///
    /// A connection the poller refuses is closed and `false` is returned;
    /// other connections are unaffected.
    pub fn arm(
        &mut self,
        registry: &mio::Registry,
        token: Token,
        interest: Interest,
        fresh: bool,
    ) -> bool {
        let result = match self.connections.get_mut(&token) {
            Some(conn) if fresh => registry.register(conn.stream_mut(), token, interest),
            Some(conn) => registry.reregister(conn.stream_mut(), token, interest),
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Poller rejected {}: {}", self.describe(token), e);
                self.close(token);
                false
            }
        }
    }
}
