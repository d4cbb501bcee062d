//! Reactor
//!
//! Single-threaded readiness loop. Each iteration asks the OS which sockets
//! are ready, accepts new peers on the listener, hands every other event to
//! the switchboard (read before write), then applies the interest changes
//! and closures the switchboard reports.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll};

use crate::config::Config;
use crate::error::{HubError, Result};
use crate::registry::Registry;

use super::switchboard::{Switchboard, LISTENER};

/// Event capacity per poll
const EVENT_CAPACITY: usize = 256;

/// The hub's event loop
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    switchboard: Switchboard<TcpStream>,
    poll_timeout: Option<Duration>,
}

impl Reactor {
    /// Bind the hub's listening address.
    ///
    /// The registry entry for `config.hub_name` wins over
    /// `config.listen_addr`.
    pub fn bind(config: &Config, registry: Registry) -> Result<Self> {
        let addr = match registry.resolve(&config.hub_name) {
            Some(addr) => addr,
            None => config.listen_addr.parse().map_err(|e| {
                HubError::Config(format!("Invalid listen address '{}': {}", config.listen_addr, e))
            })?,
        };
        let listener = std::net::TcpListener::bind(addr)?;
        Self::with_listener(config, registry, listener)
    }

    /// Run on an already bound listener
    pub fn with_listener(
        config: &Config,
        registry: Registry,
        listener: std::net::TcpListener,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        tracing::info!("Listening on {}", local_addr);

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener: Some(listener),
            local_addr,
            switchboard: Switchboard::new(config, registry),
            poll_timeout: config.poll_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn switchboard(&self) -> &Switchboard<TcpStream> {
        &self.switchboard
    }

    /// Run until a halt has been requested and every session has drained
    pub fn run(&mut self) -> Result<()> {
        while !self.switchboard.is_halted() {
            self.poll_once(self.poll_timeout)?;
        }
        tracing::info!("All sessions drained, reactor stopped");
        Ok(())
    }

    /// Request the two-phase halt from outside the protocol (e.g. Ctrl+C)
    pub fn begin_halt(&mut self) -> Result<()> {
        self.switchboard.begin_halt()?;
        self.sync()
    }

    /// One reactor iteration. Returns the number of events handled.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        let ready: Vec<_> = self
            .events
            .iter()
            .map(|event| {
                (
                    event.token(),
                    event.is_readable() || event.is_read_closed() || event.is_error(),
                    event.is_writable(),
                )
            })
            .collect();

        tracing::trace!("{} event(s) ready", ready.len());

        for &(token, readable, writable) in &ready {
            if token == LISTENER {
                self.accept_all()?;
            } else {
                self.switchboard.handle_event(token, readable, writable);
            }
        }

        self.sync()?;
        Ok(ready.len())
    }

    fn accept_all(&mut self) -> Result<()> {
        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return Ok(()),
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    return Ok(());
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("set_nodelay failed for {}: {}", peer, e);
            }

            let token = match self.switchboard.accept(stream, peer) {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!("Refused {}: {}", peer, e);
                    continue;
                }
            };

            self.switchboard
                .arm(self.poll.registry(), token, Interest::READABLE, true);
        }
    }

    /// Apply what the switchboard changed: re-arm interest, deregister and
    /// shut down closed sockets, stop listening once halting
    fn sync(&mut self) -> Result<()> {
        for (token, interest) in self.switchboard.take_interest_changes() {
            self.switchboard
                .arm(self.poll.registry(), token, interest, false);
        }

        for mut conn in self.switchboard.take_closed() {
            let peer = conn.peer();
            if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
                tracing::debug!("Deregister of {} failed: {}", peer, e);
            }
            if let Err(e) = conn.close() {
                tracing::debug!("Shutdown of {} failed: {}", peer, e);
            }
        }

        if !self.switchboard.is_running() {
            if let Some(mut listener) = self.listener.take() {
                tracing::info!("Halt requested, no longer accepting connections");
                self.poll.registry().deregister(&mut listener)?;
            }
        }

        Ok(())
    }
}
