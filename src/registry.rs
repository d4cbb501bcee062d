//! Endpoint Registry
//!
//! Static name -> address table loaded once at startup, plus the live
//! session map (name -> connection token) built as endpoints connect.
//!
//! ## File Format
//! ```toml
//! [server]
//! address = "127.0.0.1"
//! port = 5000
//!
//! [sinope]
//! address = "127.0.0.1"
//! port = 5002
//! debug = true
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use mio::Token;
use serde::Deserialize;

use crate::error::{HubError, Result};

/// Name given to peers whose address matches no registry entry
pub const UNKNOWN_ENDPOINT: &str = "unknown";

/// A statically configured endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EndpointEntry {
    address: String,
    port: u16,
    #[serde(default)]
    debug: bool,
}

/// Name/address registry with live-session bookkeeping
#[derive(Debug, Default)]
pub struct Registry {
    /// Static entries, ordered by name
    endpoints: BTreeMap<String, Endpoint>,

    /// name -> live connection
    sessions: HashMap<String, Token>,

    /// live connection -> name
    names: HashMap<Token, String>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a registry from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let entries: BTreeMap<String, EndpointEntry> = toml::from_str(text)
            .map_err(|e| HubError::Config(format!("Invalid registry: {}", e)))?;

        let mut registry = Self::new();
        for (name, entry) in entries {
            let ip: IpAddr = entry.address.parse().map_err(|e| {
                HubError::Config(format!(
                    "Endpoint '{}': invalid address '{}': {}",
                    name, entry.address, e
                ))
            })?;
            registry.insert(
                name,
                Endpoint {
                    addr: SocketAddr::new(ip, entry.port),
                    debug: entry.debug,
                },
            );
        }
        Ok(registry)
    }

    /// Load a registry file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            HubError::Config(format!("Cannot read registry {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Add or replace a static entry
    pub fn insert(&mut self, name: impl Into<String>, endpoint: Endpoint) {
        self.endpoints.insert(name.into(), endpoint);
    }

    /// Static entry for a name
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }

    /// All static entries, ordered by name
    pub fn endpoints(&self) -> impl Iterator<Item = (&str, &Endpoint)> {
        self.endpoints.iter().map(|(name, ep)| (name.as_str(), ep))
    }

    /// Configured address of a name
    pub fn resolve(&self, name: &str) -> Option<SocketAddr> {
        self.endpoints.get(name).map(|ep| ep.addr)
    }

    /// Name configured for an exact peer address
    pub fn resolve_by_address(&self, addr: SocketAddr) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|(_, ep)| ep.addr == addr)
            .map(|(name, _)| name.as_str())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Bind a live connection to a name.
    ///
    /// Fails if another connection already holds the name.
    pub fn register(&mut self, name: &str, token: Token) -> Result<()> {
        if let Some(existing) = self.sessions.get(name) {
            if *existing != token {
                return Err(HubError::Addressing(format!(
                    "'{}' already has a live session",
                    name
                )));
            }
            return Ok(());
        }
        self.sessions.insert(name.to_string(), token);
        self.names.insert(token, name.to_string());
        Ok(())
    }

    /// Live connection bound to a name
    pub fn session(&self, name: &str) -> Option<Token> {
        self.sessions.get(name).copied()
    }

    /// Name bound to a live connection
    pub fn name_of(&self, token: Token) -> Option<&str> {
        self.names.get(&token).map(String::as_str)
    }

    /// Drop whatever session a connection holds, returning its name
    pub fn remove(&mut self, token: Token) -> Option<String> {
        let name = self.names.remove(&token)?;
        self.sessions.remove(&name);
        Some(name)
    }

    /// Live sessions, sorted by name
    pub fn sessions(&self) -> Vec<(&str, Token)> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|(name, token)| (name.as_str(), *token))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(b.0));
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
