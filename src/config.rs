//! Configuration for shimhub
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a hub or endpoint instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Registry name the hub answers to. Commands addressed to this name
    /// (or to nobody) are handled by the hub itself.
    pub hub_name: String,

    /// Path of the TOML endpoint registry
    pub registry_path: PathBuf,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address, used when the registry has no entry for `hub_name`
    pub listen_addr: String,

    /// Max concurrent endpoint connections
    pub max_connections: usize,

    /// Bytes requested per non-blocking read
    pub read_chunk_size: usize,

    // -------------------------------------------------------------------------
    // Reactor Configuration
    // -------------------------------------------------------------------------
    /// Poll timeout for one reactor iteration.
    ///   None        -> block until some socket is ready
    ///   Some(ZERO)  -> return immediately (caller has other work to service)
    pub poll_timeout: Option<Duration>,

    // -------------------------------------------------------------------------
    // Shim Configuration
    // -------------------------------------------------------------------------
    /// Number of shim amplifier channels on the instrument endpoint
    pub channel_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub_name: "server".to_string(),
            registry_path: PathBuf::from("./network_description.toml"),
            listen_addr: "127.0.0.1:5000".to_string(),
            max_connections: 64,
            read_chunk_size: 4096,
            poll_timeout: None,
            channel_count: 24,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the name the hub is addressed by
    pub fn hub_name(mut self, name: impl Into<String>) -> Self {
        self.config.hub_name = name.into();
        self
    }

    /// Set the registry file path
    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.registry_path = path.into();
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the per-read chunk size (in bytes)
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    /// Set the reactor poll timeout
    pub fn poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Set the number of shim channels
    pub fn channel_count(mut self, count: usize) -> Self {
        self.config.channel_count = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
