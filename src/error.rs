//! Error types for shimhub
//!
//! Provides a unified error type for the hub, its connections and endpoint clients.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias using HubError
pub type Result<T> = std::result::Result<T, HubError>;

/// Unified error type for shimhub operations
#[derive(Debug, Error)]
pub enum HubError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Connection-fatal Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Peer {0} closed the connection")]
    PeerClosed(SocketAddr),

    // -------------------------------------------------------------------------
    // Errors reported back to the sender
    // -------------------------------------------------------------------------
    #[error("Addressing error: {0}")]
    Addressing(String),

    #[error("Command error: {0}")]
    Command(String),

    /// A frame the hub would have to send exceeds the wire limits
    #[error("Frame too large: {0}")]
    FrameTooLarge(String),

    // -------------------------------------------------------------------------
    // Accept Errors
    // -------------------------------------------------------------------------
    #[error("Connection refused: {0}")]
    Refused(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Device Errors
    // -------------------------------------------------------------------------
    #[error("Shim device error: {0}")]
    Device(String),
}

impl HubError {
    /// Whether this error must tear down the connection it occurred on.
    ///
    /// Addressing and command errors are answered on the wire instead and
    /// leave the connection usable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            HubError::Io(_)
                | HubError::Protocol(_)
                | HubError::PeerClosed(_)
                | HubError::Refused(_)
        )
    }
}
