//! # shimhub
//!
//! A message relay hub for shimming setups: console, instrument controller
//! and compute endpoints connect over TCP and exchange length-framed JSON
//! messages through one central hub.
//! - Single-threaded, readiness-driven reactor (mio)
//! - Length-prefixed JSON-header wire protocol
//! - Relay of payloads between named endpoints, with a return path
//! - Hub commands: list, status, start, stop, disconnect, halt
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Reactor                              │
//! │              (mio Poll, listener, one thread)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ readiness events
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Switchboard                            │
//! │        Connection state machines + Registry sessions         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ decoded messages
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │   Router    │─────────►│  Dispatcher  │
//!   │   (relay)   │          │ (hub cmds)   │
//!   └─────────────┘          └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod registry;
pub mod protocol;
pub mod network;
pub mod router;
pub mod endpoint;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{HubError, Result};
pub use config::Config;
pub use registry::Registry;
pub use network::Reactor;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shimhub
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
