//! Network Module
//!
//! Connection state machines and the reactor that drives them.
//!
//! ## Architecture
//! - One thread, one `mio::Poll`
//! - `Reactor` owns the listener and the poller
//! - `Switchboard` owns every `Connection` and applies routing outcomes
//! - Connections are half-duplex: armed for read or for write, never both

mod connection;
mod reactor;
mod switchboard;

pub use connection::{Connection, ParseState, Shutdown, WriteProgress};
pub use reactor::Reactor;
pub use switchboard::{Switchboard, LISTENER};
