//! Endpoint Module
//!
//! The client side of the hub: connecting as a named endpoint, building
//! requests, and executing the `!` commands other endpoints relay to us.

mod client;
mod local;
mod shim;

pub use client::{is_disconnect_notice, EndpointClient, Exchange};
pub use local::LocalCommand;
pub use shim::{
    clamp_to_safe_limit, FileShimDriver, RecordingShimDriver, ShimController, ShimDriver,
    ShimEvent, MAX_CURRENT_AMPS,
};
