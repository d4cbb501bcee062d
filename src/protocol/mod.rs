//! Protocol Module
//!
//! Defines the wire protocol spoken between endpoints and the hub.
//!
//! ## Frame Format
//! ```text
//! ┌──────────────┬──────────────────────┬──────────────────────┐
//! │ HdrLen (2)   │ JSON header          │ Payload              │
//! └──────────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! ### Header Keys
//! - `byteorder`      - sender byte order, informational (required)
//! - `content-type`   - `text/json`, `command`, `relay` or a binary type (required)
//! - `content-length` - payload size in bytes (required)
//! - `to` / `from`    - endpoint names, used by `command` and `relay`
//!
//! ### Content Types
//! - `text/json`: JSON request, answered by the hub
//! - `command`:   JSON string command; for the hub unless `to` names a peer
//! - `relay`:     JSON payload forwarded verbatim to `to`
//! - other:       opaque bytes, answered by the hub

mod command;
mod header;
mod message;
mod codec;

pub use command::{is_local, tokenize, LOCAL_MARKER};
pub use header::{native_byteorder, ContentType, Header};
pub use message::{Body, Message};
pub use codec::{
    decode_frame, decode_header, decode_header_length, decode_payload, encode,
    encode_message, read_message, write_message, Decoded, HEADER_LENGTH_SIZE,
    MAX_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
