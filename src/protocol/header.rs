//! Frame header definitions
//!
//! The JSON header that sits between the length prefix and the payload.

use serde::{Deserialize, Serialize};

/// What the payload of a frame contains
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    /// `text/json`: a JSON request answered by the hub
    Text,
    /// `command`: a command for the hub or, with `to`, for another endpoint
    Command,
    /// `relay`: payload forwarded verbatim to the endpoint named by `to`
    Relay,
    /// Any other type string; the payload is opaque bytes
    Binary(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Text => "text/json",
            ContentType::Command => "command",
            ContentType::Relay => "relay",
            ContentType::Binary(kind) => kind,
        }
    }

    /// Whether the payload is UTF-8 JSON
    pub fn is_json(&self) -> bool {
        !matches!(self, ContentType::Binary(_))
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text/json" => ContentType::Text,
            "command" => ContentType::Command,
            "relay" => ContentType::Relay,
            _ => ContentType::Binary(value),
        }
    }
}

impl From<&str> for ContentType {
    fn from(value: &str) -> Self {
        ContentType::from(value.to_string())
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        match value {
            ContentType::Binary(kind) => kind,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded JSON header.
///
/// `byteorder`, `content-type` and `content-length` are required; a header
/// missing any of them fails to deserialize. Unknown keys (e.g. the
/// `content-encoding` older clients send) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Byte order of the sender. Informational only.
    pub byteorder: String,

    #[serde(rename = "content-type")]
    pub content_type: ContentType,

    #[serde(rename = "content-length")]
    pub content_length: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl Header {
    /// Header for a payload of `content_length` bytes, stamped with this
    /// machine's byte order
    pub fn new(content_type: ContentType, content_length: usize) -> Self {
        Self {
            byteorder: native_byteorder().to_string(),
            content_type,
            content_length,
            to: None,
            from: None,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

/// `"little"` or `"big"`
pub fn native_byteorder() -> &'static str {
    if cfg!(target_endian = "little") {
        "little"
    } else {
        "big"
    }
}
