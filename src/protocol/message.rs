//! Message definitions
//!
//! A decoded frame: header plus typed body. The raw payload bytes are kept
//! so a relay can forward them without re-encoding.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{HubError, Result};
use super::{ContentType, Header};

/// Typed payload
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// text/json, command and relay payloads
    Json(Value),
    /// Opaque binary payloads
    Bytes(Bytes),
}

/// A complete decoded message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub body: Body,
    raw: Bytes,
}

impl Message {
    /// Build a message from a decoded header and its payload bytes.
    ///
    /// JSON content types must carry valid UTF-8 JSON.
    pub fn from_parts(header: Header, payload: Bytes) -> Result<Self> {
        if header.content_length != payload.len() {
            return Err(HubError::Protocol(format!(
                "content-length {} does not match payload of {} bytes",
                header.content_length,
                payload.len()
            )));
        }

        let body = if header.content_type.is_json() {
            let value = serde_json::from_slice(&payload).map_err(|e| {
                HubError::Protocol(format!(
                    "Invalid JSON payload for '{}': {}",
                    header.content_type, e
                ))
            })?;
            Body::Json(value)
        } else {
            Body::Bytes(payload.clone())
        };

        Ok(Self {
            header,
            body,
            raw: payload,
        })
    }

    /// A JSON message (text/json, command or relay)
    pub fn json(content_type: ContentType, value: &Value) -> Result<Self> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        let header = Header::new(content_type, payload.len());
        Ok(Self {
            header,
            body: Body::Json(value.clone()),
            raw: payload,
        })
    }

    /// A binary message with a custom type string
    pub fn binary(kind: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let header = Header::new(ContentType::Binary(kind.into()), payload.len());
        Self {
            header,
            body: Body::Bytes(payload.clone()),
            raw: payload,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.header.to = Some(to.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.header.from = Some(from.into());
        self
    }

    pub fn content_type(&self) -> &ContentType {
        &self.header.content_type
    }

    pub fn to(&self) -> Option<&str> {
        self.header.to.as_deref()
    }

    pub fn from(&self) -> Option<&str> {
        self.header.from.as_deref()
    }

    /// Payload exactly as it came off the wire
    pub fn payload(&self) -> &Bytes {
        &self.raw
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            Body::Bytes(_) => None,
        }
    }

    /// Textual content of a JSON body.
    ///
    /// Accepts a bare JSON string, or an object carrying the text under
    /// `value`, `content` or `result` (checked in that order).
    pub fn text(&self) -> Option<&str> {
        match self.json_body()? {
            Value::String(text) => Some(text),
            Value::Object(map) => ["value", "content", "result"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str)),
            _ => None,
        }
    }
}
