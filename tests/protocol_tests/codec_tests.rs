//! Codec Tests
//!
//! Tests for frame encoding/decoding and the stream helpers.

use std::io::Cursor;

use bytes::Bytes;
use serde_json::json;
use shimhub::protocol::{
    decode_frame, decode_header, decode_header_length, decode_payload, encode, encode_message,
    read_message, write_message, tokenize, Body, ContentType, Decoded, Header, Message,
    MAX_HEADER_SIZE,
};
use shimhub::HubError;

// =============================================================================
// Helper Functions
// =============================================================================

fn roundtrip(message: &Message) -> Message {
    let encoded = encode_message(message).unwrap();
    match decode_frame(&encoded).unwrap() {
        Decoded::Complete((decoded, used)) => {
            assert_eq!(used, encoded.len());
            decoded
        }
        Decoded::NeedMore => panic!("complete frame reported as partial"),
    }
}

fn header_bytes(json: &str) -> Vec<u8> {
    json.as_bytes().to_vec()
}

// =============================================================================
// Round-trip Tests
// =============================================================================

#[test]
fn test_roundtrip_json_content_types() {
    for content_type in [ContentType::Text, ContentType::Command, ContentType::Relay] {
        let message = Message::json(content_type.clone(), &json!("list"))
            .unwrap()
            .with_to("server")
            .with_from("console");
        let decoded = roundtrip(&message);

        assert_eq!(decoded.header, message.header);
        assert_eq!(decoded.content_type(), &content_type);
        assert_eq!(decoded.text(), Some("list"));
        assert_eq!(decoded.payload(), message.payload());
    }
}

#[test]
fn test_roundtrip_binary_payload_sizes() {
    for size in [0usize, 1, 255, 4096, 65_000] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let message = Message::binary("binary/custom-client-binary-type", payload.clone());
        let decoded = roundtrip(&message);

        assert_eq!(decoded.header.content_length, size);
        assert_eq!(decoded.body, Body::Bytes(Bytes::from(payload)));
    }
}

#[test]
fn test_roundtrip_large_json_payload() {
    let text = "x".repeat(64_000);
    let message = Message::json(ContentType::Relay, &json!(text)).unwrap();
    let decoded = roundtrip(&message);
    assert_eq!(decoded.text(), Some(text.as_str()));
}

// =============================================================================
// Wire Format Tests
// =============================================================================

#[test]
fn test_prefix_is_big_endian_header_length() {
    let header = Header::new(ContentType::Command, 2);
    let encoded = encode(&header, b"{}").unwrap();

    let json_len = serde_json::to_vec(&header).unwrap().len();
    assert_eq!(&encoded[..2], &(json_len as u16).to_be_bytes());
    assert_eq!(encoded.len(), 2 + json_len + 2);
    assert_eq!(&encoded[encoded.len() - 2..], b"{}");
}

#[test]
fn test_header_json_keys() {
    let header = Header::new(ContentType::Relay, 5).with_to("sinope").with_from("console");
    let value = serde_json::to_value(&header).unwrap();

    assert_eq!(value["content-type"], "relay");
    assert_eq!(value["content-length"], 5);
    assert_eq!(value["to"], "sinope");
    assert_eq!(value["from"], "console");
    assert!(value["byteorder"].is_string());
}

#[test]
fn test_absent_addressing_fields_are_omitted() {
    let header = Header::new(ContentType::Text, 0);
    let value = serde_json::to_value(&header).unwrap();
    assert!(value.get("to").is_none());
    assert!(value.get("from").is_none());
}

#[test]
fn test_custom_content_type_is_preserved() {
    let ct = ContentType::from("binary/custom-client-binary-type");
    assert_eq!(ct, ContentType::Binary("binary/custom-client-binary-type".to_string()));
    assert_eq!(ct.as_str(), "binary/custom-client-binary-type");
    assert!(!ct.is_json());
}

#[test]
fn test_encode_rejects_length_mismatch() {
    let header = Header::new(ContentType::Text, 10);
    let result = encode(&header, b"{}");
    assert!(matches!(result, Err(HubError::Protocol(_))));
}

#[test]
fn test_encode_rejects_oversized_header() {
    let header = Header::new(ContentType::Relay, 2).with_to("a".repeat(MAX_HEADER_SIZE));
    let result = encode(&header, b"{}");
    assert!(matches!(result, Err(HubError::FrameTooLarge(_))));
    assert!(!result.unwrap_err().is_connection_fatal());
}

// =============================================================================
// Incremental Decoding Tests
// =============================================================================

#[test]
fn test_decode_header_length_needs_two_bytes() {
    assert!(decode_header_length(&[]).is_none());
    assert!(decode_header_length(&[0x01]).is_none());

    let (len, rest) = decode_header_length(&[0x01, 0x02, 0xAA]).unwrap();
    assert_eq!(len, 0x0102);
    assert_eq!(rest, &[0xAA]);
}

#[test]
fn test_decode_header_waits_for_enough_bytes() {
    let json = header_bytes(r#"{"byteorder":"little","content-type":"command","content-length":4}"#);
    let partial = &json[..json.len() - 1];
    assert_eq!(decode_header(partial, json.len()).unwrap(), Decoded::NeedMore);

    match decode_header(&json, json.len()).unwrap() {
        Decoded::Complete(header) => {
            assert_eq!(header.content_type, ContentType::Command);
            assert_eq!(header.content_length, 4);
            assert_eq!(header.to, None);
        }
        Decoded::NeedMore => panic!("expected complete header"),
    }
}

#[test]
fn test_decode_header_missing_required_fields() {
    let cases = [
        r#"{"content-type":"command","content-length":4}"#,
        r#"{"byteorder":"little","content-length":4}"#,
        r#"{"byteorder":"little","content-type":"command"}"#,
    ];
    for json in cases {
        let bytes = header_bytes(json);
        let result = decode_header(&bytes, bytes.len());
        assert!(
            matches!(result, Err(HubError::Protocol(_))),
            "accepted header {}",
            json
        );
    }
}

#[test]
fn test_decode_header_rejects_invalid_json() {
    let bytes = header_bytes("{not json");
    assert!(matches!(
        decode_header(&bytes, bytes.len()),
        Err(HubError::Protocol(_))
    ));
}

#[test]
fn test_decode_header_ignores_unknown_keys() {
    let bytes = header_bytes(
        r#"{"byteorder":"little","content-type":"relay","content-encoding":"utf-8","content-length":2,"to":"sinope"}"#,
    );
    match decode_header(&bytes, bytes.len()).unwrap() {
        Decoded::Complete(header) => assert_eq!(header.to.as_deref(), Some("sinope")),
        Decoded::NeedMore => panic!("expected complete header"),
    }
}

#[test]
fn test_decode_payload_need_more_is_not_an_error() {
    assert_eq!(decode_payload(b"abc", 4), Decoded::NeedMore);
    assert_eq!(decode_payload(b"abcd", 4), Decoded::Complete(&b"abcd"[..]));
    assert_eq!(decode_payload(b"", 0), Decoded::Complete(&b""[..]));
}

#[test]
fn test_decode_frame_partial_prefixes() {
    let message = Message::json(ContentType::Command, &json!("status")).unwrap();
    let encoded = encode_message(&message).unwrap();

    for cut in 0..encoded.len() {
        assert!(
            matches!(decode_frame(&encoded[..cut]).unwrap(), Decoded::NeedMore),
            "prefix of {} bytes decoded",
            cut
        );
    }
}

#[test]
fn test_decode_frame_rejects_bad_json_payload() {
    let header = Header::new(ContentType::Command, 3);
    let encoded = encode(&header, b"{{{").unwrap();
    assert!(matches!(decode_frame(&encoded), Err(HubError::Protocol(_))));
}

// =============================================================================
// Message Text Tests
// =============================================================================

#[test]
fn test_message_text_accepts_string_and_objects() {
    let bare = Message::json(ContentType::Command, &json!("list")).unwrap();
    assert_eq!(bare.text(), Some("list"));

    let value = Message::json(ContentType::Command, &json!({ "value": "status" })).unwrap();
    assert_eq!(value.text(), Some("status"));

    let result = Message::json(ContentType::Relay, &json!({ "result": "!server_disconnect" })).unwrap();
    assert_eq!(result.text(), Some("!server_disconnect"));

    let number = Message::json(ContentType::Text, &json!(42)).unwrap();
    assert_eq!(number.text(), None);
}

#[test]
fn test_tokenize_quoted_groups() {
    assert_eq!(
        tokenize(r#"import "first name" second"#),
        vec!["import", "first name", "second"]
    );
    assert_eq!(tokenize("  list   "), vec!["list"]);
    assert_eq!(tokenize(r#""single""#), vec!["single"]);
    assert_eq!(tokenize(r#"say "never closed"#), vec!["say", "never closed"]);
    assert!(tokenize("").is_empty());
}

// =============================================================================
// Stream-based I/O Tests
// =============================================================================

#[test]
fn test_write_then_read_message() {
    let first = Message::json(ContentType::Command, &json!("list"))
        .unwrap()
        .with_to("server");
    let second = Message::binary("binary/test", vec![1, 2, 3]);

    let mut buffer = Vec::new();
    write_message(&mut buffer, &first).unwrap();
    write_message(&mut buffer, &second).unwrap();

    let mut cursor = Cursor::new(buffer);
    assert_eq!(read_message(&mut cursor).unwrap(), first);
    assert_eq!(read_message(&mut cursor).unwrap(), second);
}

#[test]
fn test_read_message_truncated_stream() {
    let message = Message::json(ContentType::Relay, &json!("!shim 100")).unwrap();
    let mut encoded = encode_message(&message).unwrap();
    encoded.truncate(encoded.len() - 2);

    let mut cursor = Cursor::new(encoded);
    assert!(matches!(read_message(&mut cursor), Err(HubError::Io(_))));
}
