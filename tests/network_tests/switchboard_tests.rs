//! Switchboard Tests
//!
//! End-to-end routing over in-memory streams: accept, read, route, queue
//! and drain, without a poller or real sockets.

#[path = "../common/mod.rs"]
mod common;

use common::{decode_all, frame, local, registry_with, MockStream};
use mio::{Interest, Token};
use serde_json::json;
use shimhub::network::{ParseState, Switchboard};
use shimhub::protocol::{encode, ContentType, Header, Message, MAX_HEADER_SIZE};
use shimhub::router::DISCONNECT_NOTICE;
use shimhub::{Config, HubError};

const CONSOLE: u16 = 5001;
const SINOPE: u16 = 5002;
const COMPUTE: u16 = 5003;

// =============================================================================
// Helper Functions
// =============================================================================

fn switchboard() -> Switchboard<MockStream> {
    let registry = registry_with(&[
        ("server", 5000),
        ("console", CONSOLE),
        ("sinope", SINOPE),
        ("compute", COMPUTE),
    ]);
    Switchboard::new(&Config::default(), registry)
}

fn connect(sb: &mut Switchboard<MockStream>, port: u16) -> Token {
    sb.accept(MockStream::new(), local(port)).unwrap()
}

fn send(sb: &mut Switchboard<MockStream>, token: Token, message: &Message) {
    sb.connection_mut(token)
        .unwrap()
        .stream_mut()
        .feed(&frame(message));
    sb.handle_event(token, true, false);
}

/// Run one writable event and return what reached the peer
fn flush(sb: &mut Switchboard<MockStream>, token: Token) -> Vec<Message> {
    sb.handle_event(token, false, true);
    let bytes = match sb.connection_mut(token) {
        Some(conn) => conn.stream_mut().take_written(),
        None => sb
            .take_closed()
            .into_iter()
            .find(|conn| conn.token() == token)
            .map(|conn| conn.into_stream().written)
            .unwrap_or_default(),
    };
    decode_all(&bytes)
}

fn command(text: &str) -> Message {
    Message::json(ContentType::Command, &json!(text))
        .unwrap()
        .with_to("server")
}

fn relay(to: &str, text: &str) -> Message {
    Message::json(ContentType::Relay, &json!(text))
        .unwrap()
        .with_to(to)
}

fn answer(text: &str) -> Message {
    Message::json(ContentType::Relay, &json!(text)).unwrap()
}

fn ask(sb: &mut Switchboard<MockStream>, token: Token, text: &str) -> String {
    send(sb, token, &command(text));
    let replies = flush(sb, token);
    assert!(!replies.is_empty(), "no reply to '{}'", text);
    replies[0].text().unwrap().to_string()
}

// =============================================================================
// Accept Tests
// =============================================================================

#[test]
fn test_accept_classifies_peers() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let stranger = connect(&mut sb, 41234);

    assert_eq!(sb.connection(console).unwrap().name(), Some("console"));
    assert_eq!(sb.connection(stranger).unwrap().name(), None);
    assert_eq!(sb.registry().session("console"), Some(console));
    assert_eq!(sb.connection_count(), 2);
}

#[test]
fn test_duplicate_name_stays_unknown() {
    let mut sb = switchboard();
    let first = connect(&mut sb, CONSOLE);
    let second = connect(&mut sb, CONSOLE);

    assert_eq!(sb.connection(second).unwrap().name(), None);
    assert_eq!(sb.registry().session("console"), Some(first));
}

#[test]
fn test_tokens_are_unique_and_skip_listener() {
    let mut sb = switchboard();
    let a = connect(&mut sb, 40001);
    let b = connect(&mut sb, 40002);
    assert_ne!(a, b);
    assert_ne!(a, Token(0));
    assert_ne!(b, Token(0));
}

#[test]
fn test_connection_limit() {
    let config = Config::builder().max_connections(1).build();
    let mut sb: Switchboard<MockStream> = Switchboard::new(&config, registry_with(&[]));

    sb.accept(MockStream::new(), local(40001)).unwrap();
    assert!(!sb.is_accepting());
    let result = sb.accept(MockStream::new(), local(40002));
    assert!(matches!(result, Err(HubError::Refused(_))));
    assert_eq!(sb.connection_count(), 1);
}

// =============================================================================
// Hub Command Tests
// =============================================================================

#[test]
fn test_list_with_no_named_sessions() {
    let mut sb = switchboard();
    let stranger = connect(&mut sb, 41000);

    assert_eq!(ask(&mut sb, stranger, "list"), "0 sessions");
}

#[test]
fn test_list_names_sessions() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    connect(&mut sb, SINOPE);

    assert_eq!(
        ask(&mut sb, console, "list"),
        "2 sessions: console @ 127.0.0.1:5001, sinope @ 127.0.0.1:5002"
    );
}

#[test]
fn test_reply_is_addressed_back_to_sender() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    send(&mut sb, console, &command("status"));
    let replies = flush(&mut sb, console);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content_type(), &ContentType::Command);
    assert_eq!(replies[0].from(), Some("server"));
    assert_eq!(replies[0].to(), Some("console"));
}

#[test]
fn test_start_stop_and_status() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    assert_eq!(
        ask(&mut sb, console, "status"),
        "Server is running and shimming is disabled. 1 connection open."
    );
    assert_eq!(ask(&mut sb, console, "start"), "Shimming has been started.");
    assert!(sb.is_shimming());

    connect(&mut sb, SINOPE);
    assert_eq!(
        ask(&mut sb, console, "status"),
        "Server is running and shimming is enabled. 2 connections open."
    );

    assert_eq!(ask(&mut sb, console, "stop"), "Shimming has been stopped.");
    assert!(!sb.is_shimming());
}

#[test]
fn test_command_without_to_goes_to_hub() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    let message = Message::json(ContentType::Command, &json!("list")).unwrap();
    send(&mut sb, console, &message);
    let replies = flush(&mut sb, console);
    assert_eq!(replies[0].text(), Some("1 session: console @ 127.0.0.1:5001"));
}

#[test]
fn test_invalid_command_keeps_connection() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    send(&mut sb, console, &command("frobnicate"));
    let replies = flush(&mut sb, console);
    let body = replies[0].json_body().unwrap();
    assert_eq!(body["error"], "command");
    assert!(body["result"].as_str().unwrap().contains("invalid action"));

    assert_eq!(ask(&mut sb, console, "list"), "1 session: console @ 127.0.0.1:5001");
}

#[test]
fn test_local_command_is_rejected_by_hub() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    let reply = ask(&mut sb, console, "!shim 100");
    assert!(reply.starts_with("Error:"));
    assert_eq!(sb.connection_count(), 1);
}

#[test]
fn test_text_request_is_echoed() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    send(
        &mut sb,
        console,
        &Message::json(ContentType::Text, &json!({ "action": "ping" })).unwrap(),
    );
    let replies = flush(&mut sb, console);
    assert_eq!(replies[0].content_type(), &ContentType::Text);
    assert_eq!(
        replies[0].json_body().unwrap(),
        &json!({ "result": { "action": "ping" } })
    );
}

#[test]
fn test_binary_request_gets_binary_reply() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    send(&mut sb, console, &Message::binary("binary/custom-client-binary-type", vec![1u8, 2, 3]));
    let replies = flush(&mut sb, console);
    assert_eq!(
        replies[0].content_type().as_str(),
        "binary/custom-server-binary-type"
    );
    assert_eq!(
        &replies[0].payload()[..],
        b"First 10 bytes of request: [1, 2, 3]"
    );
}

// =============================================================================
// Relay Tests
// =============================================================================

#[test]
fn test_relay_reaches_target_verbatim() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    send(&mut sb, console, &relay("sinope", "!shim 100"));

    // No reply to the sender for this hop
    assert!(sb.connection(console).unwrap().pending_output().is_empty());
    assert_eq!(sb.connection(console).unwrap().state(), &ParseState::AwaitingHeaderLength);
    assert_eq!(sb.router().pending_returns(sinope), 1);

    let delivered = flush(&mut sb, sinope);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].content_type(), &ContentType::Relay);
    assert_eq!(delivered[0].text(), Some("!shim 100"));
    assert_eq!(delivered[0].to(), Some("sinope"));
    assert_eq!(delivered[0].from(), Some("console"));
}

#[test]
fn test_command_to_peer_is_relayed() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    let message = Message::json(ContentType::Command, &json!("!start"))
        .unwrap()
        .with_to("sinope");
    send(&mut sb, console, &message);

    let delivered = flush(&mut sb, sinope);
    assert_eq!(delivered[0].content_type(), &ContentType::Command);
    assert_eq!(delivered[0].text(), Some("!start"));
}

#[test]
fn test_relays_keep_submission_order() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let compute = connect(&mut sb, COMPUTE);
    let sinope = connect(&mut sb, SINOPE);

    send(&mut sb, console, &relay("sinope", "!shim 1"));
    send(&mut sb, compute, &relay("sinope", "!shim 2"));
    send(&mut sb, console, &relay("sinope", "!shim 3"));

    let texts: Vec<String> = flush(&mut sb, sinope)
        .iter()
        .map(|m| m.text().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["!shim 1", "!shim 2", "!shim 3"]);
}

#[test]
fn test_relay_marks_target_writable() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);
    sb.take_interest_changes();

    send(&mut sb, console, &relay("sinope", "!stop"));
    let changes = sb.take_interest_changes();
    assert!(changes.contains(&(sinope, Interest::WRITABLE)));
    assert!(changes.contains(&(console, Interest::READABLE)));
}

#[test]
fn test_relay_to_unknown_target_is_reported() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);

    send(&mut sb, console, &relay("nobody", "!shim 100"));
    let replies = flush(&mut sb, console);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].json_body().unwrap()["error"], "addressing");

    // Sender is still usable
    assert_eq!(ask(&mut sb, console, "list"), "1 session: console @ 127.0.0.1:5001");
}

#[test]
fn test_answer_follows_return_path() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    send(&mut sb, console, &relay("sinope", "!shim 100 200"));
    flush(&mut sb, sinope);
    assert_eq!(sb.router().pending_returns(sinope), 1);

    send(&mut sb, sinope, &answer("Applied 2 channels"));
    assert_eq!(sb.router().pending_returns(sinope), 0);
    assert_eq!(sb.router().pending_returns(console), 0);

    let delivered = flush(&mut sb, console);
    assert_eq!(delivered[0].text(), Some("Applied 2 channels"));
    assert_eq!(delivered[0].to(), Some("console"));
    assert_eq!(delivered[0].from(), Some("sinope"));
}

#[test]
fn test_repeated_relays_queue_one_return_path() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    for n in 0..50 {
        send(&mut sb, console, &relay("sinope", &format!("!shim {}", n)));
    }
    assert_eq!(flush(&mut sb, sinope).len(), 50);
    assert_eq!(sb.router().pending_returns(sinope), 1);

    send(&mut sb, sinope, &answer("done"));
    assert_eq!(sb.router().pending_returns(sinope), 0);
    assert_eq!(flush(&mut sb, console)[0].text(), Some("done"));
}

#[test]
fn test_relay_that_outgrows_header_limit_is_refused() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    // Header exactly at the limit; the hub must add `from` to forward it
    let payload = serde_json::to_vec(&json!("!shim 1")).unwrap();
    let mut header = Header::new(ContentType::Relay, payload.len()).with_to("sinope");
    let base = serde_json::to_vec(&header).unwrap().len();
    header.byteorder.push_str(&"x".repeat(MAX_HEADER_SIZE - base));
    assert_eq!(serde_json::to_vec(&header).unwrap().len(), MAX_HEADER_SIZE);

    sb.connection_mut(console)
        .unwrap()
        .stream_mut()
        .feed(&encode(&header, &payload).unwrap());
    sb.handle_event(console, true, false);

    let replies = flush(&mut sb, console);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].json_body().unwrap()["error"], "oversized");

    // Nothing forwarded, nothing owed, sender still connected
    assert!(sb.connection(sinope).unwrap().pending_output().is_empty());
    assert_eq!(sb.router().pending_returns(sinope), 0);
    assert!(sb.take_closed().is_empty());
    assert!(ask(&mut sb, console, "list").contains("sinope"));
}

#[test]
fn test_answer_with_nothing_pending_is_rejected() {
    let mut sb = switchboard();
    let sinope = connect(&mut sb, SINOPE);

    send(&mut sb, sinope, &answer("unsolicited"));
    let replies = flush(&mut sb, sinope);
    assert_eq!(replies[0].json_body().unwrap()["error"], "addressing");
    assert_eq!(sb.connection_count(), 1);
}

// =============================================================================
// Disconnect and Halt Tests
// =============================================================================

#[test]
fn test_disconnect_command_closes_after_reply() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    send(&mut sb, console, &command("disconnect"));
    assert!(sb.connection(console).unwrap().is_pending_disconnect());

    let replies = flush(&mut sb, console);
    assert_eq!(replies[0].text(), Some("disconnect"));
    assert!(sb.connection(console).is_none());
    assert_eq!(sb.registry().session("console"), None);

    // Others unaffected
    assert!(sb.connection(sinope).is_some());
    assert!(sb.is_running());
}

#[test]
fn test_halt_is_two_phase() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    send(&mut sb, console, &command("halt"));
    assert!(!sb.is_running());
    assert!(!sb.is_accepting());
    assert!(!sb.is_halted());

    let to_console = flush(&mut sb, console);
    assert_eq!(to_console[0].text(), Some("Halting server"));
    assert_eq!(to_console[1].text(), Some(DISCONNECT_NOTICE));
    assert_eq!(to_console[1].content_type(), &ContentType::Relay);
    assert!(!sb.is_halted());

    let to_sinope = flush(&mut sb, sinope);
    assert_eq!(to_sinope.len(), 1);
    assert_eq!(to_sinope[0].text(), Some(DISCONNECT_NOTICE));
    assert_eq!(to_sinope[0].to(), Some("sinope"));

    assert!(sb.is_halted());
}

#[test]
fn test_begin_halt_notifies_everyone() {
    let mut sb = switchboard();
    let a = connect(&mut sb, 40001);
    let b = connect(&mut sb, 40002);

    sb.begin_halt().unwrap();
    for token in [a, b] {
        let notices = flush(&mut sb, token);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].text(), Some(DISCONNECT_NOTICE));
    }
    assert!(sb.is_halted());
}

// =============================================================================
// Failure Isolation Tests
// =============================================================================

#[test]
fn test_malformed_peer_closes_only_itself() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let bad = connect(&mut sb, 41999);

    let junk = b"definitely not json";
    let mut bytes = (junk.len() as u16).to_be_bytes().to_vec();
    bytes.extend_from_slice(junk);
    sb.connection_mut(bad).unwrap().stream_mut().feed(&bytes);
    sb.handle_event(bad, true, false);

    assert!(sb.connection(bad).is_none());
    let closed = sb.take_closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].token(), bad);

    assert_eq!(ask(&mut sb, console, "list"), "1 session: console @ 127.0.0.1:5001");
}

#[test]
fn test_peer_close_releases_session_and_return_paths() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    send(&mut sb, console, &relay("sinope", "!shim 5"));
    assert_eq!(sb.router().pending_returns(sinope), 1);

    sb.connection_mut(console).unwrap().stream_mut().close_peer();
    sb.handle_event(console, true, false);

    assert!(sb.connection(console).is_none());
    assert_eq!(sb.registry().session("console"), None);
    assert_eq!(sb.router().pending_returns(sinope), 0);

    // Name is free for a reconnect
    let again = connect(&mut sb, CONSOLE);
    assert_eq!(sb.connection(again).unwrap().name(), Some("console"));
}

#[test]
fn test_relay_to_closed_target_is_rejected() {
    let mut sb = switchboard();
    let console = connect(&mut sb, CONSOLE);
    let sinope = connect(&mut sb, SINOPE);

    sb.close(sinope);
    send(&mut sb, console, &relay("sinope", "!shim 1"));

    // Session is gone, so this is an addressing error rather than a drop
    let replies = flush(&mut sb, console);
    assert_eq!(replies[0].json_body().unwrap()["error"], "addressing");
}
