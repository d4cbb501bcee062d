//! Command text
//!
//! Tokenizing of the textual commands carried in `command` and `relay`
//! payloads.

/// Prefix of commands that are handled by an endpoint itself and never by
/// the hub (e.g. `!shim 100 200`).
pub const LOCAL_MARKER: char = '!';

/// Whether a command is endpoint-local
pub fn is_local(command: &str) -> bool {
    command.trim_start().starts_with(LOCAL_MARKER)
}

/// Split command text into tokens.
///
/// Tokens are separated by spaces. Double quotes group several words into
/// one token and are removed; there is no escaping. An unterminated group
/// runs to the end of the input.
///
/// `import "first name" second` -> `["import", "first name", "second"]`
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut group: Vec<&str> = Vec::new();
    let mut in_group = false;

    for element in command.split(' ').filter(|e| !e.is_empty()) {
        group.push(element);

        if element.starts_with('"') {
            in_group = true;
        }
        if element.ends_with('"') && (element.len() > 1 || group.len() > 1) {
            in_group = false;
        }

        if !in_group {
            tokens.push(group.join(" ").trim_matches('"').to_string());
            group.clear();
        }
    }

    if !group.is_empty() {
        tokens.push(group.join(" ").trim_matches('"').to_string());
    }

    tokens
}
