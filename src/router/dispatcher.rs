//! Command Dispatcher
//!
//! Interprets commands addressed to the hub itself. The dispatcher holds no
//! state: it reads a snapshot of the hub and returns the textual result plus
//! the effect the hub should apply.

use std::net::SocketAddr;

use crate::error::{HubError, Result};
use crate::protocol::{is_local, tokenize};

/// The closed set of hub commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubCommand {
    /// Enumerate live registry sessions
    List,
    /// Report run state
    Status,
    /// Begin the two-phase shutdown
    Halt,
    /// Enable shimming
    Start,
    /// Disable shimming
    Stop,
    /// Acknowledge, then close the requesting connection
    Disconnect,
}

impl HubCommand {
    /// Parse command text. Arguments are not accepted by any hub command.
    pub fn parse(text: &str) -> Result<Self> {
        if is_local(text) {
            return Err(HubError::Command(format!(
                "'{}' is an endpoint command and is not handled by the hub",
                text.trim()
            )));
        }

        let tokens = tokenize(text);
        let (action, args) = match tokens.split_first() {
            Some(split) => split,
            None => return Err(HubError::Command("empty command".to_string())),
        };

        let command = match action.as_str() {
            "list" => HubCommand::List,
            "status" => HubCommand::Status,
            "halt" => HubCommand::Halt,
            "start" => HubCommand::Start,
            "stop" => HubCommand::Stop,
            "disconnect" => HubCommand::Disconnect,
            other => {
                return Err(HubError::Command(format!("invalid action '{}'", other)));
            }
        };

        if !args.is_empty() {
            return Err(HubError::Command(format!(
                "'{}' takes no arguments, got {}",
                action,
                args.len()
            )));
        }

        Ok(command)
    }
}

/// A live session as seen by `list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub name: String,
    pub peer: SocketAddr,
}

/// Read-only view of the hub handed to the dispatcher
#[derive(Debug, Clone, Default)]
pub struct HubStatus {
    pub running: bool,
    pub shimming: bool,
    /// Named sessions, sorted by name
    pub sessions: Vec<SessionInfo>,
    /// All open connections, including unclassified peers
    pub connections: usize,
}

/// What the hub must do after answering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Halt,
    Disconnect,
    SetShimming(bool),
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub result: String,
    pub effect: Effect,
}

impl Verdict {
    fn reply(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            effect: Effect::None,
        }
    }

    fn with_effect(result: impl Into<String>, effect: Effect) -> Self {
        Self {
            result: result.into(),
            effect,
        }
    }
}

/// Stateless hub command interpreter
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Execute command text against a hub snapshot
    pub fn execute(&self, text: &str, status: &HubStatus) -> Result<Verdict> {
        let command = HubCommand::parse(text)?;
        tracing::debug!("Executing hub command {:?}", command);

        let verdict = match command {
            HubCommand::List => Verdict::reply(list(status)),
            HubCommand::Status => Verdict::reply(format!(
                "Server {} running and shimming is {}. {} connection{} open.",
                if status.running { "is" } else { "is not" },
                if status.shimming { "enabled" } else { "disabled" },
                status.connections,
                if status.connections == 1 { "" } else { "s" },
            )),
            HubCommand::Halt => Verdict::with_effect("Halting server", Effect::Halt),
            HubCommand::Start => {
                Verdict::with_effect("Shimming has been started.", Effect::SetShimming(true))
            }
            HubCommand::Stop => {
                Verdict::with_effect("Shimming has been stopped.", Effect::SetShimming(false))
            }
            HubCommand::Disconnect => Verdict::with_effect("disconnect", Effect::Disconnect),
        };

        Ok(verdict)
    }
}

fn list(status: &HubStatus) -> String {
    let count = status.sessions.len();
    let mut out = format!("{} session{}", count, if count == 1 { "" } else { "s" });
    if count > 0 {
        let entries: Vec<String> = status
            .sessions
            .iter()
            .map(|s| format!("{} @ {}", s.name, s.peer))
            .collect();
        out.push_str(": ");
        out.push_str(&entries.join(", "));
    }
    out
}
