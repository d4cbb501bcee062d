//! Endpoint-local commands
//!
//! Commands starting with `!` are executed by the endpoint that receives
//! them and are never passed further on.

use crate::error::{HubError, Result};
use crate::protocol::{tokenize, LOCAL_MARKER};

/// A parsed `!` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    /// `!shim <mA> [<mA> ...]`: new per-channel currents in milliamps
    Shim(Vec<i64>),
    /// `!start`: enable shimming
    Start,
    /// `!stop`: disable shimming (all channels driven to zero)
    Stop,
    /// `!server_disconnect`: the hub is shutting down
    ServerDisconnect,
}

impl LocalCommand {
    /// Parse marker-prefixed command text
    pub fn parse(text: &str) -> Result<Self> {
        let body = text
            .trim_start()
            .strip_prefix(LOCAL_MARKER)
            .ok_or_else(|| HubError::Command(format!("'{}' is not a local command", text)))?;

        let tokens = tokenize(body);
        let (action, args) = tokens
            .split_first()
            .ok_or_else(|| HubError::Command("empty local command".to_string()))?;

        match action.as_str() {
            "shim" => {
                if args.is_empty() {
                    return Err(HubError::Command(
                        "shim needs at least one current".to_string(),
                    ));
                }
                let currents = args
                    .iter()
                    .map(|arg| {
                        arg.parse::<i64>().map_err(|_| {
                            HubError::Command(format!("'{}' is not a current in mA", arg))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(LocalCommand::Shim(currents))
            }
            "start" if args.is_empty() => Ok(LocalCommand::Start),
            "stop" if args.is_empty() => Ok(LocalCommand::Stop),
            "server_disconnect" => Ok(LocalCommand::ServerDisconnect),
            "start" | "stop" => Err(HubError::Command(format!(
                "'{}' takes no arguments",
                action
            ))),
            other => Err(HubError::Command(format!("invalid action '{}'", other))),
        }
    }
}
