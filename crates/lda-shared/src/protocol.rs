//! WARNING: Has to be in sync with the shell hooks that write to the collector socket.
//!
//! Every connection carries exactly one ASCII message, fields separated by `|`:
//!
//! - `start|<command>|<directory>|<user>|<token>`
//! - `end|<command>|<directory>|<user>|<token>|<result>|<status>`
//!
//! The protocol is fire-and-forget: the collector never answers.

use std::fmt::Display;

use anyhow::{Result, bail};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/lda.socket";

/// Upper bound of a single message, in bytes. Longer writes are truncated by the reader.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

pub const FIELD_SEPARATOR: char = '|';

const START_FIELD_COUNT: usize = 5;
const END_FIELD_COUNT: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStart {
    pub command: String,
    pub directory: String,
    pub user: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnd {
    pub command: String,
    pub directory: String,
    pub user: String,
    pub token: String,
    pub result: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start(CommandStart),
    End(CommandEnd),
}

impl LifecycleEvent {
    /// Parse a raw message. Trailing line terminators are ignored, any other arity is an error.
    pub fn parse(message: &str) -> Result<Self> {
        let message = message.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = message.split(FIELD_SEPARATOR).collect();

        match fields.as_slice() {
            ["start", command, directory, user, token] => Ok(LifecycleEvent::Start(CommandStart {
                command: command.to_string(),
                directory: directory.to_string(),
                user: user.to_string(),
                token: token.to_string(),
            })),
            ["end", command, directory, user, token, result, status] => {
                Ok(LifecycleEvent::End(CommandEnd {
                    command: command.to_string(),
                    directory: directory.to_string(),
                    user: user.to_string(),
                    token: token.to_string(),
                    result: result.trim().to_string(),
                    status: status.trim().to_string(),
                }))
            }
            ["start", ..] => bail!(
                "Invalid start message: expected {START_FIELD_COUNT} fields, got {}",
                fields.len()
            ),
            ["end", ..] => bail!(
                "Invalid end message: expected {END_FIELD_COUNT} fields, got {}",
                fields.len()
            ),
            [kind, ..] => bail!("Unknown message kind: {kind:?}"),
            [] => bail!("Empty message"),
        }
    }

    /// The raw command line, used by the acceptability filter for both message kinds.
    pub fn command(&self) -> &str {
        match self {
            LifecycleEvent::Start(start) => &start.command,
            LifecycleEvent::End(end) => &end.command,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            LifecycleEvent::Start(start) => &start.token,
            LifecycleEvent::End(end) => &end.token,
        }
    }
}

impl Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::Start(start) => write!(
                f,
                "start|{}|{}|{}|{}",
                start.command, start.directory, start.user, start.token
            ),
            LifecycleEvent::End(end) => write!(
                f,
                "end|{}|{}|{}|{}|{}|{}",
                end.command, end.directory, end.user, end.token, end.result, end.status
            ),
        }
    }
}
