use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandResult {
    Success,
    Failure,
}

impl CommandResult {
    /// `success` (any case) or a `0` exit code is a success, anything else a failure.
    pub fn from_wire(result: &str) -> Self {
        let result = result.trim();
        if result.eq_ignore_ascii_case("success") || result == "0" {
            CommandResult::Success
        } else {
            CommandResult::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandResult::Success => "success",
            CommandResult::Failure => "failure",
        }
    }
}

impl Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command that started and has not ended yet. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OngoingCommand {
    pub category: String,
    pub raw_command: String,
    pub user: String,
    pub directory: String,
    pub start_time_ms: i64,
}

/// A finished command, persisted exactly once.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    /// Assigned by the persistence sink
    pub id: Option<i64>,
    pub category: String,
    pub raw_command: String,
    pub user: String,
    pub directory: String,
    pub repository: Option<String>,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub execution_time_ms: i64,
    pub result: CommandResult,
    pub status: String,
}

impl OngoingCommand {
    pub fn finish(
        self,
        end_time_ms: i64,
        result: CommandResult,
        status: String,
        repository: Option<String>,
    ) -> CommandRecord {
        // The wall clock may step backwards between start and end
        let end_time_ms = end_time_ms.max(self.start_time_ms);

        CommandRecord {
            id: None,
            category: self.category,
            raw_command: self.raw_command,
            user: self.user,
            directory: self.directory,
            repository,
            start_time_ms: self.start_time_ms,
            end_time_ms,
            execution_time_ms: end_time_ms - self.start_time_ms,
            result,
            status,
        }
    }
}
