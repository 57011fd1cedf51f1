use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Scheduling state of a process at the time it was captured.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Idle,
    Zombie,
    Waiting,
    Locked,
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Idle => "idle",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Waiting => "waiting",
            ProcessStatus::Locked => "locked",
            ProcessStatus::Unknown => "unknown",
        }
    }
}

impl Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time reading of one process. Written once, never updated.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub status: ProcessStatus,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    /// Process start, epoch milliseconds
    pub created_time_ms: i64,
    /// Epoch milliseconds
    pub captured_at_ms: i64,
    pub os: String,
    pub platform: String,
    pub platform_family: String,
}

/// Host identity stamped on every snapshot of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostInfo {
    pub os: String,
    pub platform: String,
    pub platform_family: String,
}

#[cfg(test)]
impl HostInfo {
    pub fn test() -> Self {
        HostInfo {
            os: "linux".to_string(),
            platform: "ubuntu".to_string(),
            platform_family: "debian".to_string(),
        }
    }
}
