use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use super::{HostInfo, ProcessCollectionType, ProcessSnapshot, ProcessStatus, SnapshotProvider};
use crate::clock::{Clock, SystemClock};
use crate::prelude::*;

const OS_RELEASE_PATH: &str = "/etc/os-release";

impl HostInfo {
    pub fn current() -> Self {
        let platform_family = std::fs::read_to_string(OS_RELEASE_PATH)
            .ok()
            .and_then(|os_release| parse_platform_family(&os_release))
            .unwrap_or_default();

        HostInfo {
            os: std::env::consts::OS.to_string(),
            platform: System::distribution_id(),
            platform_family,
        }
    }
}

/// Distribution family from an os-release file: the first `ID_LIKE` entry, `ID` otherwise.
fn parse_platform_family(os_release: &str) -> Option<String> {
    let value_of = |key: &str| {
        os_release.lines().find_map(|line| {
            let (name, value) = line.trim().split_once('=')?;
            (name == key).then(|| value.trim().trim_matches(['"', '\'']).to_string())
        })
    };

    value_of("ID_LIKE")
        .and_then(|id_like| id_like.split_whitespace().next().map(str::to_string))
        .or_else(|| value_of("ID"))
        .filter(|family| !family.is_empty())
}

impl From<sysinfo::ProcessStatus> for ProcessStatus {
    fn from(status: sysinfo::ProcessStatus) -> Self {
        match status {
            sysinfo::ProcessStatus::Run => ProcessStatus::Running,
            sysinfo::ProcessStatus::Sleep => ProcessStatus::Sleeping,
            sysinfo::ProcessStatus::Stop | sysinfo::ProcessStatus::Tracing => {
                ProcessStatus::Stopped
            }
            sysinfo::ProcessStatus::Idle => ProcessStatus::Idle,
            sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead => ProcessStatus::Zombie,
            sysinfo::ProcessStatus::UninterruptibleDiskSleep
            | sysinfo::ProcessStatus::Waking
            | sysinfo::ProcessStatus::Wakekill
            | sysinfo::ProcessStatus::Parked => ProcessStatus::Waiting,
            sysinfo::ProcessStatus::LockBlocked => ProcessStatus::Locked,
            _ => ProcessStatus::Unknown,
        }
    }
}

/// Collects processes through the OS process table, without spawning anything.
///
/// The `System` is kept between collections: CPU usage is computed from the difference between
/// two refreshes, so the very first batch reports 0% for every process.
pub struct HostProvider {
    system: Arc<Mutex<System>>,
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProvider {
    pub fn new() -> Self {
        HostProvider {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

#[async_trait]
impl SnapshotProvider for HostProvider {
    fn collection_type(&self) -> ProcessCollectionType {
        ProcessCollectionType::Psutil
    }

    async fn collect(&self) -> Result<Vec<ProcessSnapshot>> {
        trace!("Collecting processes from the host process table");

        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || -> Result<Vec<ProcessSnapshot>> {
            let mut system = system
                .lock()
                .map_err(|_| anyhow!("Process table lock poisoned"))?;
            Ok(snapshot_processes(
                &mut system,
                &HostInfo::current(),
                SystemClock.now_ms(),
            ))
        })
        .await
        .context("Process collection task failed")?
    }
}

fn snapshot_processes(
    system: &mut System,
    host: &HostInfo,
    captured_at_ms: i64,
) -> Vec<ProcessSnapshot> {
    system.refresh_memory();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cpu().with_memory(),
    );
    let total_memory = system.total_memory();

    system
        .processes()
        .values()
        // Threads are listed alongside processes on linux
        .filter(|process| process.thread_kind().is_none())
        .filter_map(|process| {
            let name = process.name().to_string_lossy().to_string();
            if name.is_empty() {
                trace!("Skipping process {} without a readable name", process.pid());
                return None;
            }

            let memory_usage_percent = if total_memory > 0 {
                process.memory() as f64 / total_memory as f64 * 100.0
            } else {
                0.0
            };

            Some(ProcessSnapshot {
                pid: process.pid().as_u32(),
                ppid: process.parent().map(|pid| pid.as_u32()),
                name,
                status: process.status().into(),
                cpu_usage_percent: process.cpu_usage() as f64,
                memory_usage_percent,
                created_time_ms: process.start_time() as i64 * 1000,
                captured_at_ms,
                os: host.os.clone(),
                platform: host.platform.clone(),
                platform_family: host.platform_family.clone(),
            })
        })
        .collect()
}
