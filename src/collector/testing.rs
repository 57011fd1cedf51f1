//! In-memory collaborators for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::CommandRecord;
use crate::auth::AuthContext;
use crate::clock::Clock;
use crate::prelude::*;
use crate::process::{
    HostInfo, ProcessCollectionType, ProcessSnapshot, ProcessStatus, SnapshotProvider,
};
use crate::remote::RemoteDispatcher;
use crate::storage::PersistenceSink;

#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now_ms.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Returns `batch_size` processes on every call
pub struct FakeProvider {
    batch_size: usize,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotProvider for FakeProvider {
    fn collection_type(&self) -> ProcessCollectionType {
        ProcessCollectionType::Psutil
    }

    async fn collect(&self) -> Result<Vec<ProcessSnapshot>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let host = HostInfo::test();
        Ok((0..self.batch_size)
            .map(|i| ProcessSnapshot {
                pid: 100 + i as u32,
                ppid: Some(1),
                name: format!("worker-{i}"),
                status: ProcessStatus::Sleeping,
                cpu_usage_percent: 0.5,
                memory_usage_percent: 0.1,
                created_time_ms: 1_000,
                captured_at_ms: 2_000 + call as i64,
                os: host.os.clone(),
                platform: host.platform.clone(),
                platform_family: host.platform_family.clone(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MemorySink {
    fail: bool,
    processes: Mutex<Vec<ProcessSnapshot>>,
    commands: Mutex<Vec<CommandRecord>>,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn process_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn insert_processes(&self, batch: &[ProcessSnapshot]) -> Result<usize> {
        ensure!(!self.fail, "database is locked");
        self.processes.lock().unwrap().extend_from_slice(batch);
        Ok(batch.len())
    }

    async fn insert_command(&self, record: &CommandRecord) -> Result<i64> {
        ensure!(!self.fail, "database is locked");
        let mut commands = self.commands.lock().unwrap();
        commands.push(record.clone());
        Ok(commands.len() as i64)
    }

    async fn delete_older_than(&self, _days: u32) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDispatcher {
    processes: AtomicUsize,
    commands: Mutex<Vec<(CommandRecord, Option<AuthContext>)>>,
}

impl FakeDispatcher {
    /// Dispatch runs on a detached task, poll until it is observed
    pub async fn wait_for_processes(&self, expected: usize) {
        for _ in 0..200 {
            if self.processes.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {expected} dispatched processes");
    }

    pub async fn wait_for_commands(
        &self,
        expected: usize,
    ) -> Vec<(CommandRecord, Option<AuthContext>)> {
        for _ in 0..200 {
            let commands = self.commands.lock().unwrap().clone();
            if commands.len() >= expected {
                return commands;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {expected} dispatched commands");
    }
}

#[async_trait]
impl RemoteDispatcher for FakeDispatcher {
    async fn send_processes(
        &self,
        batch: &[ProcessSnapshot],
        _auth: Option<&AuthContext>,
    ) -> Result<()> {
        self.processes.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn send_commands(
        &self,
        batch: &[CommandRecord],
        auth: Option<&AuthContext>,
    ) -> Result<()> {
        let mut commands = self.commands.lock().unwrap();
        commands.extend(batch.iter().map(|record| (record.clone(), auth.cloned())));
        Ok(())
    }
}
