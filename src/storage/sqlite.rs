use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, Transaction, params};

use super::PersistenceSink;
use super::migrations::run_migrations;
use crate::clock::{Clock, SystemClock};
use crate::collector::CommandRecord;
use crate::prelude::*;
use crate::process::ProcessSnapshot;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// SQLite backed sink. Every statement runs on the blocking pool behind a single connection.
pub struct SqliteSink {
    path: PathBuf,
    connection: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteSink {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        let mut connection = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        run_migrations(&mut connection)?;
        debug!("Database ready at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            connection: Arc::new(Mutex::new(connection)),
            clock: Arc::new(SystemClock),
        })
    }

    /// Clock used as the reference point of [`PersistenceSink::delete_older_than`]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut connection = connection
                .lock()
                .map_err(|_| anyhow!("Database connection lock poisoned"))?;
            f(&mut connection)
        })
        .await
        .context("Database task failed")?
    }
}

fn insert_process(tx: &Transaction, snapshot: &ProcessSnapshot) -> rusqlite::Result<usize> {
    tx.execute(
        "INSERT INTO processes (pid, ppid, name, status, cpu_usage, memory_usage, created_time,
            captured_at, os, platform, platform_family)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            snapshot.pid,
            snapshot.ppid,
            snapshot.name,
            snapshot.status.as_str(),
            snapshot.cpu_usage_percent,
            snapshot.memory_usage_percent,
            snapshot.created_time_ms,
            snapshot.captured_at_ms,
            snapshot.os,
            snapshot.platform,
            snapshot.platform_family,
        ],
    )
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn insert_processes(&self, batch: &[ProcessSnapshot]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let batch = batch.to_vec();
        self.with_connection(move |connection| {
            let tx = connection.transaction()?;
            let mut stored = 0;
            for snapshot in &batch {
                match insert_process(&tx, snapshot) {
                    Ok(_) => stored += 1,
                    Err(e) => warn!("Skipping process {} ({}): {e}", snapshot.pid, snapshot.name),
                }
            }
            tx.commit().context("Failed to commit process batch")?;
            trace!("Stored {stored}/{} processes", batch.len());
            Ok(stored)
        })
        .await
    }

    async fn insert_command(&self, record: &CommandRecord) -> Result<i64> {
        let record = record.clone();
        self.with_connection(move |connection| {
            connection
                .execute(
                    "INSERT INTO commands (category, command, user, directory, repository,
                        start_time, end_time, execution_time, result, status)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.category,
                        record.raw_command,
                        record.user,
                        record.directory,
                        record.repository,
                        record.start_time_ms,
                        record.end_time_ms,
                        record.execution_time_ms,
                        record.result.as_str(),
                        record.status,
                    ],
                )
                .with_context(|| format!("Failed to store command {:?}", record.raw_command))?;
            Ok(connection.last_insert_rowid())
        })
        .await
    }

    async fn delete_older_than(&self, days: u32) -> Result<()> {
        let cutoff_ms = self.clock.now_ms() - i64::from(days) * MILLIS_PER_DAY;
        self.with_connection(move |connection| {
            let tx = connection.transaction()?;
            let processes = tx.execute(
                "DELETE FROM processes WHERE captured_at < ?1",
                params![cutoff_ms],
            )?;
            let commands = tx.execute(
                "DELETE FROM commands WHERE end_time < ?1",
                params![cutoff_ms],
            )?;
            tx.commit()?;
            debug!("Retention removed {processes} processes and {commands} commands");
            Ok(())
        })
        .await
    }
}
