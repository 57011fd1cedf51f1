use async_trait::async_trait;

use crate::collector::CommandRecord;
use crate::prelude::*;
use crate::process::ProcessSnapshot;

mod migrations;
mod sqlite;

pub use sqlite::SqliteSink;

/// Durable store for collected records. Implementations serialize their own writes.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Persist a batch in a single transaction. Rows that fail are skipped, the number of
    /// stored rows is returned.
    async fn insert_processes(&self, batch: &[ProcessSnapshot]) -> Result<usize>;

    /// Persist a finished command and return the id it was stored under.
    async fn insert_command(&self, record: &CommandRecord) -> Result<i64>;

    /// Remove every record older than `days` days. Used by the retention job.
    async fn delete_older_than(&self, days: u32) -> Result<()>;
}
