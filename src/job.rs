use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;
use crate::storage::PersistenceSink;

/// Periodically purge records older than `days`, starting right away.
pub fn spawn_retention_job(
    sink: Arc<dyn PersistenceSink>,
    days: u32,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Retention job stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match sink.delete_older_than(days).await {
                        Ok(()) => debug!("Removed records older than {days} days"),
                        Err(e) => error!("Retention job failed: {e:#}"),
                    }
                }
            }
        }
    })
}
