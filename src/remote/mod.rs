use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::auth::AuthContext;
use crate::collector::CommandRecord;
use crate::prelude::*;
use crate::process::ProcessSnapshot;

mod http;
mod interfaces;

pub use http::HttpDispatcher;

/// Best-effort push of batches to the remote collector.
///
/// Implementations must not retry: a failure is returned right away and the batch is dropped
/// by the caller.
#[async_trait]
pub trait RemoteDispatcher: Send + Sync {
    async fn send_processes(
        &self,
        batch: &[ProcessSnapshot],
        auth: Option<&AuthContext>,
    ) -> Result<()>;

    async fn send_commands(
        &self,
        batch: &[CommandRecord],
        auth: Option<&AuthContext>,
    ) -> Result<()>;
}

/// Push a process batch in the background, logging failures.
pub fn spawn_send_processes(
    dispatcher: Arc<dyn RemoteDispatcher>,
    batch: Vec<ProcessSnapshot>,
    auth: Option<AuthContext>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = dispatcher.send_processes(&batch, auth.as_ref()).await {
            warn!("Dropping batch of {} processes: {e:#}", batch.len());
        }
    })
}

/// Push a finished command in the background, logging failures.
pub fn spawn_send_command(
    dispatcher: Arc<dyn RemoteDispatcher>,
    record: CommandRecord,
    auth: Option<AuthContext>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let batch = [record];
        if let Err(e) = dispatcher.send_commands(&batch, auth.as_ref()).await {
            warn!("Dropping command {:?}: {e:#}", batch[0].raw_command);
        }
    })
}
