use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthContext, resolve_auth_context};
use crate::clock::{Clock, SystemClock};
use crate::config::CollectorConfig;
use crate::job::spawn_retention_job;
use crate::prelude::*;
use crate::process::{SnapshotProvider, create_provider};
use crate::remote::{HttpDispatcher, RemoteDispatcher};
use crate::storage::{PersistenceSink, SqliteSink};

mod interfaces;
mod listener;
mod sampler;
#[cfg(test)]
pub(crate) mod testing;
mod tracker;

pub use interfaces::{CommandRecord, CommandResult, OngoingCommand};
pub use listener::{CONNECTION_READ_TIMEOUT, SocketListener};
pub use sampler::{
    AdaptiveSampler, SamplerHandle, SamplerMode, SamplerSettings, mode_channel, next_interval,
};
pub use tracker::{CommandFilter, CommandTracker, TrackerOutcome, TrackerStatus};

/// Collaborators of the engine, injected so tests can swap them for fakes.
pub struct EngineDependencies {
    pub provider: Arc<dyn SnapshotProvider>,
    pub sink: Arc<dyn PersistenceSink>,
    pub dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    pub clock: Arc<dyn Clock>,
    pub auth: Option<AuthContext>,
}

impl EngineDependencies {
    /// The real collaborators described by `config`.
    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        let provider = create_provider(&config.process_collection_type)?;
        let sink = SqliteSink::open(&config.database_path())?;

        let dispatcher: Option<Arc<dyn RemoteDispatcher>> = if config.remote.enabled {
            Some(Arc::new(HttpDispatcher::new(&config.remote)?))
        } else {
            None
        };

        Ok(Self {
            provider,
            sink: Arc::new(sink),
            dispatcher,
            clock: Arc::new(SystemClock),
            auth: resolve_auth_context(&config.remote),
        })
    }
}

/// Owns the tracker, the sampler and the socket listener of one collector instance.
pub struct CollectionEngine {
    config: CollectorConfig,
    tracker: Arc<CommandTracker>,
    sampler: AdaptiveSampler,
    modes: watch::Receiver<SamplerMode>,
    sink: Arc<dyn PersistenceSink>,
}

impl CollectionEngine {
    pub fn new(config: CollectorConfig, deps: EngineDependencies) -> Result<Self> {
        let filter = CommandFilter::new(config.exclude_regex())?;
        let (handle, modes) = mode_channel();

        let tracker = CommandTracker::new(
            filter,
            deps.clock,
            Arc::clone(&deps.sink),
            deps.dispatcher.clone(),
            deps.auth.clone(),
            handle,
        );
        let sampler = AdaptiveSampler::new(
            deps.provider,
            Arc::clone(&deps.sink),
            deps.dispatcher,
            deps.auth,
            SamplerSettings::from(&config),
        );

        Ok(Self {
            config,
            tracker: Arc::new(tracker),
            sampler,
            modes,
            sink: deps.sink,
        })
    }

    pub fn from_config(config: CollectorConfig) -> Result<Self> {
        let deps = EngineDependencies::from_config(&config)?;
        Self::new(config, deps)
    }

    pub fn tracker(&self) -> Arc<CommandTracker> {
        Arc::clone(&self.tracker)
    }

    /// Bind the socket. Failing here means the collector cannot start.
    pub fn listen(&self) -> Result<SocketListener> {
        SocketListener::bind(&self.config.socket_path())
    }

    /// Serve `listener` until `shutdown` is cancelled, then stop the background tasks.
    pub async fn serve(self, listener: SocketListener, shutdown: CancellationToken) -> Result<()> {
        let CollectionEngine {
            config,
            tracker,
            sampler,
            modes,
            sink,
        } = self;
        let tasks = shutdown.child_token();

        let sampler_task = tokio::spawn(sampler.run(modes, tasks.clone()));
        let retention_task = config.retention.interval().map(|every| {
            spawn_retention_job(sink, config.retention.days, every, tasks.clone())
        });

        let served = listener
            .run(
                tracker,
                config.max_concurrent_commands,
                CONNECTION_READ_TIMEOUT,
                shutdown,
            )
            .await;

        tasks.cancel();
        if let Err(e) = sampler_task.await {
            error!("Sampler task failed: {e}");
        }
        if let Some(retention_task) = retention_task {
            if let Err(e) = retention_task.await {
                error!("Retention task failed: {e}");
            }
        }

        info!("Collector stopped");
        served
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.listen()?;
        self.serve(listener, shutdown).await
    }
}
