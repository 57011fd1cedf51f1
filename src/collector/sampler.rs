use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthContext;
use crate::config::CollectorConfig;
use crate::prelude::*;
use crate::process::SnapshotProvider;
use crate::remote::{RemoteDispatcher, spawn_send_processes};
use crate::storage::PersistenceSink;

/// Shortest tick the sampler accepts, a zero interval would spin
const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerMode {
    /// No command in flight, sample at the baseline cadence (if any)
    Baseline,
    /// At least one command in flight, sample with a backing-off cadence
    Active,
}

/// Sending half of the sampler mode channel, owned by the tracker.
#[derive(Debug)]
pub struct SamplerHandle {
    modes: watch::Sender<SamplerMode>,
}

impl SamplerHandle {
    /// Switch the sampler to `mode`. Sending `Active` again restarts the active run.
    pub fn set_mode(&self, mode: SamplerMode) {
        self.modes.send_replace(mode);
    }

    pub fn mode(&self) -> SamplerMode {
        *self.modes.borrow()
    }
}

pub fn mode_channel() -> (SamplerHandle, watch::Receiver<SamplerMode>) {
    let (modes, receiver) = watch::channel(SamplerMode::Baseline);
    (SamplerHandle { modes }, receiver)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSettings {
    /// `None` disables baseline sampling
    pub baseline_interval: Option<Duration>,
    pub command_interval: Duration,
    pub multiplier: u32,
    pub max_duration: Duration,
}

impl From<&CollectorConfig> for SamplerSettings {
    fn from(config: &CollectorConfig) -> Self {
        SamplerSettings {
            baseline_interval: config.process_interval(),
            command_interval: config.command_interval(),
            multiplier: config.command_interval_multiplier,
            max_duration: config.max_duration(),
        }
    }
}

/// Interval following `current` in active mode, never above `max`.
pub fn next_interval(current: Duration, multiplier: u32, max: Duration) -> Duration {
    current.saturating_mul(multiplier.max(1)).min(max)
}

/// Why a sampling loop returned
enum LoopExit {
    ModeChanged,
    Shutdown,
}

pub struct AdaptiveSampler {
    provider: Arc<dyn SnapshotProvider>,
    sink: Arc<dyn PersistenceSink>,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    auth: Option<AuthContext>,
    settings: SamplerSettings,
}

impl AdaptiveSampler {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        sink: Arc<dyn PersistenceSink>,
        dispatcher: Option<Arc<dyn RemoteDispatcher>>,
        auth: Option<AuthContext>,
        settings: SamplerSettings,
    ) -> Self {
        Self {
            provider,
            sink,
            dispatcher,
            auth,
            settings,
        }
    }

    /// Run until `shutdown` is cancelled or the mode sender is dropped, following the mode
    /// published on `modes`.
    pub async fn run(self, mut modes: watch::Receiver<SamplerMode>, shutdown: CancellationToken) {
        debug!(
            "Sampler started ({} collection)",
            self.provider.collection_type()
        );

        loop {
            let mode = *modes.borrow_and_update();
            info!("Sampler entering {mode:?} mode");
            let exit = match mode {
                SamplerMode::Baseline => self.run_baseline(&mut modes, &shutdown).await,
                SamplerMode::Active => self.run_active(&mut modes, &shutdown).await,
            };
            if let LoopExit::Shutdown = exit {
                break;
            }
        }

        debug!("Sampler stopped");
    }

    async fn run_baseline(
        &self,
        modes: &mut watch::Receiver<SamplerMode>,
        shutdown: &CancellationToken,
    ) -> LoopExit {
        let Some(interval) = self.settings.baseline_interval else {
            return tokio::select! {
                _ = shutdown.cancelled() => LoopExit::Shutdown,
                changed = modes.changed() => mode_changed(changed),
            };
        };
        let interval = interval.max(MIN_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return LoopExit::Shutdown,
                changed = modes.changed() => return mode_changed(changed),
                _ = sleep(interval) => self.tick_and_log().await,
            }
        }
    }

    async fn run_active(
        &self,
        modes: &mut watch::Receiver<SamplerMode>,
        shutdown: &CancellationToken,
    ) -> LoopExit {
        let deadline = Instant::now() + self.settings.max_duration;
        let mut interval = self.settings.command_interval.max(MIN_INTERVAL);

        loop {
            let wake_at = Instant::now() + interval;
            if wake_at > deadline {
                // Hold active mode until the deadline itself, without ticking again
                tokio::select! {
                    _ = shutdown.cancelled() => return LoopExit::Shutdown,
                    changed = modes.changed() => return mode_changed(changed),
                    _ = sleep_until(deadline) => break,
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return LoopExit::Shutdown,
                changed = modes.changed() => return mode_changed(changed),
                _ = sleep_until(wake_at) => {
                    self.tick_and_log().await;
                    interval = next_interval(
                        interval,
                        self.settings.multiplier,
                        self.settings.max_duration,
                    );
                }
            }
        }

        // A command whose end never arrives must not keep the sampler busy
        info!(
            "Active sampling reached its maximum duration of {:?}, back to baseline cadence",
            self.settings.max_duration
        );
        self.run_baseline(modes, shutdown).await
    }

    async fn tick_and_log(&self) {
        if let Err(e) = self.tick().await {
            error!("Process sampling failed: {e:#}");
        }
    }

    /// Collect one batch, persist it and hand it to the remote dispatcher.
    pub async fn tick(&self) -> Result<usize> {
        let batch = self.provider.collect().await?;
        let persisted = self.sink.insert_processes(&batch).await;

        if let Some(dispatcher) = &self.dispatcher {
            spawn_send_processes(Arc::clone(dispatcher), batch, self.auth.clone());
        }

        let stored = persisted.context("Failed to persist processes")?;
        trace!("Sampled {stored} processes");
        Ok(stored)
    }
}

fn mode_changed(changed: Result<(), watch::error::RecvError>) -> LoopExit {
    match changed {
        Ok(()) => LoopExit::ModeChanged,
        // The tracker is gone, nothing can ever wake us up again
        Err(_) => LoopExit::Shutdown,
    }
}
