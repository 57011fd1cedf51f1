use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use lda_shared::protocol::{CommandEnd, CommandStart, LifecycleEvent};
use regex::Regex;

use super::interfaces::{CommandRecord, CommandResult, OngoingCommand};
use super::sampler::{SamplerHandle, SamplerMode};
use crate::auth::AuthContext;
use crate::clock::Clock;
use crate::helpers::{parse_category, resolve_repository};
use crate::prelude::*;
use crate::remote::{RemoteDispatcher, spawn_send_command};
use crate::storage::PersistenceSink;

/// Decides which commands are tracked at all.
#[derive(Debug, Default)]
pub struct CommandFilter {
    exclude: Option<Regex>,
}

impl CommandFilter {
    pub fn new(exclude_pattern: Option<&str>) -> Result<Self> {
        let exclude = exclude_pattern
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("Invalid exclude regex {pattern:?}"))
            })
            .transpose()?;
        Ok(Self { exclude })
    }

    pub fn is_excluded(&self, command: &str) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|exclude| exclude.is_match(command))
    }
}

/// What the tracker did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// Matched the exclude regex, nothing happened
    Filtered,
    /// `activated` is set when this start moved the sampler into active mode
    Started { activated: bool },
    Persisted(CommandRecord),
    /// An end without a start in flight
    Unmatched,
}

/// Point in time view of the tracker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStatus {
    pub active_commands: usize,
    pub ongoing_commands: usize,
    pub sampler_active: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    ongoing: HashMap<String, OngoingCommand>,
    active_commands: usize,
    sampler_active: bool,
}

/// Pairs start and end events by token and persists finished commands.
///
/// All shared state lives behind one mutex, which is never held across I/O. The sampler mode is
/// published while the lock is held so that two edges can never be delivered out of order.
pub struct CommandTracker {
    state: Mutex<TrackerState>,
    filter: CommandFilter,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn PersistenceSink>,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    auth: Option<AuthContext>,
    sampler: SamplerHandle,
}

impl CommandTracker {
    pub fn new(
        filter: CommandFilter,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn PersistenceSink>,
        dispatcher: Option<Arc<dyn RemoteDispatcher>>,
        auth: Option<AuthContext>,
        sampler: SamplerHandle,
    ) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            filter,
            clock,
            sink,
            dispatcher,
            auth,
            sampler,
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, TrackerState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Command tracker state poisoned"))
    }

    pub async fn handle(&self, event: LifecycleEvent) -> Result<TrackerOutcome> {
        match event {
            LifecycleEvent::Start(start) => self.start(start),
            LifecycleEvent::End(end) => self.end(end).await,
        }
    }

    pub fn start(&self, start: CommandStart) -> Result<TrackerOutcome> {
        if self.filter.is_excluded(&start.command) {
            trace!("Ignoring excluded command {:?}", start.command);
            return Ok(TrackerOutcome::Filtered);
        }

        let ongoing = OngoingCommand {
            category: parse_category(&start.command),
            raw_command: start.command,
            user: start.user,
            directory: start.directory,
            start_time_ms: self.clock.now_ms(),
        };
        debug!("Command started [{}]: {:?}", start.token, ongoing.raw_command);

        let mut state = self.lock_state()?;
        if state.ongoing.insert(start.token.clone(), ongoing).is_some() {
            // Same token still in flight, its end was lost
            warn!("Replacing in-flight command for token {}", start.token);
            return Ok(TrackerOutcome::Started { activated: false });
        }

        state.active_commands += 1;
        let activated = state.active_commands == 1 && !state.sampler_active;
        if activated {
            state.sampler_active = true;
            self.sampler.set_mode(SamplerMode::Active);
        }
        Ok(TrackerOutcome::Started { activated })
    }

    pub async fn end(&self, end: CommandEnd) -> Result<TrackerOutcome> {
        if self.filter.is_excluded(&end.command) {
            trace!("Ignoring excluded command {:?}", end.command);
            return Ok(TrackerOutcome::Filtered);
        }
        let end_time_ms = self.clock.now_ms();

        let ongoing = {
            let mut state = self.lock_state()?;
            let Some(ongoing) = state.ongoing.remove(&end.token) else {
                drop(state);
                error!(
                    "No matching start for command {:?} [{}]",
                    end.command, end.token
                );
                return Ok(TrackerOutcome::Unmatched);
            };

            state.active_commands = state.active_commands.saturating_sub(1);
            if state.active_commands == 0 && state.sampler_active {
                state.sampler_active = false;
                self.sampler.set_mode(SamplerMode::Baseline);
            }
            ongoing
        };

        let directory = PathBuf::from(&ongoing.directory);
        let repository = tokio::task::spawn_blocking(move || resolve_repository(&directory))
            .await
            .unwrap_or_else(|e| {
                warn!("Repository lookup failed: {e}");
                None
            });

        let mut record = ongoing.finish(
            end_time_ms,
            CommandResult::from_wire(&end.result),
            end.status,
            repository,
        );
        let persisted = self.sink.insert_command(&record).await;
        if let Ok(id) = persisted {
            record.id = Some(id);
        }

        if let Some(dispatcher) = &self.dispatcher {
            spawn_send_command(Arc::clone(dispatcher), record.clone(), self.auth.clone());
        }

        persisted.with_context(|| format!("Failed to persist command {:?}", record.raw_command))?;
        debug!(
            "Command finished [{}] in {}ms: {:?}",
            end.token, record.execution_time_ms, record.raw_command
        );
        Ok(TrackerOutcome::Persisted(record))
    }

    pub fn status(&self) -> TrackerStatus {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        TrackerStatus {
            active_commands: state.active_commands,
            ongoing_commands: state.ongoing.len(),
            sampler_active: state.sampler_active,
        }
    }

    pub fn active_commands(&self) -> usize {
        self.status().active_commands
    }

    pub fn is_sampler_active(&self) -> bool {
        self.status().sampler_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::sampler::mode_channel;
    use crate::collector::testing::{FakeDispatcher, ManualClock, MemorySink};
    use tokio::sync::watch;

    struct Fixture {
        tracker: CommandTracker,
        clock: Arc<ManualClock>,
        sink: Arc<MemorySink>,
        modes: watch::Receiver<SamplerMode>,
    }

    fn fixture_with(exclude: Option<&str>, sink: MemorySink) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let sink = Arc::new(sink);
        let (handle, modes) = mode_channel();
        let tracker = CommandTracker::new(
            CommandFilter::new(exclude).unwrap(),
            clock.clone(),
            sink.clone(),
            None,
            None,
            handle,
        );
        Fixture {
            tracker,
            clock,
            sink,
            modes,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None, MemorySink::default())
    }

    fn start(command: &str, token: &str) -> CommandStart {
        CommandStart {
            command: command.to_string(),
            directory: "/nonexistent/proj".to_string(),
            user: "alice".to_string(),
            token: token.to_string(),
        }
    }

    fn end(command: &str, token: &str) -> CommandEnd {
        CommandEnd {
            command: command.to_string(),
            directory: "/nonexistent/proj".to_string(),
            user: "alice".to_string(),
            token: token.to_string(),
            result: "success".to_string(),
            status: "0".to_string(),
        }
    }

    #[test]
    fn test_invalid_exclude_regex() {
        assert!(CommandFilter::new(Some("(unclosed")).is_err());
        assert!(!CommandFilter::new(None).unwrap().is_excluded("ls"));
    }

    #[test_log::test(tokio::test)]
    async fn test_start_then_end_persists_once() {
        let f = fixture();

        f.tracker.start(start("sudo /usr/bin/git pull origin", "tok123")).unwrap();
        f.clock.advance(2_000);
        let outcome = f.tracker.end(end("git pull origin", "tok123")).await.unwrap();

        let TrackerOutcome::Persisted(record) = outcome else {
            panic!("expected a persisted record, got {outcome:?}");
        };
        assert_eq!(record.id, Some(1));
        assert_eq!(record.category, "git");
        assert_eq!(record.raw_command, "sudo /usr/bin/git pull origin");
        assert_eq!(record.execution_time_ms, 2_000);
        assert_eq!(record.end_time_ms - record.start_time_ms, 2_000);
        assert_eq!(record.result, CommandResult::Success);
        assert_eq!(record.repository, None);
        assert_eq!(
            f.sink.commands(),
            vec![CommandRecord {
                id: None,
                ..record
            }]
        );

        // A second end for the same token has nothing left to pair with
        assert_eq!(
            f.tracker.end(end("git pull origin", "tok123")).await.unwrap(),
            TrackerOutcome::Unmatched
        );
        assert_eq!(f.sink.commands().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_unmatched_end() {
        let f = fixture();

        let outcome = f.tracker.end(end("make", "ghost")).await.unwrap();
        assert_eq!(outcome, TrackerOutcome::Unmatched);
        assert!(f.sink.commands().is_empty());
        assert_eq!(f.tracker.active_commands(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_excluded_commands_leave_no_trace() {
        let f = fixture_with(Some("^ls"), MemorySink::default());

        assert_eq!(
            f.tracker.start(start("ls -la", "tokA")).unwrap(),
            TrackerOutcome::Filtered
        );
        assert_eq!(
            f.tracker.end(end("ls -la", "tokA")).await.unwrap(),
            TrackerOutcome::Filtered
        );
        assert_eq!(
            f.tracker.status(),
            TrackerStatus {
                active_commands: 0,
                ongoing_commands: 0,
                sampler_active: false,
            }
        );
        assert!(f.sink.commands().is_empty());
        assert!(!f.modes.has_changed().unwrap());
    }

    #[test_log::test(tokio::test)]
    async fn test_sampler_mode_flips_on_edges_only() {
        let mut f = fixture();

        assert_eq!(
            f.tracker.start(start("cargo build", "a")).unwrap(),
            TrackerOutcome::Started { activated: true }
        );
        assert_eq!(*f.modes.borrow_and_update(), SamplerMode::Active);
        assert_eq!(
            f.tracker.start(start("cargo test", "b")).unwrap(),
            TrackerOutcome::Started { activated: false }
        );
        assert!(!f.modes.has_changed().unwrap());
        insta::assert_debug_snapshot!(f.tracker.status(), @r"
        TrackerStatus {
            active_commands: 2,
            ongoing_commands: 2,
            sampler_active: true,
        }
        ");

        f.tracker.end(end("cargo build", "a")).await.unwrap();
        assert!(!f.modes.has_changed().unwrap());
        assert!(f.tracker.is_sampler_active());

        f.tracker.end(end("cargo test", "b")).await.unwrap();
        assert!(f.modes.has_changed().unwrap());
        assert_eq!(*f.modes.borrow_and_update(), SamplerMode::Baseline);
        assert!(!f.tracker.is_sampler_active());
    }

    #[test_log::test(tokio::test)]
    async fn test_reused_token_keeps_counter_in_sync() {
        let f = fixture();

        f.tracker.start(start("npm install", "dup")).unwrap();
        f.clock.advance(500);
        f.tracker.start(start("npm run build", "dup")).unwrap();
        assert_eq!(f.tracker.active_commands(), 1);

        let outcome = f.tracker.end(end("npm run build", "dup")).await.unwrap();
        let TrackerOutcome::Persisted(record) = outcome else {
            panic!("expected a persisted record, got {outcome:?}");
        };
        assert_eq!(record.raw_command, "npm run build");
        assert_eq!(f.tracker.active_commands(), 0);
        assert!(!f.tracker.is_sampler_active());
    }

    #[test_log::test(tokio::test)]
    async fn test_persistence_failure_still_releases_the_command() {
        let f = fixture_with(None, MemorySink::failing());

        f.tracker.start(start("terraform apply", "t")).unwrap();
        assert!(f.tracker.end(end("terraform apply", "t")).await.is_err());
        assert_eq!(f.tracker.active_commands(), 0);
        assert!(!f.tracker.is_sampler_active());
    }

    #[test_log::test(tokio::test)]
    async fn test_finished_commands_are_dispatched_with_identity() {
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = Arc::new(FakeDispatcher::default());
        let (handle, _modes) = mode_channel();
        let auth = AuthContext {
            team_id: Some("team-42".to_string()),
            ..AuthContext::default()
        };
        let tracker = CommandTracker::new(
            CommandFilter::default(),
            clock,
            Arc::new(MemorySink::default()),
            Some(dispatcher.clone()),
            Some(auth.clone()),
            handle,
        );

        tracker.start(start("go test ./...", "g")).unwrap();
        tracker.end(end("go test ./...", "g")).await.unwrap();

        let dispatched = dispatcher.wait_for_commands(1).await;
        assert_eq!(dispatched[0].0.category, "go");
        assert_eq!(dispatched[0].0.id, Some(1));
        assert_eq!(dispatched[0].1, Some(auth));
    }
}
