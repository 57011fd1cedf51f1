use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lda_shared::protocol::{LifecycleEvent, MAX_MESSAGE_SIZE};
use nix::errno::Errno;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::tracker::{CommandTracker, TrackerOutcome};
use crate::prelude::*;

/// A hook that connects but never writes must not hold a slot forever
pub const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Remove whatever a previous run left at `path`.
fn remove_stale_socket(path: &Path) -> Result<()> {
    match nix::unistd::unlink(path) {
        Ok(()) => {
            debug!("Removed stale socket at {}", path.display());
            Ok(())
        }
        Err(Errno::ENOENT) => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to remove stale socket at {}", path.display())),
    }
}

pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketListener {
    /// Bind the collector socket, replacing any stale one.
    pub fn bind(path: &Path) -> Result<Self> {
        remove_stale_socket(path)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory {}", parent.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind socket at {}", path.display()))?;
        info!("Listening for commands on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// At most `max_concurrent` connections are handled at once. Once the limit is reached, the
    /// next accepted connection waits for a slot before its handler is spawned. Handlers already
    /// running are awaited before returning.
    pub async fn run(
        self,
        tracker: Arc<CommandTracker>,
        max_concurrent: usize,
        read_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let slots = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let handlers = TaskTracker::new();

        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(_) if shutdown.is_cancelled() => break,
                    Err(e) => {
                        error!("Failed to accept connection: {e}");
                        if pause_after_accept_error(&shutdown).await {
                            continue;
                        }
                        break;
                    }
                },
            };

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => {
                    permit.context("Connection slots closed")?
                }
            };

            let tracker = Arc::clone(&tracker);
            handlers.spawn(async move {
                handle_connection(stream, &tracker, read_timeout).await;
                drop(permit);
            });
        }

        // An end being persisted has already left the tracker, wait for it to land
        handlers.close();
        if !handlers.is_empty() {
            debug!("Waiting for {} connection handlers", handlers.len());
        }
        handlers.wait().await;

        debug!("Socket listener shutting down");
        if let Err(e) = remove_stale_socket(&self.path) {
            warn!("{e:#}");
        }
        Ok(())
    }
}

/// Errors such as EMFILE persist until a handler releases its descriptor, so retrying right away
/// would spin. Returns `false` when shutdown was requested meanwhile.
async fn pause_after_accept_error(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

/// Read the single message a connection carries and feed it to the tracker.
async fn handle_connection(mut stream: UnixStream, tracker: &CommandTracker, read_timeout: Duration) {
    let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
    let read = match timeout(read_timeout, stream.read(&mut buffer)).await {
        Ok(Ok(0)) => {
            trace!("Connection closed without a message");
            return;
        }
        Ok(Ok(read)) => read,
        Ok(Err(e)) => {
            error!("Failed to read from connection: {e}");
            return;
        }
        Err(_) => {
            warn!("No message received within {read_timeout:?}, closing connection");
            return;
        }
    };

    let message = String::from_utf8_lossy(&buffer[..read]);
    let event = match LifecycleEvent::parse(&message) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping message {message:?}: {e}");
            return;
        }
    };

    match tracker.handle(event).await {
        Ok(TrackerOutcome::Unmatched) | Ok(TrackerOutcome::Filtered) => {}
        Ok(outcome) => trace!("Handled event: {outcome:?}"),
        Err(e) => error!("Failed to handle event: {e:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_stale_socket() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("lda.socket");

        // Nothing to remove is fine
        remove_stale_socket(&path).unwrap();

        std::fs::write(&path, "leftover").unwrap();
        remove_stale_socket(&path).unwrap();
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_errors_are_retried_after_a_pause() {
        let shutdown = CancellationToken::new();

        let started = tokio::time::Instant::now();
        assert!(pause_after_accept_error(&shutdown).await);
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);

        shutdown.cancel();
        let started = tokio::time::Instant::now();
        assert!(!pause_after_accept_error(&shutdown).await);
        assert!(started.elapsed() < ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("run/lda.socket");

        let first = SocketListener::bind(&path).unwrap();
        drop(first);
        // The socket file outlives the listener
        assert!(path.exists());

        let second = SocketListener::bind(&path).unwrap();
        assert_eq!(second.path(), path);
    }

    #[tokio::test]
    async fn test_bind_failure_is_an_error() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let blocker = tmp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        assert!(SocketListener::bind(&blocker.join("lda.socket")).is_err());
    }
}
