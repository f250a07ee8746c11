//! Decision Process Supervisor
//!
//! Spawns the decision process, writes one JSON event per line to its stdin,
//! and respawns it after a fixed backoff whenever it exits on its own.
//!
//! # Delivery
//!
//! Each process gets a bounded line queue drained by its own writer task,
//! so a child that stops reading never stalls the caller: once the queue is
//! full, events come back [`Delivery::Backlogged`]. Events sent while the
//! process is down are dropped, not queued for the next one.
//!
//! # Shutdown
//!
//! [`DecisionPipe::close`] lets the writer drain its queue and close stdin so
//! the child sees EOF, waits up to
//! the grace period for it to exit, kills it otherwise, and returns only
//! after the supervisor task has finished. Closing during the restart
//! backoff cancels the pending respawn.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DecisionSinkPort, Delivery};
use crate::domain::events::NormalizedEvent;
use crate::infrastructure::metrics::record_decision_restart;

// =============================================================================
// Configuration
// =============================================================================

/// Default wait between an unexpected exit and the respawn.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Default wait for the child to exit after EOF before killing it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Lines buffered per process ahead of its stdin.
pub const INPUT_QUEUE_CAPACITY: usize = 1024;

/// Supervisor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeConfig {
    /// Wait between an unexpected exit and the respawn.
    pub restart_backoff: Duration,
    /// Wait for a clean exit on close before killing.
    pub shutdown_grace: Duration,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            restart_backoff: DEFAULT_RESTART_BACKOFF,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

// =============================================================================
// Errors and State
// =============================================================================

/// Errors starting the decision process.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Command line had no program.
    #[error("decision process command is empty")]
    EmptyCommand,

    /// Process could not be spawned.
    #[error("failed to spawn decision process `{program}`: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Spawned process had no stdin handle.
    #[error("decision process stdin unavailable")]
    StdinUnavailable,
}

/// Supervisor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// A process is live and accepting input.
    Running,
    /// Process exited; waiting to respawn.
    Restarting,
    /// Close requested; waiting for the process to exit.
    ShuttingDown,
    /// Supervisor finished.
    Closed,
}

impl PipeState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

struct Shared {
    program: String,
    args: Vec<String>,
    config: PipeConfig,
    input: parking_lot::Mutex<Option<mpsc::Sender<String>>>,
    state: parking_lot::RwLock<PipeState>,
    generation: AtomicU64,
    pid: AtomicU32,
    shutdown: CancellationToken,
}

/// Handle to a supervised decision process.
///
/// The handle stays valid across restarts; each restart swaps the process
/// and its input queue under the handle's lock.
pub struct DecisionPipe {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DecisionPipe {
    /// Parse `command` (whitespace separated), spawn it, and start
    /// supervising it.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty or the first spawn fails.
    pub fn start(command: &str, config: PipeConfig) -> Result<Self, PipeError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(PipeError::EmptyCommand)?;
        let args: Vec<String> = parts.collect();

        let (child, stdin) = spawn_child(&program, &args).map_err(|source| PipeError::Spawn {
            program: program.clone(),
            source,
        })?;
        let stdin = stdin.ok_or(PipeError::StdinUnavailable)?;

        let shared = Arc::new(Shared {
            program,
            args,
            config,
            input: parking_lot::Mutex::new(Some(spawn_writer(stdin, 1))),
            state: parking_lot::RwLock::new(PipeState::Running),
            generation: AtomicU64::new(1),
            pid: AtomicU32::new(child.id().unwrap_or(0)),
            shutdown: CancellationToken::new(),
        });

        tracing::info!(
            program = %shared.program,
            args = ?shared.args,
            pid = child.id(),
            "Decision process started"
        );

        let supervisor = tokio::spawn(supervise(Arc::clone(&shared), child));

        Ok(Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Queue `event` as one line for the live process.
    ///
    /// Never waits: [`Delivery::Dropped`] when no process is accepting
    /// input, [`Delivery::Backlogged`] when its queue is full.
    pub async fn send(&self, event: &NormalizedEvent) -> Delivery {
        let line = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(event_type = %event.event_type(), error = %e, "Event not serializable");
                return Delivery::Dropped;
            }
        };

        let guard = self.shared.input.lock();
        let Some(input) = guard.as_ref() else {
            return Delivery::Dropped;
        };

        match input.try_send(line) {
            Ok(()) => Delivery::Written,
            Err(TrySendError::Full(_)) => Delivery::Backlogged,
            Err(TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }

    /// Stop accepting events, wait for the process and the supervisor to finish.
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        {
            let mut state = self.shared.state.write();
            if *state != PipeState::Closed {
                *state = PipeState::ShuttingDown;
            }
        }

        // Dropping the sender lets the writer drain and close stdin.
        drop(self.shared.input.lock().take());

        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Decision process supervisor panicked");
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipeState {
        *self.shared.state.read()
    }

    /// Number of processes spawned so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// OS pid of the live process, if any.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match self.shared.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

fn spawn_child(program: &str, args: &[String]) -> std::io::Result<(Child, Option<ChildStdin>)> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    let stdin = child.stdin.take();
    Ok((child, stdin))
}

/// Copy queued lines into the child's stdin until the queue closes or the
/// child stops accepting input. Closing stdin on exit gives the child EOF.
fn spawn_writer(stdin: ChildStdin, generation: u64) -> mpsc::Sender<String> {
    let (tx, mut rx) = mpsc::channel::<String>(INPUT_QUEUE_CAPACITY);

    tokio::spawn(async move {
        let mut writer = BufWriter::new(stdin);
        while let Some(line) = rx.recv().await {
            let written = match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::debug!(generation, error = %e, "Decision process input closed");
                return;
            }
        }
        let _ = writer.flush().await;
        let _ = writer.shutdown().await;
    });

    tx
}

/// Spawn a replacement and install its input, unless shutdown won the race.
async fn respawn(shared: &Shared) -> Option<Child> {
    let spawned = {
        let mut guard = shared.input.lock();
        if shared.shutdown.is_cancelled() {
            return None;
        }

        match spawn_child(&shared.program, &shared.args) {
            Ok((child, Some(stdin))) => {
                let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *guard = Some(spawn_writer(stdin, generation));
                shared.pid.store(child.id().unwrap_or(0), Ordering::SeqCst);
                *shared.state.write() = PipeState::Running;
                record_decision_restart();
                tracing::info!(pid = child.id(), generation, "Decision process restarted");
                Ok(child)
            }
            Ok((child, None)) => Err(Some(child)),
            Err(e) => {
                tracing::error!(program = %shared.program, error = %e, "Decision process respawn failed");
                Err(None)
            }
        }
    };

    match spawned {
        Ok(child) => Some(child),
        Err(Some(mut child)) => {
            tracing::error!("Respawned decision process has no stdin");
            let _ = child.kill().await;
            None
        }
        Err(None) => None,
    }
}

async fn supervise(shared: Arc<Shared>, mut child: Child) {
    loop {
        let exit = tokio::select! {
            status = child.wait() => Some(status),
            () = shared.shutdown.cancelled() => None,
        };

        let Some(status) = exit else {
            reap(&mut child, shared.config.shutdown_grace).await;
            break;
        };

        shared.pid.store(0, Ordering::SeqCst);
        drop(shared.input.lock().take());

        if shared.shutdown.is_cancelled() {
            log_exit(&status, "Decision process exited on shutdown");
            break;
        }

        *shared.state.write() = PipeState::Restarting;
        log_exit(&status, "Decision process exited unexpectedly");

        let next = loop {
            tokio::select! {
                () = shared.shutdown.cancelled() => break None,
                () = tokio::time::sleep(shared.config.restart_backoff) => {}
            }
            if let Some(next) = respawn(&shared).await {
                break Some(next);
            }
            if shared.shutdown.is_cancelled() {
                break None;
            }
        };

        match next {
            Some(next) => child = next,
            None => break,
        }
    }

    shared.pid.store(0, Ordering::SeqCst);
    *shared.state.write() = PipeState::Closed;
    tracing::info!("Decision process supervisor stopped");
}

async fn reap(child: &mut Child, grace: Duration) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => log_exit(&Ok(status), "Decision process exited on shutdown"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for decision process"),
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Decision process did not exit after EOF, killing"
            );
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill decision process");
            }
        }
    }
}

fn log_exit(status: &std::io::Result<std::process::ExitStatus>, message: &'static str) {
    match status {
        Ok(status) if status.success() => tracing::info!(%status, "{message}"),
        Ok(status) => tracing::warn!(%status, "{message}"),
        Err(e) => tracing::warn!(error = %e, "{message}"),
    }
}

#[async_trait]
impl DecisionSinkPort for DecisionPipe {
    async fn deliver(&self, event: &NormalizedEvent) -> Delivery {
        self.send(event).await
    }

    fn status(&self) -> &'static str {
        self.state().as_str()
    }

    async fn close(&self) {
        Self::close(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            DecisionPipe::start("   ", PipeConfig::default()),
            Err(PipeError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let result = DecisionPipe::start("/nonexistent/decision-process --flag", PipeConfig::default());
        assert!(matches!(result, Err(PipeError::Spawn { .. })));
    }

    #[test]
    fn state_labels() {
        assert_eq!(PipeState::Running.as_str(), "running");
        assert_eq!(PipeState::ShuttingDown.as_str(), "shutting_down");
    }
}
