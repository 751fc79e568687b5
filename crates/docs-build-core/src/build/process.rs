//! Running one build-tool phase as a child process.
//!
//! Output lines are streamed as `BuildProgress` events. The outcome is
//! classified from the exit status: a kill (signal or cancel request) is
//! `Canceled`, a phase success code is `Succeeded`, anything else `Failed`.
//! Spawn and IO errors become progress lines and a `Failed` outcome; they
//! never escape as errors.

use std::process::ExitStatus;
use std::sync::Mutex;
use std::time::Duration;

use docs_build_domain::{DocfxExecutionResult, DocsError, DocsEvent, DocsResult, EventStream};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::command::CommandLine;

/// How long output is still forwarded once the tool has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Which tool phase is running; decides the exit codes counted as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Restore,
    /// Exit code 1 means "completed with warnings".
    Build,
}

impl BuildPhase {
    pub fn success_codes(&self) -> &'static [i32] {
        match self {
            BuildPhase::Restore => &[0],
            BuildPhase::Build => &[0, 1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub result: DocfxExecutionResult,
    pub exit_code: Option<i32>,
}

pub fn classify_exit(phase: BuildPhase, exit_code: Option<i32>, killed: bool) -> DocfxExecutionResult {
    if killed {
        return DocfxExecutionResult::Canceled;
    }
    match exit_code {
        Some(code) if phase.success_codes().contains(&code) => DocfxExecutionResult::Succeeded,
        _ => DocfxExecutionResult::Failed,
    }
}

#[cfg(unix)]
fn killed_by_sigkill(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(nix::sys::signal::Signal::SIGKILL as i32)
}

#[cfg(not(unix))]
fn killed_by_sigkill(_status: &ExitStatus) -> bool {
    false
}

#[derive(Debug, Default)]
struct TrackerState {
    /// A build session is in progress (between `begin` and `finish`).
    active: bool,
    cancel_requested: bool,
    pid: Option<u32>,
}

/// The build session and the child process it is currently running.
///
/// A cancel during a session sticks until [`ProcessTracker::finish`], so a
/// request that lands between phases or before the first spawn still stops
/// the build.
#[derive(Debug, Default)]
pub struct ProcessTracker {
    state: Mutex<TrackerState>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a build session; clears any earlier cancel request.
    pub fn begin(&self) {
        *self.lock() = TrackerState {
            active: true,
            ..TrackerState::default()
        };
    }

    pub fn finish(&self) {
        *self.lock() = TrackerState::default();
    }

    pub fn current_pid(&self) -> Option<u32> {
        self.lock().pid
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    /// Cancel the session and kill the running process tree. Returns
    /// `false` when no session is in progress.
    pub async fn cancel(&self) -> DocsResult<bool> {
        let pid = {
            let mut state = self.lock();
            if !state.active {
                return Ok(false);
            }
            state.cancel_requested = true;
            state.pid
        };
        if let Some(pid) = pid {
            kill_process_tree(pid).await?;
        }
        Ok(true)
    }

    /// Returns whether the session was canceled before the process could
    /// be tracked.
    fn track(&self, pid: u32) -> bool {
        let mut state = self.lock();
        state.pid = Some(pid);
        state.cancel_requested
    }

    fn untrack(&self, pid: u32) {
        let mut state = self.lock();
        if state.pid == Some(pid) {
            state.pid = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn forward_lines<R>(reader: R, events: EventStream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => events.post(DocsEvent::BuildProgress { message: line }),
                Ok(None) => break,
                Err(e) => {
                    events.post(DocsEvent::BuildProgress {
                        message: format!("failed to read build output: {e}"),
                    });
                    break;
                }
            }
        }
    })
}

/// Run `command` to completion, streaming its output.
pub async fn run_phase(
    command: &CommandLine,
    phase: BuildPhase,
    events: &EventStream,
    tracker: &ProcessTracker,
) -> ProcessOutcome {
    let failed = ProcessOutcome {
        result: DocfxExecutionResult::Failed,
        exit_code: None,
    };

    if tracker.is_cancel_requested() {
        debug!(?phase, "build canceled before the process started");
        return ProcessOutcome {
            result: DocfxExecutionResult::Canceled,
            exit_code: None,
        };
    }

    events.post(DocsEvent::BuildProgress {
        message: format!("& {}", command.display()),
    });
    let mut child = match command.to_command().spawn() {
        Ok(child) => child,
        Err(e) => {
            events.post(DocsEvent::BuildProgress {
                message: format!("failed to start {}: {e}", command.program.display()),
            });
            return failed;
        }
    };
    let Some(pid) = child.id() else {
        events.post(DocsEvent::BuildProgress {
            message: "build process exited before it could be tracked".to_string(),
        });
        return failed;
    };
    debug!(pid, ?phase, "build process started");
    if tracker.track(pid) {
        if let Err(e) = kill_process_tree(pid).await {
            warn!(pid, error = %e, "failed to kill the canceled build process");
        }
    }

    let mut readers: Vec<_> = [
        child.stdout.take().map(|out| forward_lines(out, events.clone())),
        child.stderr.take().map(|err| forward_lines(err, events.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let status = child.wait().await;
    tracker.untrack(pid);
    // A detached helper may inherit the pipes and keep them open long after
    // the tool exits.
    let drained = tokio::time::timeout(
        OUTPUT_DRAIN_TIMEOUT,
        futures::future::join_all(readers.iter_mut()),
    )
    .await;
    if drained.is_err() {
        debug!(pid, "build output still open after exit; detaching");
        for reader in &readers {
            reader.abort();
        }
    }

    match status {
        Ok(status) => {
            let killed = killed_by_sigkill(&status) || tracker.is_cancel_requested();
            let exit_code = status.code();
            let result = classify_exit(phase, exit_code, killed);
            debug!(pid, ?exit_code, killed, %result, "build process exited");
            ProcessOutcome { result, exit_code }
        }
        Err(e) => {
            events.post(DocsEvent::BuildProgress {
                message: format!("failed to wait for the build process: {e}"),
            });
            failed
        }
    }
}

/// Kill `pid` and every process descending from it.
#[cfg(unix)]
pub async fn kill_process_tree(pid: u32) -> DocsResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Descendants first, deepest last discovered first, so none is
    // re-parented before it is signalled.
    let mut victims = descendants(pid).await;
    victims.reverse();
    victims.push(pid);

    for victim in victims {
        let Ok(raw) = i32::try_from(victim) else {
            continue;
        };
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) if victim == pid => {
                return Err(DocsError::CancelBuildFailed {
                    message: format!("failed to kill process {pid}: {e}"),
                })
            }
            Err(e) => warn!(pid = victim, error = %e, "failed to kill child process"),
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn descendants(root: u32) -> Vec<u32> {
    let output = match tokio::process::Command::new("ps")
        .args(["-A", "-o", "pid=", "-o", "ppid="])
        .output()
        .await
    {
        Ok(output) if output.status.success() => output,
        Ok(_) | Err(_) => {
            warn!("ps unavailable; killing the build process only");
            return Vec::new();
        }
    };
    let pairs = parse_process_table(&String::from_utf8_lossy(&output.stdout));

    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for &(pid, ppid) in &pairs {
            if ppid == parent && pid != root && !found.contains(&pid) {
                found.push(pid);
                frontier.push(pid);
            }
        }
    }
    found
}

/// `(pid, ppid)` pairs from `ps -o pid= -o ppid=` output.
fn parse_process_table(table: &str) -> Vec<(u32, u32)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

/// Kill `pid` and every process descending from it.
#[cfg(windows)]
pub async fn kill_process_tree(pid: u32) -> DocsResult<()> {
    let output = tokio::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .output()
        .await
        .map_err(|e| DocsError::CancelBuildFailed {
            message: format!("failed to run taskkill: {e}"),
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(DocsError::CancelBuildFailed {
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
