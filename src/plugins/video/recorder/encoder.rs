//! External encoder process: command line, spawn, graceful interrupt and
//! forced termination.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeZone};

use super::super::errors::EncoderError;
use crate::settings::{RecordingSettings, OUTPUT_PLACEHOLDER};

/// How long to wait for a killed encoder to be reaped.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// `<data_dir>/<prefix><RFC3339 timestamp>.<extension>`
pub fn output_path_for<Tz: TimeZone>(
    data_dir: &Path,
    prefix: &str,
    extension: &str,
    at: &DateTime<Tz>,
) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    let stamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
    data_dir.join(format!("{}{}.{}", prefix, stamp, extension))
}

/// Program and arguments for one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EncoderCommand {
    /// Builds the command from settings, substituting the output path for
    /// every `{output}` placeholder.
    pub fn from_settings(settings: &RecordingSettings, output_path: &Path) -> Self {
        let output = output_path.to_string_lossy();
        let args = settings
            .encoder_args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect();

        Self {
            program: settings.encoder_program.clone(),
            args,
        }
    }
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited on its own before the deadline.
    Exited(ExitStatus),
    /// Still running at the deadline; killed and reaped.
    Killed,
}

impl ShutdownOutcome {
    pub fn forced(&self) -> bool {
        matches!(self, ShutdownOutcome::Killed)
    }
}

/// Sends `signal` (e.g. `-INT`) to `pid` through the system `kill`.
#[cfg(unix)]
fn send_signal(pid: u32, signal: &str) {
    if let Err(e) = Command::new("kill")
        .args([signal, &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        tracing::warn!(target: "video", "[ENCODER] Failed to send {} to PID {}: {}", signal, pid, e);
    }
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    if let Err(e) = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        tracing::warn!(target: "video", "[ENCODER] Failed to kill PID {}: {}", pid, e);
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    send_signal(pid, "-KILL");
}

/// Running encoder subprocess.
///
/// Dropping a handle that was never shut down kills and reaps the process,
/// so an abandoned session cannot leave a zombie behind. The partial output
/// file is kept.
pub struct EncoderProcess {
    child: Option<Child>,
    pid: u32,
}

impl EncoderProcess {
    /// Spawns the encoder with a piped stdin. Stderr lines are forwarded to
    /// debug logs.
    pub fn spawn(command: &EncoderCommand) -> Result<Self, EncoderError> {
        tracing::info!(target: "video", "[ENCODER] Starting {} {:?}", command.program, command.args);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncoderError::SpawnFailed(e.to_string()))?;

        let pid = child.id();

        // Detached: ends when the last holder of the pipe exits.
        if let Some(stderr) = child.stderr.take() {
            let forwarder = std::thread::Builder::new()
                .name("encoder-stderr".to_string())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        if !line.trim().is_empty() {
                            tracing::debug!(target: "video", "[ENCODER] {}", line.trim());
                        }
                    }
                });
            if let Err(e) = forwarder {
                tracing::warn!(target: "video", "[ENCODER] Could not forward stderr: {}", e);
            }
        }

        tracing::info!(target: "video", "[ENCODER] Started with PID {}", pid);

        Ok(Self {
            child: Some(child),
            pid,
        })
    }

    /// Takes the write end of the encoder's input pipe. Only the first call
    /// returns it.
    pub fn take_input(&mut self) -> Result<ChildStdin, EncoderError> {
        self.child
            .as_mut()
            .and_then(|child| child.stdin.take())
            .ok_or(EncoderError::PipeUnavailable)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Asks the encoder to finalize its output and exit (SIGINT).
    pub fn interrupt(&self) {
        tracing::info!(target: "video", "[ENCODER] Interrupting PID {}", self.pid);

        #[cfg(unix)]
        send_signal(self.pid, "-INT");
    }

    /// Waits for the encoder to exit until `deadline`. If it is still running
    /// then, it is killed. Either way the process has been reaped on return.
    pub async fn shutdown(
        mut self,
        deadline: tokio::time::Instant,
    ) -> Result<ShutdownOutcome, EncoderError> {
        let Some(mut child) = self.child.take() else {
            return Err(EncoderError::WaitFailed("process already released".to_string()));
        };
        let pid = self.pid;

        // The process stays unreaped until this wait returns, so its PID
        // cannot be reused before the kill below.
        let mut exit = tokio::task::spawn_blocking(move || child.wait());

        match tokio::time::timeout_at(deadline, &mut exit).await {
            Ok(joined) => {
                let status = exit_status(joined)?;
                tracing::info!(target: "video", "[ENCODER] PID {} exited: {}", pid, status);
                Ok(ShutdownOutcome::Exited(status))
            }
            Err(_) => {
                tracing::warn!(target: "video",
                    "[ENCODER] Failed to gracefully interrupt video converter (PID {}), killing it",
                    pid);
                force_kill(pid);

                match tokio::time::timeout(KILL_REAP_TIMEOUT, exit).await {
                    Ok(joined) => {
                        let status = exit_status(joined)?;
                        tracing::info!(target: "video", "[ENCODER] PID {} killed: {}", pid, status);
                        Ok(ShutdownOutcome::Killed)
                    }
                    Err(_) => Err(EncoderError::WaitFailed(format!(
                        "PID {} still running after kill",
                        pid
                    ))),
                }
            }
        }
    }
}

fn exit_status(
    joined: Result<std::io::Result<ExitStatus>, tokio::task::JoinError>,
) -> Result<ExitStatus, EncoderError> {
    joined
        .map_err(|e| EncoderError::WaitFailed(e.to_string()))?
        .map_err(|e| EncoderError::WaitFailed(e.to_string()))
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        tracing::warn!(target: "video", "[ENCODER] Handle dropped while running, killing PID {}", self.pid);
        if let Err(e) = child.kill() {
            tracing::warn!(target: "video", "[ENCODER] Failed to kill encoder: {}", e);
        }

        // Reap off the caller's thread, which may be a runtime worker.
        let reaper = std::thread::Builder::new()
            .name("encoder-reaper".to_string())
            .spawn(move || {
                let _ = child.wait();
            });
        if let Err(e) = reaper {
            tracing::warn!(target: "video", "[ENCODER] Could not reap PID {}: {}", self.pid, e);
        }
    }
}

impl std::fmt::Debug for EncoderProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderProcess")
            .field("pid", &self.pid)
            .field("running", &self.child.is_some())
            .finish()
    }
}
