/// Process-control primitives shared by the supervisor and the bootstrapper:
/// kill-by-PID, kill-by-name, and detached spawn with output redirected to a
/// log file.
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use sysinfo::{ProcessesToUpdate, System};

/// Errors raised by the spawn primitive. Kill failures are never surfaced as
/// errors — a vanished PID or a permission refusal is logged and ignored, and
/// the caller proceeds to respawn regardless.
#[derive(Debug)]
pub enum ProcessError {
    /// Failed to create or open the redirect target.
    LogFile {
        path: PathBuf,
        source: io::Error,
    },
    /// Failed to spawn the worker binary.
    Spawn {
        command: String,
        source: io::Error,
    },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::LogFile { path, source } => {
                write!(f, "failed to open log file {}: {}", path.display(), source)
            }
            ProcessError::Spawn { command, source } => {
                write!(f, "failed to spawn {}: {}", command, source)
            }
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::LogFile { source, .. } => Some(source),
            ProcessError::Spawn { source, .. } => Some(source),
        }
    }
}

/// OS process primitives, behind a trait so the supervisor and bootstrap
/// loops can be exercised in tests without touching the process table.
pub trait ProcessControl {
    /// Force-kill every process whose command line (or name) contains
    /// `pattern`. Returns how many processes were killed. Finding nothing is
    /// not an error.
    fn kill_matching(&self, pattern: &str) -> usize;

    /// Force-kill one process by PID. A no-op if the PID is already gone.
    fn kill_pid(&self, pid: u32);

    /// Spawn `program` with `args`, stdout and stderr redirected into
    /// `log_path` (truncated), detached from the caller. Returns the child
    /// PID. The child is never waited on.
    fn spawn_redirected(
        &self,
        program: &str,
        args: &[String],
        log_path: &Path,
    ) -> Result<u32, ProcessError>;
}

/// The real implementation: sysinfo for the process-table scan, SIGKILL via
/// nix, std::process for the detached spawn.
pub struct OsProcessControl;

impl OsProcessControl {
    fn sigkill(pid: u32) -> bool {
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                tracing::info!(pid, "sent SIGKILL");
                true
            }
            // Already exited, or not ours to kill. Either way the respawn
            // that follows is unaffected.
            Err(err) => {
                tracing::warn!(pid, %err, "kill failed, ignoring");
                false
            }
        }
    }
}

impl ProcessControl for OsProcessControl {
    fn kill_matching(&self, pattern: &str) -> usize {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let own_pid = std::process::id();
        let mut killed = 0;

        for (pid, process) in system.processes() {
            // The supervisor's own command line contains the target name.
            if pid.as_u32() == own_pid {
                continue;
            }
            let cmdline = process
                .cmd()
                .iter()
                .map(|part| part.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            if !cmdline.contains(pattern) && !process.name().to_string_lossy().contains(pattern) {
                continue;
            }
            tracing::info!(pid = pid.as_u32(), %cmdline, "killing matching process");
            if Self::sigkill(pid.as_u32()) {
                killed += 1;
            }
        }

        if killed == 0 {
            tracing::debug!(pattern, "no matching process found");
        }
        killed
    }

    fn kill_pid(&self, pid: u32) {
        Self::sigkill(pid);
    }

    fn spawn_redirected(
        &self,
        program: &str,
        args: &[String],
        log_path: &Path,
    ) -> Result<u32, ProcessError> {
        let log = std::fs::File::create(log_path).map_err(|e| ProcessError::LogFile {
            path: log_path.to_path_buf(),
            source: e,
        })?;
        // We need a second handle for stderr since File doesn't impl Clone
        let log_stderr = log.try_clone().map_err(|e| ProcessError::LogFile {
            path: log_path.to_path_buf(),
            source: e,
        })?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_stderr))
            .process_group(0) // Own process group: outlives us, and a group kill stays scoped
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                command: program.to_string(),
                source: e,
            })?;

        let pid = child.id();
        tracing::info!(pid, command = program, log = %log_path.display(), "spawned detached");
        Ok(pid)
    }
}
