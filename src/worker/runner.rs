use std::collections::HashMap;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};

/// Opaque reference to a process owned by a [`JobRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(pub u64);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Result of a non-blocking poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Exited { success: bool, code: Option<i32> },
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Lost track of process {handle}: {reason}")]
    Lost { handle: JobHandle, reason: String },
}

impl RunnerError {
    fn lost(handle: JobHandle, reason: impl Into<String>) -> Self {
        RunnerError::Lost {
            handle,
            reason: reason.into(),
        }
    }
}

/// Process control used by the scheduler loop.
///
/// `poll` must never block. A handle that has been reported as exited is
/// never polled again. Suspending a suspended handle and resuming a running
/// one are no-ops; a vanished process surfaces as [`RunnerError::Lost`] on
/// the next `poll` or `resume`.
pub trait JobRunner {
    fn spawn(&mut self, command: &str) -> Result<JobHandle, RunnerError>;

    fn suspend(&mut self, handle: JobHandle) -> Result<(), RunnerError>;

    fn resume(&mut self, handle: JobHandle) -> Result<(), RunnerError>;

    fn poll(&mut self, handle: JobHandle) -> Result<PollStatus, RunnerError>;

    /// OS process id, when there is one.
    fn pid(&self, _handle: JobHandle) -> Option<u32> {
        None
    }
}

/// Runs each job as `/bin/sh -c <command>` with all stdio on the null device.
///
/// Every job gets its own process group, led by the shell. Suspend and resume
/// deliver SIGSTOP and SIGCONT to the whole group, so processes the shell
/// forks stop with it. Groups still alive when the runner is dropped are
/// killed.
#[derive(Debug)]
pub struct ProcessRunner {
    shell: String,
    children: HashMap<JobHandle, Child>,
    next_handle: u64,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::with_shell("/bin/sh")
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            children: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Number of children not yet reaped.
    pub fn live(&self) -> usize {
        self.children.len()
    }

    fn signal(&mut self, handle: JobHandle, signal: libc::c_int) -> Result<(), RunnerError> {
        let child = self
            .children
            .get(&handle)
            .ok_or_else(|| RunnerError::lost(handle, "unknown handle"))?;
        let pid = child
            .id()
            .ok_or_else(|| RunnerError::lost(handle, "process already reaped"))?;

        signal_group(pid, signal).map_err(|e| RunnerError::lost(handle, e.to_string()))
    }
}

/// Send `signal` to the process group led by `pid`.
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions. A negative pid
    // addresses the group the child leads since spawn.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        for (handle, child) in &self.children {
            if let Some(pid) = child.id() {
                if let Err(e) = signal_group(pid, libc::SIGKILL) {
                    tracing::debug!(%handle, pid, error = %e, "Process group already gone");
                }
            }
        }
    }
}

impl JobRunner for ProcessRunner {
    fn spawn(&mut self, command: &str) -> Result<JobHandle, RunnerError> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Spawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let handle = JobHandle(self.next_handle);
        self.next_handle += 1;
        tracing::debug!(%handle, pid = ?child.id(), command, "Process spawned");
        self.children.insert(handle, child);
        Ok(handle)
    }

    fn suspend(&mut self, handle: JobHandle) -> Result<(), RunnerError> {
        self.signal(handle, libc::SIGSTOP)
    }

    fn resume(&mut self, handle: JobHandle) -> Result<(), RunnerError> {
        self.signal(handle, libc::SIGCONT)
    }

    fn poll(&mut self, handle: JobHandle) -> Result<PollStatus, RunnerError> {
        let child = self
            .children
            .get_mut(&handle)
            .ok_or_else(|| RunnerError::lost(handle, "unknown handle"))?;

        match child.try_wait() {
            Ok(None) => Ok(PollStatus::Running),
            Ok(Some(status)) => {
                self.children.remove(&handle);
                Ok(PollStatus::Exited {
                    success: status.success(),
                    code: status.code(),
                })
            }
            Err(e) => {
                self.children.remove(&handle);
                Err(RunnerError::lost(handle, e.to_string()))
            }
        }
    }

    fn pid(&self, handle: JobHandle) -> Option<u32> {
        self.children.get(&handle).and_then(Child::id)
    }
}
