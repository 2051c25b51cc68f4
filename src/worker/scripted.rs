use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::worker::runner::{JobHandle, JobRunner, PollStatus, RunnerError};

/// How a scripted command ends once it has consumed its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedExit {
    Success,
    Failure(i32),
    /// Disappears without an exit status
    Vanish,
    /// Cannot be spawned at all
    Unspawnable,
}

/// Behaviour of one command under [`ScriptedRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Script {
    /// Running time needed before the command exits
    pub work: Duration,
    pub exit: ScriptedExit,
}

impl Script {
    pub fn succeeds(work: Duration) -> Self {
        Self {
            work,
            exit: ScriptedExit::Success,
        }
    }

    pub fn fails(work: Duration, code: i32) -> Self {
        Self {
            work,
            exit: ScriptedExit::Failure(code),
        }
    }

    pub fn vanishes(after: Duration) -> Self {
        Self {
            work: after,
            exit: ScriptedExit::Vanish,
        }
    }

    pub fn unspawnable() -> Self {
        Self {
            work: Duration::ZERO,
            exit: ScriptedExit::Unspawnable,
        }
    }
}

#[derive(Debug)]
struct ScriptedProcess {
    script: Script,
    consumed: Duration,
    resumed_at: Option<Instant>,
}

impl ScriptedProcess {
    fn consumed(&self, now: Instant) -> Duration {
        self.consumed + self.resumed_at.map(|t| now - t).unwrap_or_default()
    }
}

/// Deterministic stand-in for [`ProcessRunner`](super::ProcessRunner).
///
/// A scripted process only makes progress while resumed, measured on the
/// tokio clock, so tests under `start_paused` see exact slice lengths.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: HashMap<String, Script>,
    procs: HashMap<JobHandle, ScriptedProcess>,
    next_handle: u64,
    suspends: u64,
    resumes: u64,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, command: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(command.into(), script);
        self
    }

    /// Shorthand for a command that succeeds after `ms` of running time.
    pub fn with_job(self, command: impl Into<String>, ms: u64) -> Self {
        self.with_script(command, Script::succeeds(Duration::from_millis(ms)))
    }

    pub fn live(&self) -> usize {
        self.procs.len()
    }

    pub fn suspends(&self) -> u64 {
        self.suspends
    }

    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    /// Running time a live process has consumed so far.
    pub fn consumed(&self, handle: JobHandle) -> Option<Duration> {
        self.procs.get(&handle).map(|p| p.consumed(Instant::now()))
    }
}

impl JobRunner for ScriptedRunner {
    fn spawn(&mut self, command: &str) -> Result<JobHandle, RunnerError> {
        let script = match self.scripts.get(command) {
            Some(s) if s.exit != ScriptedExit::Unspawnable => *s,
            Some(_) => {
                return Err(RunnerError::Spawn {
                    command: command.to_string(),
                    reason: "scripted spawn failure".to_string(),
                })
            }
            None => {
                return Err(RunnerError::Spawn {
                    command: command.to_string(),
                    reason: "no script for command".to_string(),
                })
            }
        };

        let handle = JobHandle(self.next_handle);
        self.next_handle += 1;
        self.procs.insert(
            handle,
            ScriptedProcess {
                script,
                consumed: Duration::ZERO,
                resumed_at: Some(Instant::now()),
            },
        );
        Ok(handle)
    }

    fn suspend(&mut self, handle: JobHandle) -> Result<(), RunnerError> {
        let proc = self.procs.get_mut(&handle).ok_or(RunnerError::Lost {
            handle,
            reason: "unknown handle".to_string(),
        })?;
        if let Some(t) = proc.resumed_at.take() {
            proc.consumed += Instant::now() - t;
        }
        self.suspends += 1;
        Ok(())
    }

    fn resume(&mut self, handle: JobHandle) -> Result<(), RunnerError> {
        let proc = self.procs.get_mut(&handle).ok_or(RunnerError::Lost {
            handle,
            reason: "unknown handle".to_string(),
        })?;
        if proc.resumed_at.is_none() {
            proc.resumed_at = Some(Instant::now());
        }
        self.resumes += 1;
        Ok(())
    }

    fn poll(&mut self, handle: JobHandle) -> Result<PollStatus, RunnerError> {
        let proc = self.procs.get(&handle).ok_or(RunnerError::Lost {
            handle,
            reason: "unknown handle".to_string(),
        })?;
        if proc.consumed(Instant::now()) < proc.script.work {
            return Ok(PollStatus::Running);
        }

        let exit = proc.script.exit;
        self.procs.remove(&handle);
        match exit {
            ScriptedExit::Success => Ok(PollStatus::Exited {
                success: true,
                code: Some(0),
            }),
            ScriptedExit::Failure(code) => Ok(PollStatus::Exited {
                success: false,
                code: Some(code),
            }),
            ScriptedExit::Vanish | ScriptedExit::Unspawnable => Err(RunnerError::Lost {
                handle,
                reason: "process vanished".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn progresses_only_while_resumed() {
        let mut runner = ScriptedRunner::new().with_job("work", 100);
        let h = runner.spawn("work").unwrap();

        tokio::time::sleep(ms(60)).await;
        runner.suspend(h).unwrap();
        tokio::time::sleep(ms(500)).await;
        assert_eq!(runner.poll(h).unwrap(), PollStatus::Running);
        assert_eq!(runner.consumed(h), Some(ms(60)));

        runner.resume(h).unwrap();
        tokio::time::sleep(ms(40)).await;
        assert_eq!(
            runner.poll(h).unwrap(),
            PollStatus::Exited {
                success: true,
                code: Some(0)
            }
        );
        assert_eq!(runner.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_and_resume_are_idempotent() {
        let mut runner = ScriptedRunner::new().with_job("work", 100);
        let h = runner.spawn("work").unwrap();

        runner.resume(h).unwrap();
        tokio::time::sleep(ms(30)).await;
        runner.suspend(h).unwrap();
        runner.suspend(h).unwrap();
        assert_eq!(runner.consumed(h), Some(ms(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_modes() {
        let mut runner = ScriptedRunner::new()
            .with_script("bad", Script::fails(ms(10), 2))
            .with_script("gone", Script::vanishes(ms(10)))
            .with_script("nope", Script::unspawnable());

        assert!(matches!(runner.spawn("nope"), Err(RunnerError::Spawn { .. })));
        assert!(matches!(runner.spawn("missing"), Err(RunnerError::Spawn { .. })));

        let bad = runner.spawn("bad").unwrap();
        let gone = runner.spawn("gone").unwrap();
        tokio::time::sleep(ms(10)).await;

        assert_eq!(
            runner.poll(bad).unwrap(),
            PollStatus::Exited {
                success: false,
                code: Some(2)
            }
        );
        assert!(matches!(runner.poll(gone), Err(RunnerError::Lost { .. })));
        assert!(matches!(runner.resume(gone), Err(RunnerError::Lost { .. })));
    }
}
