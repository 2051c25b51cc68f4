use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SchedError};
use crate::scheduler::job::{Job, JobId, JobMetrics, JobState, Outcome};
use crate::worker::JobHandle;

/// Frozen result of a job that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRecord {
    pub job: JobId,
    pub command: String,
    pub outcome: Outcome,
    pub arrival: Duration,
    pub start: Duration,
    pub completion: Duration,
    pub metrics: JobMetrics,
}

impl CompletionRecord {
    /// True only for a zero-exit completion.
    pub fn finished(&self) -> bool {
        self.outcome == Outcome::Finished
    }

    pub fn error(&self) -> bool {
        self.outcome == Outcome::Error
    }
}

/// Authoritative store of every job record.
///
/// All lifecycle edges go through here so that start and completion times
/// are written exactly once and burst time only grows.
#[derive(Debug, Default)]
pub struct JobLedger {
    jobs: Vec<Job>,
    completions: Vec<CompletionRecord>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job in NEW and move it straight to READY.
    pub fn admit(
        &mut self,
        command: String,
        arrival: Duration,
        tier: usize,
        burst_hint: Option<Duration>,
    ) -> Result<JobId> {
        let id = JobId(self.jobs.len());
        let mut job = Job::new(id, command, arrival);
        job.tier = tier;
        job.burst_hint = burst_hint;
        self.jobs.push(job);
        self.transition(id, JobState::Ready)?;
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Result<&Job> {
        self.jobs.get(id.0).ok_or(SchedError::JobNotFound(id))
    }

    fn get_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs.get_mut(id.0).ok_or(SchedError::JobNotFound(id))
    }

    fn transition(&mut self, id: JobId, to: JobState) -> Result<&mut Job> {
        let job = self.get_mut(id)?;
        if !job.state.can_move_to(to) {
            return Err(SchedError::InvalidTransition {
                job: id,
                from: job.state,
                to,
            });
        }
        job.state = to;
        Ok(job)
    }

    /// READY -> RUNNING. Records the start time on the first dispatch only.
    /// Returns true when this was the first dispatch.
    pub fn begin_dispatch(&mut self, id: JobId, now: Duration) -> Result<bool> {
        let job = self.transition(id, JobState::Running)?;
        if job.start_time.is_none() {
            job.start_time = Some(now);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn attach_process(&mut self, id: JobId, handle: JobHandle, pid: Option<u32>) -> Result<()> {
        let job = self.get_mut(id)?;
        job.handle = Some(handle);
        job.pid = pid;
        Ok(())
    }

    /// Add one slice of occupancy to a running job.
    pub fn accrue(&mut self, id: JobId, slice: Duration) -> Result<()> {
        let job = self.get_mut(id)?;
        if job.state != JobState::Running {
            return Err(SchedError::InvalidTransition {
                job: id,
                from: job.state,
                to: JobState::Running,
            });
        }
        job.burst_time = job.burst_time.saturating_add(slice);
        Ok(())
    }

    /// RUNNING -> READY at `tier`.
    pub fn requeue(&mut self, id: JobId, tier: usize) -> Result<()> {
        let job = self.transition(id, JobState::Ready)?;
        job.tier = tier;
        Ok(())
    }

    /// Re-tier a READY job without a lifecycle change (boost).
    pub fn set_tier(&mut self, id: JobId, tier: usize) -> Result<()> {
        self.get_mut(id)?.tier = tier;
        Ok(())
    }

    /// RUNNING -> FINISHED | ERROR. Freezes metrics and appends the
    /// completion event, returning a copy of it.
    pub fn retire(&mut self, id: JobId, now: Duration, outcome: Outcome) -> Result<CompletionRecord> {
        let job = self.transition(id, outcome.state())?;
        let start = job.start_time.unwrap_or(now);
        let completion = now.max(start);
        job.start_time = Some(start);
        job.completion_time = Some(completion);
        job.error = outcome == Outcome::Error;
        job.handle = None;

        let record = CompletionRecord {
            job: id,
            command: job.command.clone(),
            outcome,
            arrival: job.arrival_time,
            start,
            completion,
            metrics: JobMetrics::from_times(job.arrival_time, start, completion, job.burst_time),
        };
        self.completions.push(record.clone());
        Ok(record)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Completion events in the order jobs became terminal.
    pub fn completions(&self) -> &[CompletionRecord] {
        &self.completions
    }

    pub fn pending(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|j| !j.is_terminal())
    }

    pub fn all_terminal(&self) -> bool {
        self.jobs.iter().all(Job::is_terminal)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
