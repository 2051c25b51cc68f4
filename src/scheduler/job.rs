use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::worker::JobHandle;

/// Index of a job in the ledger, assigned in admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    New,
    Ready,
    Running,
    Finished,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Error)
    }

    /// Legal edges of the job lifecycle. Terminal states are absorbing.
    pub fn can_move_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::New, JobState::Ready)
                | (JobState::Ready, JobState::Running)
                | (JobState::Running, JobState::Ready)
                | (JobState::Running, JobState::Finished)
                | (JobState::Running, JobState::Error)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::New => write!(f, "new"),
            JobState::Ready => write!(f, "ready"),
            JobState::Running => write!(f, "running"),
            JobState::Finished => write!(f, "finished"),
            JobState::Error => write!(f, "error"),
        }
    }
}

/// How a job left the running slot for the last time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Exited with status zero
    Finished,
    /// Exited non-zero, failed to spawn, or vanished
    Error,
}

impl Outcome {
    pub fn state(&self) -> JobState {
        match self {
            Outcome::Finished => JobState::Finished,
            Outcome::Error => JobState::Error,
        }
    }
}

/// Per-job record. All timestamps are offsets from the engine epoch.
///
/// Turnaround, waiting and response times are derived from these fields on
/// demand; see [`JobMetrics`].
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    pub handle: Option<JobHandle>,
    pub pid: Option<u32>,
    pub arrival_time: Duration,
    pub start_time: Option<Duration>,
    pub completion_time: Option<Duration>,
    pub burst_time: Duration,
    pub tier: usize,
    /// Known burst time supplied at admission, overriding the estimator
    pub burst_hint: Option<Duration>,
    pub error: bool,
}

impl Job {
    pub fn new(id: JobId, command: String, arrival_time: Duration) -> Self {
        Self {
            id,
            command,
            state: JobState::New,
            handle: None,
            pid: None,
            arrival_time,
            start_time: None,
            completion_time: None,
            burst_time: Duration::ZERO,
            tier: 0,
            burst_hint: None,
            error: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Remaining time against an estimated total burst, floored at zero.
    pub fn remaining(&self, estimate: Duration) -> Duration {
        estimate.saturating_sub(self.burst_time)
    }

    /// Metrics for a terminal job, `None` while it is still pending.
    pub fn metrics(&self) -> Option<JobMetrics> {
        let start = self.start_time?;
        let completion = self.completion_time?;
        Some(JobMetrics::from_times(
            self.arrival_time,
            start,
            completion,
            self.burst_time,
        ))
    }
}

/// Scheduling metrics of a finished job.
///
/// `waiting = turnaround - burst`: time admitted but not occupying the
/// running slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub burst: Duration,
    pub turnaround: Duration,
    pub waiting: Duration,
    pub response: Duration,
}

impl JobMetrics {
    pub fn from_times(
        arrival: Duration,
        start: Duration,
        completion: Duration,
        burst: Duration,
    ) -> Self {
        let turnaround = completion.saturating_sub(arrival);
        Self {
            burst,
            turnaround,
            waiting: turnaround.saturating_sub(burst),
            response: start.saturating_sub(arrival),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn job_creation() {
        let job = Job::new(JobId(3), "echo hello".to_string(), ms(5));
        assert_eq!(job.state, JobState::New);
        assert_eq!(job.command, "echo hello");
        assert!(job.handle.is_none());
        assert!(job.start_time.is_none());
        assert!(job.metrics().is_none());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for next in [
            JobState::New,
            JobState::Ready,
            JobState::Running,
            JobState::Finished,
            JobState::Error,
        ] {
            assert!(!JobState::Finished.can_move_to(next));
            assert!(!JobState::Error.can_move_to(next));
        }
        assert!(!JobState::Ready.can_move_to(JobState::Finished));
        assert!(JobState::New.can_move_to(JobState::Ready));
        assert!(!JobState::New.can_move_to(JobState::Running));
        assert!(JobState::Running.can_move_to(JobState::Ready));
    }

    #[test]
    fn metrics_derive_from_timestamps() {
        let mut job = Job::new(JobId(0), "true".to_string(), ms(10));
        job.start_time = Some(ms(40));
        job.completion_time = Some(ms(200));
        job.burst_time = ms(120);

        let m = job.metrics().unwrap();
        assert_eq!(m.turnaround, ms(190));
        assert_eq!(m.waiting, ms(70));
        assert_eq!(m.response, ms(30));
        assert_eq!(m.burst, ms(120));
    }

    #[test]
    fn remaining_saturates() {
        let mut job = Job::new(JobId(0), "true".to_string(), ms(0));
        job.burst_time = ms(80);
        assert_eq!(job.remaining(ms(100)), ms(20));
        assert_eq!(job.remaining(ms(50)), Duration::ZERO);
    }
}
