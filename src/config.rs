use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};

/// Burst time assumed for a command that has never completed successfully.
pub const DEFAULT_ESTIMATE: Duration = Duration::from_millis(1000);

/// Scheduling policy driving job selection and slice length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Policy {
    /// First-come-first-served, run to completion
    Fcfs,
    /// Single FIFO, one quantum per dispatch
    #[value(alias = "rr")]
    RoundRobin,
    /// Multi-level feedback queue with periodic priority boost
    Mlfq,
    /// Shortest job first, run to completion
    Sjf,
    /// Shortest remaining time first, re-evaluated at preemption points
    Srtf,
}

impl Policy {
    /// Short upper-case label used in result file names.
    pub fn label(&self) -> &'static str {
        match self {
            Policy::Fcfs => "FCFS",
            Policy::RoundRobin => "RR",
            Policy::Mlfq => "MLFQ",
            Policy::Sjf => "SJF",
            Policy::Srtf => "SRTF",
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Fcfs => write!(f, "fcfs"),
            Policy::RoundRobin => write!(f, "round-robin"),
            Policy::Mlfq => write!(f, "mlfq"),
            Policy::Sjf => write!(f, "sjf"),
            Policy::Srtf => write!(f, "srtf"),
        }
    }
}

/// How jobs are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    /// Full job list known before the loop starts
    Offline,
    /// Jobs arrive on a live feed while the loop runs
    Online,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Offline => write!(f, "offline"),
            Regime::Online => write!(f, "online"),
        }
    }
}

/// When shortest-remaining-time-first reconsiders the running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SrtfPreemption {
    /// Only at quantum expiry or natural completion
    #[default]
    Boundary,
    /// Also as soon as a shorter job is admitted
    OnArrival,
}

/// Tier layout for the multi-level feedback queue.
///
/// Tier 0 has the shortest quantum and the highest dispatch priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlfqConfig {
    /// Quantum per tier, highest priority first
    pub quanta: Vec<Duration>,
    /// Interval after which every pending job returns to tier 0
    pub boost_interval: Duration,
}

impl Default for MlfqConfig {
    fn default() -> Self {
        Self {
            quanta: vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ],
            boost_interval: Duration::from_millis(1000),
        }
    }
}

impl MlfqConfig {
    pub fn new(quanta: Vec<Duration>, boost_interval: Duration) -> Self {
        Self {
            quanta,
            boost_interval,
        }
    }

    pub fn tiers(&self) -> usize {
        self.quanta.len()
    }

    pub fn lowest_tier(&self) -> usize {
        self.quanta.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: Policy,
    pub regime: Regime,
    /// Slice bound for round robin and SRTF
    pub quantum: Duration,
    pub mlfq: MlfqConfig,
    pub srtf_preemption: SrtfPreemption,
    /// Cadence of the non-blocking poll while a job holds the running slot
    pub poll_interval: Duration,
    /// Estimator fallback for unseen commands
    pub default_estimate: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: Policy::Fcfs,
            regime: Regime::Offline,
            quantum: Duration::from_millis(100),
            mlfq: MlfqConfig::default(),
            srtf_preemption: SrtfPreemption::Boundary,
            poll_interval: Duration::from_millis(1),
            default_estimate: DEFAULT_ESTIMATE,
        }
    }
}

impl EngineConfig {
    pub fn new(policy: Policy, regime: Regime) -> Self {
        Self {
            policy,
            regime,
            ..Default::default()
        }
    }

    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_mlfq(mut self, mlfq: MlfqConfig) -> Self {
        self.mlfq = mlfq;
        self
    }

    pub fn with_srtf_preemption(mut self, preemption: SrtfPreemption) -> Self {
        self.srtf_preemption = preemption;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_estimate(mut self, estimate: Duration) -> Self {
        self.default_estimate = estimate;
        self
    }

    /// Number of ready-queue tiers the policy needs.
    pub fn tiers(&self) -> usize {
        match self.policy {
            Policy::Mlfq => self.mlfq.tiers(),
            _ => 1,
        }
    }

    /// Check every parameter the loop relies on.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(SchedError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }

        match self.policy {
            Policy::RoundRobin | Policy::Srtf if self.quantum.is_zero() => {
                return Err(SchedError::InvalidConfig(format!(
                    "{} requires a non-zero quantum",
                    self.policy
                )));
            }
            Policy::Mlfq => self.validate_mlfq()?,
            _ => {}
        }

        Ok(())
    }

    fn validate_mlfq(&self) -> Result<()> {
        let quanta = &self.mlfq.quanta;
        if quanta.is_empty() {
            return Err(SchedError::InvalidConfig(
                "mlfq needs at least one tier".to_string(),
            ));
        }
        if quanta.iter().any(|q| q.is_zero()) {
            return Err(SchedError::InvalidConfig(
                "mlfq tier quanta must be non-zero".to_string(),
            ));
        }
        if quanta.windows(2).any(|w| w[0] > w[1]) {
            return Err(SchedError::InvalidConfig(
                "mlfq tier quanta must not shrink toward lower tiers".to_string(),
            ));
        }
        if self.mlfq.boost_interval.is_zero() {
            return Err(SchedError::InvalidConfig(
                "mlfq boost interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
