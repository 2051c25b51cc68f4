//! Scheduling core.
//!
//! - [`job`]: per-job record and lifecycle (NEW -> READY <-> RUNNING -> FINISHED | ERROR)
//! - [`queue`]: ready queue set, one FIFO per priority tier
//! - [`ledger`]: owner of every job record, frozen completion metrics
//! - [`estimator`]: burst-time history keyed by command text
//! - [`engine`]: the scheduler loop

pub mod engine;
pub mod estimator;
pub mod job;
pub mod ledger;
pub mod queue;

pub use engine::{Dispatch, Engine, RunSummary, SliceEnd};
pub use estimator::{HistoricalEstimator, HistoricalRecord};
pub use job::{Job, JobId, JobMetrics, JobState, Outcome};
pub use ledger::{CompletionRecord, JobLedger};
pub use queue::ReadyQueues;
