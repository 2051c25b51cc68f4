use thiserror::Error;

use crate::scheduler::{JobId, JobState};

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0} already occupies a ready queue slot")]
    AlreadyQueued(JobId),

    #[error("Online scheduling requires an arrival feed")]
    MissingFeed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedError>;
