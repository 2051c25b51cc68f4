pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::{EngineConfig, MlfqConfig, Policy, Regime, SrtfPreemption};
pub use error::{Result, SchedError};
pub use scheduler::{Engine, JobId, RunSummary};
