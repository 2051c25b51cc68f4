//! Process control for scheduled jobs.
//!
//! The scheduler loop never touches OS processes directly. It goes through
//! the four primitives of [`JobRunner`]:
//! - **spawn**: create a process for a command
//! - **suspend** / **resume**: stop and continue it between slices
//! - **poll**: non-blocking check for exit
//!
//! # Components
//!
//! - [`ProcessRunner`]: real children via `sh -c`, SIGSTOP/SIGCONT for slicing
//! - [`ScriptedRunner`]: deterministic double whose processes consume time
//!   on the tokio clock, for scenario tests

pub mod runner;
pub mod scripted;

pub use runner::{JobHandle, JobRunner, PollStatus, ProcessRunner, RunnerError};
pub use scripted::{Script, ScriptedExit, ScriptedRunner};
