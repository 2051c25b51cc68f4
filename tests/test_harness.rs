//! Test harness for scheduler scenario tests.
//!
//! Provides engine builders over the scripted runner, a sink that records
//! what the engine emits, and checks for the per-job timing invariants.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use procsched::config::{EngineConfig, MlfqConfig, Policy, Regime};
use procsched::metrics::MetricsSink;
use procsched::scheduler::{CompletionRecord, Dispatch, Engine, RunSummary};
use procsched::worker::ScriptedRunner;

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Offline config with a 1 ms poll interval.
pub fn offline(policy: Policy) -> EngineConfig {
    EngineConfig::new(policy, Regime::Offline).with_poll_interval(ms(1))
}

pub fn online(policy: Policy) -> EngineConfig {
    EngineConfig::new(policy, Regime::Online).with_poll_interval(ms(1))
}

pub fn mlfq(quanta_ms: &[u64], boost_ms: u64) -> MlfqConfig {
    MlfqConfig::new(quanta_ms.iter().map(|&q| ms(q)).collect(), ms(boost_ms))
}

pub fn engine(config: EngineConfig, runner: ScriptedRunner) -> Engine<ScriptedRunner> {
    Engine::new(config, runner).expect("valid config")
}

/// Commands in completion order.
pub fn completion_order(summary: &RunSummary) -> Vec<&str> {
    summary
        .completions
        .iter()
        .map(|r| r.command.as_str())
        .collect()
}

/// `(command, start_ms, end_ms)` per dispatch.
pub fn slices(summary: &RunSummary) -> Vec<(&str, u64, u64)> {
    summary
        .dispatches
        .iter()
        .map(|d| {
            (
                d.command.as_str(),
                d.start.as_millis() as u64,
                d.end.as_millis() as u64,
            )
        })
        .collect()
}

pub fn dispatches_of<'a>(summary: &'a RunSummary, command: &str) -> Vec<&'a Dispatch> {
    summary
        .dispatches
        .iter()
        .filter(|d| d.command == command)
        .collect()
}

pub fn record_of<'a>(summary: &'a RunSummary, command: &str) -> &'a CompletionRecord {
    summary
        .completions
        .iter()
        .find(|r| r.command == command)
        .unwrap_or_else(|| panic!("no completion for {}", command))
}

/// Timing invariants that hold for every terminal job.
pub fn assert_invariants(summary: &RunSummary) {
    for r in &summary.completions {
        let m = &r.metrics;
        assert!(r.arrival <= r.start, "{}: start before arrival", r.command);
        assert!(r.start <= r.completion, "{}: completion before start", r.command);
        assert_eq!(m.turnaround, r.completion - r.arrival, "{}", r.command);
        assert_eq!(m.response, r.start - r.arrival, "{}", r.command);
        assert!(m.turnaround >= m.burst, "{}: burst exceeds turnaround", r.command);
        assert_eq!(m.waiting, m.turnaround - m.burst, "{}", r.command);

        let sliced: Duration = dispatches_of(summary, &r.command)
            .iter()
            .filter(|d| d.job == r.job)
            .map(|d| d.duration())
            .sum();
        assert_eq!(m.burst, sliced, "{}: burst is the sum of its slices", r.command);
    }

    // The running slot is never shared
    for pair in summary.dispatches.windows(2) {
        assert!(pair[0].end <= pair[1].start, "overlapping slices {:?}", pair);
    }
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub rows: Vec<CompletionRecord>,
    pub dispatches: Vec<Dispatch>,
    pub finished: bool,
}

/// Sink that keeps everything it receives, readable after the run.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub inner: Rc<RefCell<Recorded>>,
}

impl MetricsSink for RecordingSink {
    fn record(&mut self, record: &CompletionRecord) -> procsched::Result<()> {
        self.inner.borrow_mut().rows.push(record.clone());
        Ok(())
    }

    fn dispatch(&mut self, dispatch: &Dispatch) -> procsched::Result<()> {
        self.inner.borrow_mut().dispatches.push(dispatch.clone());
        Ok(())
    }

    fn finish(&mut self) -> procsched::Result<()> {
        self.inner.borrow_mut().finished = true;
        Ok(())
    }
}
