use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, Policy, Regime, SrtfPreemption};
use crate::error::{Result, SchedError};
use crate::feed::{ArrivalFeed, FeedEvent};
use crate::metrics::MetricsSink;
use crate::scheduler::estimator::HistoricalEstimator;
use crate::scheduler::job::{Job, JobId, Outcome};
use crate::scheduler::ledger::{CompletionRecord, JobLedger};
use crate::scheduler::queue::ReadyQueues;
use crate::worker::{JobHandle, JobRunner, PollStatus};

/// Why a job left the running slot at the end of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SliceEnd {
    Exited { success: bool, code: Option<i32> },
    /// Quantum elapsed without exit
    Expired,
    /// A shorter job arrived (SRTF on-arrival mode)
    Preempted,
    /// Shutdown requested mid-slice
    Interrupted,
    SpawnFailed,
    Lost,
}

/// One occupancy of the running slot, as printed in the context-switch trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub job: JobId,
    pub command: String,
    pub tier: usize,
    pub start: Duration,
    pub end: Duration,
    pub end_reason: SliceEnd,
}

impl Dispatch {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Terminal jobs in completion order
    pub completions: Vec<CompletionRecord>,
    pub dispatches: Vec<Dispatch>,
    /// Jobs still pending when the loop stopped (shutdown only)
    pub pending: Vec<JobId>,
    pub boosts: usize,
}

struct Pick {
    job: JobId,
    tier: usize,
    bound: Option<Duration>,
}

/// The scheduler loop and everything it owns: ready queues, ledger,
/// estimator, runner, feed and sinks.
///
/// Exactly one job holds the running slot at a time. While it runs the loop
/// polls the runner every `poll_interval`, watches the quantum, and (online)
/// admits new arrivals.
pub struct Engine<R: JobRunner> {
    config: EngineConfig,
    runner: R,
    ledger: JobLedger,
    queues: ReadyQueues,
    estimator: HistoricalEstimator,
    feed: Option<Box<dyn ArrivalFeed>>,
    sinks: Vec<Box<dyn MetricsSink>>,
    epoch: Instant,
    last_boost: Duration,
    feed_closed: bool,
    dispatches: Vec<Dispatch>,
    boosts: usize,
}

impl<R: JobRunner> Engine<R> {
    pub fn new(config: EngineConfig, runner: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            queues: ReadyQueues::new(config.tiers()),
            estimator: HistoricalEstimator::new(config.default_estimate),
            config,
            runner,
            ledger: JobLedger::new(),
            feed: None,
            sinks: Vec::new(),
            epoch: Instant::now(),
            last_boost: Duration::ZERO,
            feed_closed: false,
            dispatches: Vec::new(),
            boosts: 0,
        })
    }

    pub fn with_feed(mut self, feed: impl ArrivalFeed + 'static) -> Self {
        self.feed = Some(Box::new(feed));
        self
    }

    pub fn with_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn queues(&self) -> &ReadyQueues {
        &self.queues
    }

    pub fn estimator(&self) -> &HistoricalEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut HistoricalEstimator {
        &mut self.estimator
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Offset of the engine clock.
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Admit a job. Offline jobs are admitted this way before [`run`](Self::run).
    pub fn admit(&mut self, command: impl Into<String>) -> Result<JobId> {
        self.admit_job(command.into(), None)
    }

    /// Admit a job whose burst time is known in advance (SJF/SRTF ranking).
    pub fn admit_with_estimate(
        &mut self,
        command: impl Into<String>,
        burst: Duration,
    ) -> Result<JobId> {
        self.admit_job(command.into(), Some(burst))
    }

    fn admit_job(&mut self, command: String, hint: Option<Duration>) -> Result<JobId> {
        let tier = self.initial_tier(&command, hint);
        let arrival = self.now();
        let id = self.ledger.admit(command, arrival, tier, hint)?;
        if !self.queues.push(tier, id) {
            return Err(SchedError::AlreadyQueued(id));
        }

        let job = self.ledger.get(id)?;
        tracing::info!(
            job = %id,
            command = %job.command,
            tier,
            arrival_ms = arrival.as_millis() as u64,
            "Job admitted"
        );
        Ok(id)
    }

    fn initial_tier(&self, command: &str, hint: Option<Duration>) -> usize {
        if self.config.policy != Policy::Mlfq || self.config.regime != Regime::Online {
            return 0;
        }
        let quanta = &self.config.mlfq.quanta;
        match hint {
            Some(burst) => quanta
                .iter()
                .position(|q| burst <= *q)
                .unwrap_or(self.config.mlfq.lowest_tier()),
            None => self.estimator.classify(command, quanta),
        }
    }

    fn estimate_for(&self, job: &Job) -> Duration {
        job.burst_hint
            .unwrap_or_else(|| self.estimator.estimate(&job.command))
    }

    /// Drain whatever the feed has right now. Never blocks.
    fn ingest_arrivals(&mut self) -> Result<Vec<JobId>> {
        if self.feed_closed {
            return Ok(Vec::new());
        }
        let now = self.now();
        let mut commands = Vec::new();
        if let Some(feed) = self.feed.as_mut() {
            loop {
                match feed.next_arrival(now) {
                    FeedEvent::Job(command) => commands.push(command),
                    FeedEvent::Idle => break,
                    FeedEvent::Closed => {
                        tracing::info!("Arrival feed closed");
                        self.feed_closed = true;
                        break;
                    }
                }
            }
        }

        commands
            .into_iter()
            .map(|command| self.admit_job(command, None))
            .collect()
    }

    fn maybe_boost(&mut self) -> Result<()> {
        if self.config.policy != Policy::Mlfq {
            return Ok(());
        }
        let now = self.now();
        if now.saturating_sub(self.last_boost) < self.config.mlfq.boost_interval {
            return Ok(());
        }

        let moved = self.queues.boost();
        for &id in &moved {
            self.ledger.set_tier(id, 0)?;
        }
        self.last_boost = now;
        self.boosts += 1;
        tracing::info!(
            moved = moved.len(),
            at_ms = now.as_millis() as u64,
            "Priority boost"
        );
        Ok(())
    }

    /// Remove the next job to dispatch from the ready queues.
    fn select(&mut self) -> Option<Pick> {
        match self.config.policy {
            Policy::Fcfs => self.queues.pop_front(0).map(|job| Pick {
                job,
                tier: 0,
                bound: None,
            }),
            Policy::RoundRobin => self.queues.pop_front(0).map(|job| Pick {
                job,
                tier: 0,
                bound: Some(self.config.quantum),
            }),
            Policy::Mlfq => self.queues.pop_highest().map(|(tier, job)| Pick {
                job,
                tier,
                bound: self.config.mlfq.quanta.get(tier).copied(),
            }),
            Policy::Sjf => self.take_shortest(|_, estimate| estimate).map(|job| Pick {
                job,
                tier: 0,
                bound: None,
            }),
            Policy::Srtf => self
                .take_shortest(|job, estimate| job.remaining(estimate))
                .map(|job| Pick {
                    job,
                    tier: 0,
                    bound: Some(self.config.quantum),
                }),
        }
    }

    /// Ready job with the smallest key; ties go to the earliest admission.
    fn take_shortest(&mut self, key: impl Fn(&Job, Duration) -> Duration) -> Option<JobId> {
        let best = self
            .queues
            .iter()
            .filter_map(|id| self.ledger.get(id).ok())
            .min_by_key(|job| (key(job, self.estimate_for(job)), job.id))
            .map(|job| job.id)?;
        self.queues.remove(best);
        Some(best)
    }

    fn finished(&self) -> bool {
        self.feed_closed && self.queues.is_empty() && self.ledger.all_terminal()
    }

    /// Run until every admitted job is terminal and no more can arrive, or
    /// until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<RunSummary> {
        match self.config.regime {
            Regime::Online if self.feed.is_none() => return Err(SchedError::MissingFeed),
            Regime::Online => {}
            // Offline jobs are all admitted already
            Regime::Offline => self.feed_closed = true,
        }

        tracing::info!(
            policy = %self.config.policy,
            regime = %self.config.regime,
            jobs = self.ledger.len(),
            "Scheduler loop starting"
        );
        self.last_boost = self.now();

        loop {
            if shutdown.is_cancelled() {
                tracing::info!("Shutdown requested, leaving scheduler loop");
                break;
            }

            self.ingest_arrivals()?;
            self.maybe_boost()?;

            match self.select() {
                Some(pick) => self.dispatch(pick, &shutdown).await?,
                None if self.finished() => break,
                None => {
                    // Nothing ready, arrivals still possible
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        for sink in &mut self.sinks {
            sink.finish()?;
        }
        Ok(self.summary())
    }

    /// Run with no external shutdown.
    pub async fn run_to_completion(&mut self) -> Result<RunSummary> {
        self.run(CancellationToken::new()).await
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            completions: self.ledger.completions().to_vec(),
            dispatches: self.dispatches.clone(),
            pending: self.ledger.pending().map(|j| j.id).collect(),
            boosts: self.boosts,
        }
    }

    async fn dispatch(&mut self, pick: Pick, shutdown: &CancellationToken) -> Result<()> {
        let Pick { job: id, tier, bound } = pick;
        let slice_start = self.now();
        if self.ledger.begin_dispatch(id, slice_start)? {
            tracing::debug!(job = %id, start_ms = slice_start.as_millis() as u64, "First dispatch");
        }

        let (command, existing, remaining) = {
            let job = self.ledger.get(id)?;
            (
                job.command.clone(),
                job.handle,
                job.remaining(self.estimate_for(job)),
            )
        };

        let handle = match existing {
            Some(handle) => match self.runner.resume(handle) {
                Ok(()) => handle,
                Err(e) => {
                    tracing::warn!(job = %id, error = %e, "Resume failed");
                    return self.conclude(id, tier, slice_start, SliceEnd::Lost);
                }
            },
            None => match self.runner.spawn(&command) {
                Ok(handle) => {
                    let pid = self.runner.pid(handle);
                    self.ledger.attach_process(id, handle, pid)?;
                    handle
                }
                Err(e) => {
                    tracing::warn!(job = %id, error = %e, "Spawn failed");
                    return self.conclude(id, tier, slice_start, SliceEnd::SpawnFailed);
                }
            },
        };

        let end_reason = self
            .run_slice(id, handle, slice_start, bound, remaining, shutdown)
            .await?;
        self.conclude(id, tier, slice_start, end_reason)
    }

    /// Poll the running job until it exits, its slice ends, or it is
    /// preempted.
    async fn run_slice(
        &mut self,
        id: JobId,
        handle: JobHandle,
        slice_start: Duration,
        bound: Option<Duration>,
        remaining: Duration,
        shutdown: &CancellationToken,
    ) -> Result<SliceEnd> {
        loop {
            match self.runner.poll(handle) {
                Ok(PollStatus::Running) => {}
                Ok(PollStatus::Exited { success, code }) => {
                    return Ok(SliceEnd::Exited { success, code });
                }
                Err(e) => {
                    tracing::warn!(job = %id, error = %e, "Poll failed");
                    return Ok(SliceEnd::Lost);
                }
            }

            let elapsed = self.now().saturating_sub(slice_start);
            if bound.is_some_and(|q| elapsed >= q) {
                self.suspend(id, handle);
                return Ok(SliceEnd::Expired);
            }
            if shutdown.is_cancelled() {
                self.suspend(id, handle);
                return Ok(SliceEnd::Interrupted);
            }

            let arrived = self.ingest_arrivals()?;
            if self.shorter_arrival(&arrived, remaining.saturating_sub(elapsed)) {
                self.suspend(id, handle);
                return Ok(SliceEnd::Preempted);
            }

            let wait = match bound {
                Some(q) => q.saturating_sub(elapsed).min(self.config.poll_interval),
                None => self.config.poll_interval,
            };
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn shorter_arrival(&self, arrived: &[JobId], running_remaining: Duration) -> bool {
        if self.config.policy != Policy::Srtf
            || self.config.srtf_preemption != SrtfPreemption::OnArrival
        {
            return false;
        }
        arrived
            .iter()
            .filter_map(|&id| self.ledger.get(id).ok())
            .any(|job| job.remaining(self.estimate_for(job)) < running_remaining)
    }

    fn suspend(&mut self, id: JobId, handle: JobHandle) {
        // A vanished process shows up on the next resume or poll
        if let Err(e) = self.runner.suspend(handle) {
            tracing::warn!(job = %id, error = %e, "Suspend failed");
        }
    }

    /// Account for the slice and either retire or re-queue the job.
    fn conclude(
        &mut self,
        id: JobId,
        tier: usize,
        slice_start: Duration,
        end_reason: SliceEnd,
    ) -> Result<()> {
        let end = match end_reason {
            SliceEnd::SpawnFailed => slice_start,
            _ => self.now().max(slice_start),
        };
        self.ledger.accrue(id, end - slice_start)?;

        let command = self.ledger.get(id)?.command.clone();
        tracing::debug!(
            job = %id,
            command = %command,
            tier,
            start_ms = slice_start.as_millis() as u64,
            end_ms = end.as_millis() as u64,
            end_reason = ?end_reason,
            "Slice ended"
        );
        let dispatch = Dispatch {
            job: id,
            command,
            tier,
            start: slice_start,
            end,
            end_reason,
        };
        for sink in &mut self.sinks {
            sink.dispatch(&dispatch)?;
        }
        self.dispatches.push(dispatch);

        match end_reason {
            SliceEnd::Exited { success: true, .. } => self.retire(id, end, Outcome::Finished),
            SliceEnd::Exited { success: false, .. } | SliceEnd::SpawnFailed | SliceEnd::Lost => {
                self.retire(id, end, Outcome::Error)
            }
            SliceEnd::Expired => {
                let next = match self.config.policy {
                    Policy::Mlfq => (tier + 1).min(self.queues.lowest_tier()),
                    _ => 0,
                };
                self.requeue(id, next)
            }
            SliceEnd::Preempted | SliceEnd::Interrupted => self.requeue(id, tier),
        }
    }

    fn requeue(&mut self, id: JobId, tier: usize) -> Result<()> {
        self.ledger.requeue(id, tier)?;
        if !self.queues.push(tier, id) {
            return Err(SchedError::AlreadyQueued(id));
        }
        Ok(())
    }

    fn retire(&mut self, id: JobId, now: Duration, outcome: Outcome) -> Result<()> {
        let record = self.ledger.retire(id, now, outcome)?;
        tracing::info!(
            job = %id,
            command = %record.command,
            outcome = ?outcome,
            burst_ms = record.metrics.burst.as_millis() as u64,
            turnaround_ms = record.metrics.turnaround.as_millis() as u64,
            waiting_ms = record.metrics.waiting.as_millis() as u64,
            response_ms = record.metrics.response.as_millis() as u64,
            "Job completed"
        );

        // Failed runs never feed the history
        if outcome == Outcome::Finished && self.config.regime == Regime::Online {
            self.estimator.record(&record.command, record.metrics.burst);
        }
        for sink in &mut self.sinks {
            sink.record(&record)?;
        }
        Ok(())
    }
}
