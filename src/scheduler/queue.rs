use std::collections::{HashMap, VecDeque};

use crate::scheduler::job::JobId;

/// Ready queue set: one FIFO per priority tier.
///
/// Single-tier policies use tier 0 only. Queues hold job ids; job data lives
/// in the ledger. A job occupies at most one slot across all tiers.
#[derive(Debug)]
pub struct ReadyQueues {
    tiers: Vec<VecDeque<JobId>>,
    slots: HashMap<JobId, usize>,
}

impl ReadyQueues {
    pub fn new(tiers: usize) -> Self {
        Self {
            tiers: (0..tiers.max(1)).map(|_| VecDeque::new()).collect(),
            slots: HashMap::new(),
        }
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn lowest_tier(&self) -> usize {
        self.tiers.len() - 1
    }

    /// Append a job to the tail of `tier` (clamped to the lowest tier).
    /// Returns false if the job is already queued somewhere.
    pub fn push(&mut self, tier: usize, job: JobId) -> bool {
        if self.slots.contains_key(&job) {
            return false;
        }
        let tier = tier.min(self.lowest_tier());
        self.tiers[tier].push_back(job);
        self.slots.insert(job, tier);
        true
    }

    /// Pop the front of one tier.
    pub fn pop_front(&mut self, tier: usize) -> Option<JobId> {
        let job = self.tiers.get_mut(tier)?.pop_front()?;
        self.slots.remove(&job);
        Some(job)
    }

    /// Pop the front of the highest-priority non-empty tier.
    pub fn pop_highest(&mut self) -> Option<(usize, JobId)> {
        let tier = self.tiers.iter().position(|q| !q.is_empty())?;
        self.pop_front(tier).map(|job| (tier, job))
    }

    /// Remove a specific job wherever it sits.
    pub fn remove(&mut self, job: JobId) -> Option<usize> {
        let tier = self.slots.remove(&job)?;
        let queue = &mut self.tiers[tier];
        if let Some(pos) = queue.iter().position(|&j| j == job) {
            queue.remove(pos);
        }
        Some(tier)
    }

    /// Move every job in tiers below the top to the tail of tier 0, keeping
    /// tier order and FIFO order within each tier. Returns the moved ids.
    pub fn boost(&mut self) -> Vec<JobId> {
        let mut moved = Vec::new();
        for tier in 1..self.tiers.len() {
            let drained: Vec<JobId> = self.tiers[tier].drain(..).collect();
            moved.extend(drained);
        }
        for &job in &moved {
            self.tiers[0].push_back(job);
            self.slots.insert(job, 0);
        }
        moved
    }

    pub fn tier_of(&self, job: JobId) -> Option<usize> {
        self.slots.get(&job).copied()
    }

    pub fn contains(&self, job: JobId) -> bool {
        self.slots.contains_key(&job)
    }

    /// Jobs in dispatch-priority order: tier 0 front to lowest tier back.
    pub fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        self.tiers.iter().flat_map(|q| q.iter().copied())
    }

    pub fn tier(&self, tier: usize) -> Option<&VecDeque<JobId>> {
        self.tiers.get(tier)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
