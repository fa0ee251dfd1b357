//! Work distribution across decoder workers.
//!
//! Each thread log is one work item. Workers claim items with a
//! compare-and-swap of the item's state from `NotStarted` to `InProgress`,
//! so every log is walked by exactly one worker without a lock.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, Ordering};

/// Upper bound on decoder worker threads.
pub const MAX_WORKERS: usize = 64;

const NOT_STARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

/// State of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    /// Not claimed yet.
    NotStarted,
    /// Claimed by a worker.
    InProgress,
    /// Finished.
    Done,
}

/// Claim table for a fixed set of work items.
#[derive(Debug)]
pub struct WorkItems {
    states: Box<[AtomicU8]>,
}

impl WorkItems {
    /// A table of `len` unclaimed items.
    pub fn new(len: usize) -> Self {
        Self {
            states: (0..len).map(|_| AtomicU8::new(NOT_STARTED)).collect(),
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether there are no items.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Try to claim item `index`. Exactly one caller succeeds.
    pub fn claim(&self, index: usize) -> bool {
        self.states[index]
            .compare_exchange(NOT_STARTED, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the first unclaimed item.
    pub fn claim_next(&self) -> Option<usize> {
        (0..self.states.len()).find(|&index| self.claim(index))
    }

    /// Mark a claimed item finished.
    pub fn finish(&self, index: usize) {
        self.states[index].store(DONE, Ordering::Release);
    }

    /// Current state of item `index`.
    pub fn state(&self, index: usize) -> WorkState {
        match self.states[index].load(Ordering::Acquire) {
            NOT_STARTED => WorkState::NotStarted,
            IN_PROGRESS => WorkState::InProgress,
            _ => WorkState::Done,
        }
    }

    /// Run `work` over every item on `workers` scoped threads and wait for
    /// all of them.
    pub fn run<F>(&self, workers: usize, work: F)
    where
        F: Fn(usize) + Sync,
    {
        let workers = workers.clamp(1, MAX_WORKERS);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some(index) = self.claim_next() {
                        work(index);
                        self.finish(index);
                    }
                });
            }
        });
    }
}

/// Default worker count: one per available processor, capped by
/// [`MAX_WORKERS`] and by the number of items.
pub fn worker_count(items: usize) -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(MAX_WORKERS)
        .min(items)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn claim_once() {
        let items = WorkItems::new(2);
        assert!(items.claim(0));
        assert!(!items.claim(0));
        assert_eq!(items.state(0), WorkState::InProgress);
        items.finish(0);
        assert_eq!(items.state(0), WorkState::Done);
        assert!(!items.claim(0));
        assert_eq!(items.claim_next(), Some(1));
        assert_eq!(items.claim_next(), None);
    }

    #[test]
    fn every_item_runs_once() {
        let items = WorkItems::new(100);
        let runs: Vec<AtomicUsize> = (0..100).map(|_| AtomicUsize::new(0)).collect();
        items.run(8, |index| {
            runs[index].fetch_add(1, Ordering::Relaxed);
        });
        assert!(runs.iter().all(|r| r.load(Ordering::Relaxed) == 1));
        assert!((0..100).all(|i| items.state(i) == WorkState::Done));
    }

    #[test]
    fn worker_count_bounds() {
        assert_eq!(worker_count(0), 1);
        assert_eq!(worker_count(1), 1);
        assert!(worker_count(1000) <= MAX_WORKERS);
    }

    #[test]
    fn racing_claims_have_one_winner() {
        for _ in 0..50 {
            let items = WorkItems::new(1);
            let barrier = Barrier::new(2);
            let wins = AtomicUsize::new(0);
            std::thread::scope(|scope| {
                for _ in 0..2 {
                    scope.spawn(|| {
                        barrier.wait();
                        if items.claim(0) {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
            });
            assert_eq!(wins.load(Ordering::Relaxed), 1);
        }
    }
}
