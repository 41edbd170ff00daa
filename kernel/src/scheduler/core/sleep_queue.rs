//! Sleep queue
//!
//! Threads parked until a deadline tick, kept in ascending deadline order.
//! The per-tick wake scan walks the sorted prefix and stops at the first
//! future deadline, so its cost is proportional to the threads actually
//! woken rather than to the number of sleepers.

use alloc::vec::Vec;

use super::super::thread::ThreadId;
use crate::sched_assert;

pub struct SleepQueue {
    /// Sorted by deadline ascending; FIFO among equal deadlines.
    queue: Vec<(i64, ThreadId)>,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self { queue: Vec::new() }
    }

    /// File a thread under its wake deadline.
    pub fn insert(&mut self, tid: ThreadId, deadline: i64) {
        sched_assert!(!self.contains(tid), "thread already in sleep queue");

        let pos = self
            .queue
            .iter()
            .position(|&(d, _)| d > deadline)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, (deadline, tid));
    }

    /// Remove and return every thread whose deadline has arrived.
    ///
    /// With non-decreasing `now` across calls, a thread is returned at most
    /// once over its stay in the queue.
    pub fn take_due(&mut self, now: i64) -> Vec<ThreadId> {
        let split = self
            .queue
            .iter()
            .position(|&(d, _)| d > now)
            .unwrap_or(self.queue.len());
        self.queue.drain(..split).map(|(_, tid)| tid).collect()
    }

    /// Drop a sleeper that is being woken by other means than its
    /// deadline. Returns true if it was resident.
    pub fn remove(&mut self, tid: ThreadId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|&(_, t)| t != tid);
        self.queue.len() != before
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.queue.iter().any(|&(_, t)| t == tid)
    }

    /// Earliest deadline among sleepers, if any.
    pub fn next_deadline(&self) -> Option<i64> {
        self.queue.first().map(|&(d, _)| d)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}
