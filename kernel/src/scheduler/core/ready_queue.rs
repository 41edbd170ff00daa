//! Ready queue
//!
//! The ordered set of runnable-but-not-running threads. Residents are kept
//! in descending effective-priority order with FIFO order among equals, so
//! the front is always the next thread to dispatch and equal-priority
//! threads never starve each other.
//!
//! Each entry carries the priority it was filed under; `reorder` must be
//! called whenever a resident's effective priority changes, which keeps the
//! filed value current. O(n) insertion is fine at teaching-kernel thread
//! counts.

use alloc::collections::VecDeque;

use super::super::thread::{Priority, ThreadId};
use crate::sched_assert;

pub struct ReadyQueue {
    /// Front = highest priority, oldest among equals.
    queue: VecDeque<(ThreadId, Priority)>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Insert a thread that just became ready.
    ///
    /// The thread must not already be resident. Inserting after every
    /// resident with priority >= `priority` preserves FIFO order on ties.
    pub fn enqueue(&mut self, tid: ThreadId, priority: Priority) {
        sched_assert!(!self.contains(tid), "thread already in ready queue");

        let pos = self
            .queue
            .iter()
            .position(|&(_, p)| p < priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, (tid, priority));
    }

    /// Remove and return the highest-priority resident, or `None` when the
    /// queue is empty (the dispatcher substitutes the idle thread).
    pub fn dequeue(&mut self) -> Option<ThreadId> {
        self.queue.pop_front().map(|(tid, _)| tid)
    }

    /// Re-file a resident whose effective priority changed.
    pub fn reorder(&mut self, tid: ThreadId, priority: Priority) {
        let pos = self.queue.iter().position(|&(t, _)| t == tid);
        sched_assert!(pos.is_some(), "reorder target not in ready queue");
        self.queue.remove(pos.unwrap());
        self.enqueue(tid, priority);
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.queue.iter().any(|&(t, _)| t == tid)
    }

    /// Priority of the strongest resident, if any.
    pub fn front_priority(&self) -> Option<Priority> {
        self.queue.front().map(|&(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
