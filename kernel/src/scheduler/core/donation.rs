//! Priority donation engine
//!
//! Defeats priority inversion: while a high-priority thread waits on a
//! lock, the lock's holder runs at the waiter's priority. Each lock known
//! to the engine carries a priority ceiling (the strongest waiter) and the
//! current holder; a thread's effective priority is the max of its base
//! priority and the ceilings of the locks it holds.
//!
//! The lock/semaphore collaborator owns the actual wait-queue mechanics and
//! calls the three hooks at the right moments. Donation is disabled while
//! the feedback policy governs priorities; the dispatcher gates the calls.

use hashbrown::HashMap;

use super::super::thread::{LockId, Priority, ThreadId, ThreadState, ThreadTable, PRI_MIN};
use super::ready_queue::ReadyQueue;
use crate::sched_assert;

/// Donation chains longer than this stop propagating. The lock-wait graph
/// is acyclic (a thread cannot wait on a lock it holds, asserted below), so
/// deeper chains are legal but not worth walking in a teaching kernel.
pub const DONATION_DEPTH_MAX: usize = 8;

struct LockRecord {
    /// Thread currently holding the lock.
    holder: Option<ThreadId>,

    /// Threads recorded as waiting to acquire the lock.
    waiters: alloc::vec::Vec<ThreadId>,

    /// Max effective priority over the waiters; `PRI_MIN` when none, so an
    /// uncontended lock never raises its holder.
    ceiling: Priority,
}

impl LockRecord {
    fn new() -> Self {
        Self {
            holder: None,
            waiters: alloc::vec::Vec::new(),
            ceiling: PRI_MIN,
        }
    }

    fn recompute_ceiling(&mut self, table: &ThreadTable) {
        self.ceiling = self
            .waiters
            .iter()
            .filter_map(|&w| table.get(w))
            .map(|t| t.effective_priority())
            .max()
            .unwrap_or(PRI_MIN);
    }
}

pub struct DonationEngine {
    locks: HashMap<LockId, LockRecord>,
}

impl DonationEngine {
    pub fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    /// Current priority ceiling of a lock; `PRI_MIN` for unknown locks.
    pub fn ceiling(&self, lock: LockId) -> Priority {
        self.locks.get(&lock).map_or(PRI_MIN, |r| r.ceiling)
    }

    /// Current holder of a lock, if the engine knows one.
    pub fn holder(&self, lock: LockId) -> Option<ThreadId> {
        self.locks.get(&lock).and_then(|r| r.holder)
    }

    /// Hook: `waiter` is about to wait for `lock`.
    ///
    /// Raises the lock's ceiling and donates transitively: the holder's
    /// effective priority rises, and if the holder itself waits on another
    /// lock the donation cascades, bounded by `DONATION_DEPTH_MAX`.
    pub fn on_wait_begin(
        &mut self,
        table: &mut ThreadTable,
        ready: &mut ReadyQueue,
        waiter: ThreadId,
        lock: LockId,
    ) {
        {
            let tcb = table.get_mut(waiter).expect("waiter not in thread table");
            sched_assert!(
                !tcb.held_locks().contains(&lock),
                "thread waiting on a lock it already holds"
            );
            sched_assert!(
                tcb.waiting_on().is_none(),
                "thread already waiting on another lock"
            );
            tcb.set_waiting_on(Some(lock));
        }
        self.locks
            .entry(lock)
            .or_insert_with(LockRecord::new)
            .waiters
            .push(waiter);

        let mut lock_id = lock;
        let mut donated = table.get(waiter).unwrap().effective_priority();

        for _ in 0..DONATION_DEPTH_MAX {
            let holder = {
                let rec = self.locks.get_mut(&lock_id).expect("lock record vanished");
                if donated > rec.ceiling {
                    rec.ceiling = donated;
                }
                match rec.holder {
                    Some(h) => h,
                    None => break,
                }
            };
            sched_assert!(holder != waiter, "donation chain cycles back to the waiter");

            // The holder only needs refreshing if the ceiling can outrank it.
            if !self.refresh_effective(table, ready, holder) {
                break;
            }

            let holder_tcb = table.get(holder).unwrap();
            donated = holder_tcb.effective_priority();
            match holder_tcb.waiting_on() {
                Some(next) => lock_id = next,
                None => break,
            }
        }
    }

    /// Hook: `owner` successfully acquired `lock`.
    ///
    /// Returns true if holding the lock raised the owner's effective
    /// priority (the dispatcher then re-checks preemption).
    pub fn on_acquired(
        &mut self,
        table: &mut ThreadTable,
        ready: &mut ReadyQueue,
        owner: ThreadId,
        lock: LockId,
    ) -> bool {
        {
            let rec = self.locks.entry(lock).or_insert_with(LockRecord::new);
            sched_assert!(rec.holder.is_none(), "lock acquired while still held");
            rec.waiters.retain(|&w| w != owner);
            rec.holder = Some(owner);
        }
        // Remaining waiters (if any) define the ceiling the new holder
        // inherits.
        let rec = self.locks.get_mut(&lock).unwrap();
        rec.recompute_ceiling(table);

        let tcb = table.get_mut(owner).expect("owner not in thread table");
        tcb.set_waiting_on(None);
        tcb.push_held_lock(lock);

        self.refresh_effective(table, ready, owner)
    }

    /// Hook: `owner` released `lock`.
    ///
    /// The owner's effective priority falls back to
    /// `max(base, remaining held ceilings)` - this is where a deferred
    /// base-priority lowering finally lands. Returns true if the priority
    /// dropped.
    pub fn on_released(
        &mut self,
        table: &mut ThreadTable,
        ready: &mut ReadyQueue,
        owner: ThreadId,
        lock: LockId,
    ) -> bool {
        {
            let rec = self.locks.get_mut(&lock).expect("releasing unknown lock");
            sched_assert!(
                rec.holder == Some(owner),
                "lock released by a thread that does not hold it"
            );
            rec.holder = None;
            rec.recompute_ceiling(table);
            if rec.waiters.is_empty() {
                self.locks.remove(&lock);
            }
        }

        let before = table.get(owner).expect("owner not in thread table").effective_priority();
        self.refresh_effective(table, ready, owner);
        table.get(owner).unwrap().effective_priority() < before
    }

    /// Recompute a thread's effective priority from its base priority and
    /// held-lock ceilings, re-filing it in the ready queue when resident.
    /// Returns true if the priority changed.
    pub fn refresh_effective(
        &self,
        table: &mut ThreadTable,
        ready: &mut ReadyQueue,
        tid: ThreadId,
    ) -> bool {
        let (new_eff, state) = {
            let tcb = table.get_mut(tid).expect("thread not in table");
            tcb.sort_held_locks(|l| self.ceiling(l));
            let top = tcb
                .held_locks()
                .first()
                .map_or(PRI_MIN, |&l| self.ceiling(l));
            (tcb.base_priority().max(top), tcb.state())
        };

        let tcb = table.get_mut(tid).unwrap();
        if new_eff == tcb.effective_priority() {
            return false;
        }
        tcb.set_effective_priority(new_eff);
        if state == ThreadState::Ready && ready.contains(tid) {
            ready.reorder(tid, new_eff);
        }
        true
    }
}

impl Default for DonationEngine {
    fn default() -> Self {
        Self::new()
    }
}
