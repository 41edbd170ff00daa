//! Thread Structure and Management
//!
//! The thread control block (TCB) and the table of all live threads. A TCB
//! is owned by the table from creation to reclamation; the ready and sleep
//! queues only ever hold thread ids, so a thread's storage has exactly one
//! owner no matter which queue it transits.

use alloc::boxed::Box;
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::Mutex;

use super::super::fixed::Fixed;
use super::super::platform::TcbBlock;
use super::state::ThreadState;
use crate::sched_assert;

/// Thread ID type
pub type ThreadId = u64;

/// Opaque handle the lock/semaphore collaborator uses to name a lock in the
/// donation hooks.
pub type LockId = u64;

/// Thread priority: an integer in `[PRI_MIN, PRI_MAX]`, larger is stronger.
pub type Priority = i32;

/// Lowest priority (the idle thread's).
pub const PRI_MIN: Priority = 0;
/// Default priority for new threads.
pub const PRI_DEFAULT: Priority = 31;
/// Highest priority.
pub const PRI_MAX: Priority = 63;

/// Niceness bounds for the feedback scheduler.
pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 20;

/// Thread names are truncated to this many bytes.
pub const THREAD_NAME_MAX: usize = 16;

static_assertions::const_assert!(PRI_MIN < PRI_DEFAULT);
static_assertions::const_assert!(PRI_DEFAULT < PRI_MAX);
static_assertions::const_assert!(NICE_MIN < 0 && 0 < NICE_MAX);

/// Entry function for a kernel thread; the opaque argument is handed back
/// on first dispatch by the context-switch collaborator.
pub type ThreadEntry = fn(usize);

/// Thread Control Block (TCB)
pub struct Tcb {
    /// Unique thread ID
    tid: ThreadId,

    /// Thread name (for debugging)
    name: Box<str>,

    /// Current state
    state: ThreadState,

    /// Priority as requested by creation or an explicit set
    base_priority: Priority,

    /// Priority the dispatcher actually uses: `base_priority` raised by
    /// donation, or the MLFQS formula's output when that policy governs
    effective_priority: Priority,

    /// Locks this thread currently holds, ordered by each lock's priority
    /// ceiling, descending. Ordering is maintained by the donation engine.
    held_locks: Vec<LockId>,

    /// The lock this thread is waiting to acquire, if any (donation chain
    /// link)
    waiting_on: Option<LockId>,

    /// Niceness (feedback policy only)
    nice: i32,

    /// Decayed CPU-usage measure (feedback policy only)
    recent_cpu: Fixed,

    /// Wake deadline; present only while parked in the sleep queue
    sleep_until: Option<i64>,

    /// Entry point and argument, consumed by the switch collaborator on
    /// first dispatch. The boot thread has none.
    entry: Option<(ThreadEntry, usize)>,

    /// Backing block from the platform allocator. The boot thread's stack
    /// was not allocated through the platform and has no block here.
    block: Option<TcbBlock>,
}

impl Tcb {
    /// Create a TCB for a new kernel thread. Starts Blocked so it cannot
    /// run before initialization completes; the creator unblocks it.
    pub fn new(
        tid: ThreadId,
        name: &str,
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
        block: TcbBlock,
    ) -> Self {
        sched_assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "thread priority out of range"
        );

        Self {
            tid,
            name: truncate_name(name),
            state: ThreadState::Blocked,
            base_priority: priority,
            effective_priority: priority,
            held_locks: Vec::new(),
            waiting_on: None,
            nice: 0,
            recent_cpu: Fixed::ZERO,
            sleep_until: None,
            entry: Some((entry, arg)),
            block: Some(block),
        }
    }

    /// Adopt the control flow that is already running at boot as a thread.
    /// It owns no allocator block and is never reclaimed.
    pub fn boot(tid: ThreadId, name: &str) -> Self {
        Self {
            tid,
            name: truncate_name(name),
            state: ThreadState::Running,
            base_priority: PRI_DEFAULT,
            effective_priority: PRI_DEFAULT,
            held_locks: Vec::new(),
            waiting_on: None,
            nice: 0,
            recent_cpu: Fixed::ZERO,
            sleep_until: None,
            entry: None,
            block: None,
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    pub fn set_base_priority(&mut self, priority: Priority) {
        sched_assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "thread priority out of range"
        );
        self.base_priority = priority;
    }

    pub fn effective_priority(&self) -> Priority {
        self.effective_priority
    }

    pub fn set_effective_priority(&mut self, priority: Priority) {
        self.effective_priority = priority;
    }

    pub fn held_locks(&self) -> &[LockId] {
        &self.held_locks
    }

    /// Record a newly acquired lock; the donation engine re-sorts by
    /// ceiling afterwards.
    pub fn push_held_lock(&mut self, lock: LockId) {
        sched_assert!(
            !self.held_locks.contains(&lock),
            "lock already held by this thread"
        );
        self.held_locks.push(lock);
    }

    pub fn remove_held_lock(&mut self, lock: LockId) {
        sched_assert!(
            self.held_locks.contains(&lock),
            "releasing a lock this thread does not hold"
        );
        self.held_locks.retain(|&l| l != lock);
    }

    /// Restore descending-ceiling order after a ceiling changed.
    pub fn sort_held_locks(&mut self, ceiling_of: impl Fn(LockId) -> Priority) {
        self.held_locks
            .sort_unstable_by(|&a, &b| ceiling_of(b).cmp(&ceiling_of(a)));
    }

    pub fn waiting_on(&self) -> Option<LockId> {
        self.waiting_on
    }

    pub fn set_waiting_on(&mut self, lock: Option<LockId>) {
        self.waiting_on = lock;
    }

    pub fn nice(&self) -> i32 {
        self.nice
    }

    pub fn set_nice(&mut self, nice: i32) {
        sched_assert!(
            (NICE_MIN..=NICE_MAX).contains(&nice),
            "niceness out of range"
        );
        self.nice = nice;
    }

    pub fn recent_cpu(&self) -> Fixed {
        self.recent_cpu
    }

    pub fn set_recent_cpu(&mut self, value: Fixed) {
        self.recent_cpu = value;
    }

    pub fn sleep_until(&self) -> Option<i64> {
        self.sleep_until
    }

    pub fn set_sleep_until(&mut self, deadline: Option<i64>) {
        self.sleep_until = deadline;
    }

    /// Entry point and argument, for the switch collaborator's first
    /// dispatch of this thread.
    pub fn entry(&self) -> Option<(ThreadEntry, usize)> {
        self.entry
    }

    /// Detach the backing block for reclamation. `None` for the boot
    /// thread.
    pub fn take_block(&mut self) -> Option<TcbBlock> {
        self.block.take()
    }
}

fn truncate_name(name: &str) -> Box<str> {
    // Truncate on a char boundary so the result stays valid UTF-8.
    let mut end = name.len().min(THREAD_NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].into()
}

/// Table of all live threads, keyed by id. This is the all-threads set:
/// a TCB is inserted exactly once at creation and removed exactly once when
/// its storage is reclaimed after death.
pub struct ThreadTable {
    threads: HashMap<ThreadId, Tcb>,

    /// Dedicated allocation lock for new thread ids.
    next_tid: Mutex<ThreadId>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            threads: HashMap::new(),
            next_tid: Mutex::new(1),
        }
    }

    /// Returns a fresh ascending thread id.
    pub fn allocate_tid(&self) -> ThreadId {
        let mut next = self.next_tid.lock();
        let tid = *next;
        *next += 1;
        tid
    }

    pub fn insert(&mut self, tcb: Tcb) {
        let tid = tcb.tid();
        let replaced = self.threads.insert(tid, tcb);
        sched_assert!(replaced.is_none(), "duplicate thread id in table");
    }

    pub fn remove(&mut self, tid: ThreadId) -> Option<Tcb> {
        self.threads.remove(&tid)
    }

    pub fn get(&self, tid: ThreadId) -> Option<&Tcb> {
        self.threads.get(&tid)
    }

    pub fn get_mut(&mut self, tid: ThreadId) -> Option<&mut Tcb> {
        self.threads.get_mut(&tid)
    }

    /// Ids of every thread still participating in global sweeps (Dying
    /// threads have already left the all-threads set).
    pub fn live_tids(&self) -> Vec<ThreadId> {
        self.threads
            .iter()
            .filter(|(_, t)| t.state().is_live())
            .map(|(&tid, _)| tid)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}
