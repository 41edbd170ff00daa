//! Scheduler core - dispatcher and thread state machine
//!
//! Ties the queues, the donation engine, and the feedback accounting
//! together: the tick handler, the blocking/yield entry points, and the
//! switch to the next thread. The context switch itself, interrupt control,
//! and TCB-block allocation are platform collaborators.
//!
//! All state is protected by disabling interrupts: exactly one thread runs
//! kernel logic at a time on the single CPU, so every mutating entry point
//! either asserts interrupts are already off (tick path) or disables them
//! and restores the prior level on exit.

use super::super::platform::{IntrLevel, Platform};
use super::super::thread::{
    validate_transition, LockId, Priority, Tcb, ThreadEntry, ThreadId, ThreadState, ThreadTable,
    PRI_MIN,
};
use super::error::{SchedulerError, SchedulerResult};
use super::mlfqs::{MlfqsState, PRIORITY_RECOMPUTE_INTERVAL, TIMER_FREQ};
use super::policy::{Policy, PolicyEngine};
use super::ready_queue::ReadyQueue;
use super::sleep_queue::SleepQueue;
use super::stats::{TickStats, TickStatsSnapshot};
use crate::sched_assert;

/// Ticks a thread may run before preemption is requested.
pub const TIME_SLICE: i64 = 4;

static_assertions::const_assert!(TIME_SLICE > 0);

/// The process-wide scheduler context. Created once at boot, never torn
/// down; owns every live TCB and the platform collaborators.
pub struct Scheduler<P: Platform> {
    platform: P,

    /// Priority policy engine, fixed at boot.
    engine: PolicyEngine,

    /// All live threads (the all-threads set).
    table: ThreadTable,

    /// Runnable-but-not-running threads.
    ready: ReadyQueue,

    /// Threads parked until a deadline tick.
    sleepers: SleepQueue,

    /// Tick and interrupt counters.
    stats: TickStats,

    /// The one running thread (or the idle thread).
    current: ThreadId,

    /// The idle thread, once `start` has created it. Dispatched only when
    /// the ready queue is empty; never resident in it.
    idle: Option<ThreadId>,

    /// The boot thread; its block was not obtained from the allocator and
    /// is never freed.
    boot: ThreadId,

    /// Ticks the current thread has run since it was dispatched.
    slice_ticks: i64,
}

impl<P: Platform> Scheduler<P> {
    /// Initialize the scheduling core by adopting the currently running
    /// control flow as the boot thread.
    pub fn new(platform: P, policy: Policy, boot_name: &str) -> Self {
        let mut table = ThreadTable::new();
        let boot_tid = table.allocate_tid();
        table.insert(Tcb::boot(boot_tid, boot_name));

        log::info!(
            "scheduler: policy {}, boot thread '{}' (tid {})",
            policy,
            boot_name,
            boot_tid
        );

        Self {
            platform,
            engine: PolicyEngine::for_policy(policy),
            table,
            ready: ReadyQueue::new(),
            sleepers: SleepQueue::new(),
            stats: TickStats::new(),
            current: boot_tid,
            idle: None,
            boot: boot_tid,
            slice_ticks: 0,
        }
    }

    /// Create the idle thread. It is born Blocked and stays out of the
    /// ready queue forever; the dispatcher hands it the CPU whenever the
    /// ready queue is empty, and it blocks itself again in its own loop.
    pub fn start(&mut self, idle_entry: ThreadEntry) -> SchedulerResult<ThreadId> {
        sched_assert!(self.idle.is_none(), "idle thread already created");

        let block = self
            .platform
            .alloc_block()
            .ok_or(SchedulerError::OutOfMemory)?;
        let tid = self.table.allocate_tid();
        let old = self.platform.intr_disable();
        self.table.insert(Tcb::new(tid, "idle", PRI_MIN, idle_entry, 0, block));
        self.idle = Some(tid);
        self.platform.intr_restore(old);

        log::info!("scheduler: idle thread ready (tid {})", tid);
        Ok(tid)
    }

    /// Create a new kernel thread and make it runnable.
    ///
    /// Fails only on block exhaustion. If the new thread outranks the
    /// creator, the creator yields immediately.
    pub fn spawn(
        &mut self,
        name: &str,
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
    ) -> SchedulerResult<ThreadId> {
        let block = self
            .platform
            .alloc_block()
            .ok_or(SchedulerError::OutOfMemory)?;
        let tid = self.table.allocate_tid();

        let old = self.platform.intr_disable();
        self.table.insert(Tcb::new(tid, name, priority, entry, arg, block));
        if let PolicyEngine::Mlfqs(mlfqs) = &self.engine {
            // The feedback policy owns priorities; the requested one only
            // seeds base_priority and is superseded immediately.
            mlfqs.refresh_priority(&mut self.table, &mut self.ready, tid);
        }
        self.platform.intr_restore(old);

        log::debug!("scheduler: spawned '{}' (tid {}, priority {})", name, tid, priority);

        self.unblock(tid);
        self.maybe_yield_to_ready();
        Ok(tid)
    }

    /// Transition a Blocked thread to Ready. Does not preempt the caller;
    /// an unblock inside an interrupts-off section must stay atomic with
    /// the caller's other updates.
    pub fn unblock(&mut self, tid: ThreadId) {
        let old = self.platform.intr_disable();

        let (priority, was_sleeping) = {
            let tcb = self.table.get_mut(tid).expect("unblocking unknown thread");
            sched_assert!(
                validate_transition(tcb.state(), ThreadState::Ready),
                "unblock requires a Blocked thread"
            );
            tcb.set_state(ThreadState::Ready);
            let was_sleeping = tcb.sleep_until().is_some();
            tcb.set_sleep_until(None);
            (tcb.effective_priority(), was_sleeping)
        };
        // A sleeper woken early leaves the sleep queue with its deadline;
        // it must not be woken a second time when the deadline arrives.
        if was_sleeping {
            self.sleepers.remove(tid);
        }
        self.ready.enqueue(tid, priority);

        self.platform.intr_restore(old);
    }

    /// Block the running thread. Interrupts must already be off; the
    /// thread will not run again until someone unblocks it.
    pub fn block(&mut self) {
        sched_assert!(!self.platform.in_interrupt(), "cannot block in interrupt context");
        sched_assert!(
            self.platform.intr_level() == IntrLevel::Off,
            "block requires interrupts disabled"
        );

        let tcb = self.table.get_mut(self.current).unwrap();
        sched_assert!(
            validate_transition(tcb.state(), ThreadState::Blocked),
            "block requires the Running thread"
        );
        tcb.set_state(ThreadState::Blocked);
        self.schedule();
    }

    /// Yield the CPU; the caller stays runnable and may be rescheduled
    /// immediately if it still has the highest priority.
    pub fn yield_now(&mut self) {
        sched_assert!(!self.platform.in_interrupt(), "cannot yield in interrupt context");
        let old = self.platform.intr_disable();

        if Some(self.current) == self.idle {
            // The idle thread parks as Blocked; it re-enters the CPU only
            // through the empty-ready-queue path.
            self.table
                .get_mut(self.current)
                .unwrap()
                .set_state(ThreadState::Blocked);
        } else {
            let tcb = self.table.get_mut(self.current).unwrap();
            tcb.set_state(ThreadState::Ready);
            let priority = tcb.effective_priority();
            self.ready.enqueue(self.current, priority);
        }
        self.schedule();

        self.platform.intr_restore(old);
    }

    /// Park the running thread until `deadline` (an absolute tick).
    /// Interrupts must already be off, as on every sleep path.
    pub fn sleep_until(&mut self, deadline: i64) {
        sched_assert!(!self.platform.in_interrupt(), "cannot sleep in interrupt context");
        sched_assert!(
            self.platform.intr_level() == IntrLevel::Off,
            "sleep requires interrupts disabled"
        );
        sched_assert!(Some(self.current) != self.idle, "idle thread cannot sleep");

        let tid = self.current;
        self.table
            .get_mut(tid)
            .unwrap()
            .set_sleep_until(Some(deadline));
        self.sleepers.insert(tid, deadline);
        self.block();
    }

    /// Terminate the running thread. Its storage is reclaimed by whichever
    /// thread completes the next switch; in a live kernel control never
    /// returns here.
    pub fn exit(&mut self) {
        sched_assert!(!self.platform.in_interrupt(), "cannot exit in interrupt context");
        sched_assert!(Some(self.current) != self.idle, "idle thread cannot exit");

        self.platform.intr_disable();
        let tcb = self.table.get_mut(self.current).unwrap();
        log::info!("scheduler: thread '{}' (tid {}) exiting", tcb.name(), tcb.tid());
        sched_assert!(
            validate_transition(tcb.state(), ThreadState::Dying),
            "exit requires the Running thread"
        );
        tcb.set_state(ThreadState::Dying);
        self.schedule();
    }

    /// Timer tick handler. Runs in interrupt context with interrupts off:
    /// updates statistics, wakes due sleepers, runs the feedback-policy
    /// hooks, and requests deferred preemption when the time slice is used
    /// up or a stronger thread became ready.
    pub fn on_tick(&mut self) {
        sched_assert!(self.platform.in_interrupt(), "tick outside interrupt context");
        sched_assert!(
            self.platform.intr_level() == IntrLevel::Off,
            "tick requires interrupts disabled"
        );

        let idle_running = Some(self.current) == self.idle;
        let now = self.stats.record_tick(idle_running);

        // Wake every sleeper whose deadline arrived. The sleep queue is
        // sorted, so this touches exactly the due prefix.
        for tid in self.sleepers.take_due(now) {
            self.table.get_mut(tid).unwrap().set_sleep_until(None);
            self.unblock(tid);
        }

        if let PolicyEngine::Mlfqs(mlfqs) = &mut self.engine {
            let idle = self.idle.unwrap_or(ThreadId::MAX);
            mlfqs.tick_increment(&mut self.table, self.current, idle);
            if now % TIMER_FREQ == 0 {
                mlfqs.per_second(&mut self.table, &mut self.ready, self.current, idle);
            } else if now % PRIORITY_RECOMPUTE_INTERVAL == 0 && !idle_running {
                mlfqs.refresh_priority(&mut self.table, &mut self.ready, self.current);
            }
        }

        // Preemption is deferred to the interrupt's return path: switching
        // inside the handler is unsafe.
        self.slice_ticks += 1;
        let current_priority = self.current_priority();
        let outranked = self
            .ready
            .front_priority()
            .map_or(false, |p| p > current_priority || idle_running);
        if self.slice_ticks >= TIME_SLICE || outranked {
            self.platform.yield_on_return();
        }
    }

    /// Statistics bracket: a non-timer interrupt began.
    pub fn on_interrupt_enter(&mut self) {
        self.stats.interrupt_enter();
    }

    /// Statistics bracket: a non-timer interrupt finished.
    pub fn on_interrupt_exit(&mut self) {
        self.stats.interrupt_exit();
    }

    // ── Donation hooks (lock/semaphore collaborator) ────────────────────

    /// `waiter` is about to wait for `lock`: donate its priority down the
    /// holder chain. Suppressed under the feedback policy.
    pub fn on_wait_begin(&mut self, waiter: ThreadId, lock: LockId) {
        let old = self.platform.intr_disable();
        if let PolicyEngine::Donation(engine) = &mut self.engine {
            engine.on_wait_begin(&mut self.table, &mut self.ready, waiter, lock);
        }
        self.platform.intr_restore(old);
    }

    /// `owner` acquired `lock`; yields if inheriting the lock's ceiling
    /// changed the priority picture.
    pub fn on_acquired(&mut self, owner: ThreadId, lock: LockId) {
        let old = self.platform.intr_disable();
        let changed = match &mut self.engine {
            PolicyEngine::Donation(engine) => {
                engine.on_acquired(&mut self.table, &mut self.ready, owner, lock)
            }
            PolicyEngine::Mlfqs(_) => false,
        };
        self.platform.intr_restore(old);

        if changed {
            self.maybe_yield_to_ready();
        }
    }

    /// `owner` released `lock`; a deferred priority lowering takes effect
    /// here, and the owner yields if it no longer has the highest priority.
    pub fn on_released(&mut self, owner: ThreadId, lock: LockId) {
        let old = self.platform.intr_disable();
        let dropped = match &mut self.engine {
            PolicyEngine::Donation(engine) => {
                engine.on_released(&mut self.table, &mut self.ready, owner, lock)
            }
            PolicyEngine::Mlfqs(_) => false,
        };
        self.platform.intr_restore(old);

        if dropped {
            self.maybe_yield_to_ready();
        }
    }

    // ── Priority interface ──────────────────────────────────────────────

    /// Set a thread's base priority. No-op under the feedback policy,
    /// which owns priorities. A raise applies immediately; a lowering is
    /// deferred while the thread holds donation-raised locks. Yields when
    /// the change leaves the running thread outranked.
    pub fn set_base_priority(&mut self, tid: ThreadId, priority: Priority) {
        let old = self.platform.intr_disable();
        let changed = match &mut self.engine {
            PolicyEngine::Donation(engine) => {
                let tcb = self.table.get_mut(tid).expect("unknown thread");
                if tcb.base_priority() == priority {
                    false
                } else {
                    tcb.set_base_priority(priority);
                    engine.refresh_effective(&mut self.table, &mut self.ready, tid)
                }
            }
            PolicyEngine::Mlfqs(_) => false,
        };
        self.platform.intr_restore(old);

        if changed {
            self.maybe_yield_to_ready();
        }
    }

    /// The running thread's effective priority.
    pub fn current_priority(&self) -> Priority {
        self.table.get(self.current).unwrap().effective_priority()
    }

    /// A thread's effective priority.
    pub fn priority_of(&self, tid: ThreadId) -> Priority {
        self.table.get(tid).expect("unknown thread").effective_priority()
    }

    /// Set a thread's niceness. Under the feedback policy the thread's
    /// priority is recomputed immediately and the CPU yielded if the
    /// running thread dropped behind a ready one.
    pub fn set_nice(&mut self, tid: ThreadId, nice: i32) {
        let old = self.platform.intr_disable();
        self.table.get_mut(tid).expect("unknown thread").set_nice(nice);
        let recomputed = match &mut self.engine {
            PolicyEngine::Mlfqs(mlfqs) => {
                mlfqs.refresh_priority(&mut self.table, &mut self.ready, tid);
                true
            }
            PolicyEngine::Donation(_) => false,
        };
        self.platform.intr_restore(old);

        if recomputed {
            self.maybe_yield_to_ready();
        }
    }

    pub fn nice_of(&self, tid: ThreadId) -> i32 {
        self.table.get(tid).expect("unknown thread").nice()
    }

    /// System load average scaled by 100, rounded. Zero unless the
    /// feedback policy governs.
    pub fn load_avg_x100(&self) -> i32 {
        match &self.engine {
            PolicyEngine::Mlfqs(mlfqs) => mlfqs.load_avg_x100(),
            PolicyEngine::Donation(_) => 0,
        }
    }

    /// A thread's recent CPU measure scaled by 100, rounded. Zero unless
    /// the feedback policy governs.
    pub fn recent_cpu_x100(&self, tid: ThreadId) -> i32 {
        match &self.engine {
            PolicyEngine::Mlfqs(_) => MlfqsState::recent_cpu_x100(&self.table, tid),
            PolicyEngine::Donation(_) => 0,
        }
    }

    // ── Introspection ───────────────────────────────────────────────────

    pub fn current_tid(&self) -> ThreadId {
        self.current
    }

    pub fn idle_tid(&self) -> Option<ThreadId> {
        self.idle
    }

    pub fn policy(&self) -> Policy {
        self.engine.kind()
    }

    /// Look up a live thread by id; Dying threads have left the
    /// all-threads set and are not returned.
    pub fn thread(&self, tid: ThreadId) -> Option<&Tcb> {
        self.table.get(tid).filter(|t| t.state().is_live())
    }

    /// Apply `f` to every live thread. Interrupts must be off.
    pub fn foreach(&mut self, mut f: impl FnMut(&mut Tcb)) {
        sched_assert!(
            self.platform.intr_level() == IntrLevel::Off,
            "thread sweep requires interrupts disabled"
        );
        for tid in self.table.live_tids() {
            f(self.table.get_mut(tid).unwrap());
        }
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn tick_stats(&self) -> TickStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    // ── Dispatch internals ──────────────────────────────────────────────

    /// Yield if a ready thread outranks the running one. Safe no-op from
    /// interrupt context, where preemption stays deferred to the tick path.
    fn maybe_yield_to_ready(&mut self) {
        if self.platform.in_interrupt() {
            return;
        }
        let outranked = self
            .ready
            .front_priority()
            .map_or(false, |p| p > self.current_priority());
        if outranked {
            self.yield_now();
        }
    }

    /// Pick the next thread and switch to it. Interrupts must be off and
    /// the outgoing thread's state already updated away from Running.
    fn schedule(&mut self) {
        sched_assert!(
            self.platform.intr_level() == IntrLevel::Off,
            "schedule requires interrupts disabled"
        );
        sched_assert!(
            self.table.get(self.current).unwrap().state() != ThreadState::Running,
            "schedule with the outgoing thread still Running"
        );

        let next = match self.ready.dequeue() {
            Some(tid) => tid,
            None => self.idle.expect("ready queue empty with no idle thread"),
        };

        let previous = if next != self.current {
            self.platform.switch(self.current, next)
        } else {
            None
        };
        self.finish_switch(next, previous);
    }

    /// Finalize a switch: mark the incoming thread Running, start its time
    /// slice, and reclaim the outgoing thread if it was Dying. A thread
    /// cannot free its own stack while executing on it, so reclamation
    /// always happens here, on the far side of the switch.
    fn finish_switch(&mut self, next: ThreadId, previous: Option<ThreadId>) {
        {
            let tcb = self.table.get_mut(next).unwrap();
            if tcb.state() == ThreadState::Blocked {
                // Only the idle thread may be dispatched out of Blocked.
                sched_assert!(
                    Some(next) == self.idle,
                    "blocked thread dispatched via the idle path"
                );
            }
            sched_assert!(
                validate_transition(tcb.state(), ThreadState::Running),
                "incoming thread in undispatchable state"
            );
            tcb.set_state(ThreadState::Running);
        }
        self.current = next;
        self.slice_ticks = 0;

        if let Some(prev) = previous {
            if prev != next {
                self.reclaim_if_dying(prev);
            }
        }
    }

    /// Free a Dying thread's storage. The boot thread's block did not come
    /// from the allocator and is left alone.
    fn reclaim_if_dying(&mut self, tid: ThreadId) {
        let dying = self
            .table
            .get(tid)
            .map_or(false, |t| t.state() == ThreadState::Dying);
        if !dying || tid == self.boot {
            return;
        }
        let mut tcb = self.table.remove(tid).unwrap();
        if let Some(block) = tcb.take_block() {
            self.platform.free_block(block);
        }
        log::debug!("scheduler: reclaimed thread '{}' (tid {})", tcb.name(), tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::platform::TcbBlock;
    use crate::scheduler::thread::{PRI_DEFAULT, PRI_MAX};
    use alloc::vec::Vec;

    struct MockPlatform {
        intr: IntrLevel,
        in_interrupt: bool,
        yield_requested: bool,
        blocks_free: usize,
        next_base: u64,
        switches: Vec<(ThreadId, ThreadId)>,
        freed: Vec<TcbBlock>,
    }

    impl MockPlatform {
        fn new() -> Self {
            Self {
                intr: IntrLevel::On,
                in_interrupt: false,
                yield_requested: false,
                blocks_free: 32,
                next_base: 0,
                switches: Vec::new(),
                freed: Vec::new(),
            }
        }

        fn without_memory() -> Self {
            Self {
                blocks_free: 0,
                ..Self::new()
            }
        }
    }

    impl Platform for MockPlatform {
        fn intr_disable(&mut self) -> IntrLevel {
            core::mem::replace(&mut self.intr, IntrLevel::Off)
        }

        fn intr_restore(&mut self, level: IntrLevel) {
            self.intr = level;
        }

        fn intr_level(&self) -> IntrLevel {
            self.intr
        }

        fn in_interrupt(&self) -> bool {
            self.in_interrupt
        }

        fn yield_on_return(&mut self) {
            self.yield_requested = true;
        }

        fn alloc_block(&mut self) -> Option<TcbBlock> {
            if self.blocks_free == 0 {
                return None;
            }
            self.blocks_free -= 1;
            self.next_base += 0x4000;
            Some(TcbBlock::new(self.next_base))
        }

        fn free_block(&mut self, block: TcbBlock) {
            self.freed.push(block);
        }

        fn switch(&mut self, current: ThreadId, next: ThreadId) -> Option<ThreadId> {
            self.switches.push((current, next));
            Some(current)
        }
    }

    fn entry(_arg: usize) {}

    fn booted(policy: Policy) -> Scheduler<MockPlatform> {
        Scheduler::new(MockPlatform::new(), policy, "main")
    }

    fn started(policy: Policy) -> Scheduler<MockPlatform> {
        let mut s = booted(policy);
        s.start(entry).unwrap();
        s
    }

    /// Drive one timer interrupt the way the timer collaborator would.
    fn tick(s: &mut Scheduler<MockPlatform>) {
        s.platform_mut().in_interrupt = true;
        s.platform_mut().intr = IntrLevel::Off;
        s.on_tick();
        s.platform_mut().in_interrupt = false;
        s.platform_mut().intr = IntrLevel::On;
    }

    /// Sleep the running thread; the real caller disables interrupts
    /// around the parking, as the timer wrapper does.
    fn sleep(s: &mut Scheduler<MockPlatform>, deadline: i64) {
        s.platform_mut().intr = IntrLevel::Off;
        s.sleep_until(deadline);
        s.platform_mut().intr = IntrLevel::On;
    }

    /// Exit the running thread. In a live kernel control never comes back,
    /// so interrupts are left disabled; the mock needs them re-armed.
    fn exit_current(s: &mut Scheduler<MockPlatform>) {
        s.exit();
        s.platform_mut().intr = IntrLevel::On;
    }

    #[test]
    fn boot_thread_is_adopted_as_running() {
        let s = booted(Policy::RoundRobin);
        let boot = s.current_tid();
        let tcb = s.thread(boot).unwrap();
        assert_eq!(tcb.name(), "main");
        assert_eq!(tcb.state(), ThreadState::Running);
        assert_eq!(s.policy(), Policy::RoundRobin);
        assert_eq!(s.ready_count(), 0);
    }

    #[test]
    fn highest_priority_thread_runs_first() {
        let mut s = booted(Policy::RoundRobin);
        let boot = s.current_tid();
        let low = s.spawn("low", 1, entry, 0).unwrap();
        let high = s.spawn("high", 5, entry, 0).unwrap();
        let mid = s.spawn("mid", 3, entry, 0).unwrap();

        // The boot thread still outranks them all; nothing switched yet.
        assert_eq!(s.current_tid(), boot);

        // Dropping the boot thread to the bottom hands the CPU over in
        // strict priority order: 5, then 3, then 1.
        s.set_base_priority(boot, PRI_MIN);
        assert_eq!(s.current_tid(), high);

        exit_current(&mut s);
        assert_eq!(s.current_tid(), mid);
        exit_current(&mut s);
        assert_eq!(s.current_tid(), low);
        exit_current(&mut s);
        assert_eq!(s.current_tid(), boot);
    }

    #[test]
    fn equal_priorities_run_in_spawn_order() {
        let mut s = booted(Policy::RoundRobin);
        let boot = s.current_tid();
        let first = s.spawn("first", 3, entry, 0).unwrap();
        let second = s.spawn("second", 3, entry, 0).unwrap();

        s.set_base_priority(boot, PRI_MIN);
        assert_eq!(s.current_tid(), first);
        exit_current(&mut s);
        assert_eq!(s.current_tid(), second);
    }

    #[test]
    fn spawning_a_stronger_thread_preempts_the_creator() {
        let mut s = booted(Policy::RoundRobin);
        let boot = s.current_tid();
        let strong = s.spawn("strong", 50, entry, 0).unwrap();

        assert_eq!(s.current_tid(), strong);
        assert!(s.ready.contains(boot));
    }

    #[test]
    fn sleeping_thread_wakes_exactly_at_its_deadline() {
        let mut s = started(Policy::RoundRobin);
        let boot = s.current_tid();
        let idle = s.idle_tid().unwrap();

        sleep(&mut s, 100);
        assert_eq!(s.current_tid(), idle);

        for _ in 1..=99 {
            tick(&mut s);
            s.platform_mut().yield_requested = false;
        }
        // Tick 99: the deadline has not arrived; nothing runnable.
        assert_eq!(s.current_tid(), idle);
        assert_eq!(s.ready_count(), 0);

        // Tick 100: the sleeper wakes, and the idle CPU is asked to yield.
        tick(&mut s);
        assert_eq!(s.ready_count(), 1);
        assert!(s.platform().yield_requested);

        s.yield_now();
        assert_eq!(s.current_tid(), boot);
        assert!(s.sleepers.is_empty());
        assert_eq!(s.thread(boot).unwrap().sleep_until(), None);

        // Further ticks must not wake it again.
        tick(&mut s);
        assert_eq!(s.ready_count(), 0);
    }

    #[test]
    fn early_unblock_cancels_the_sleep_deadline() {
        let mut s = started(Policy::RoundRobin);
        let boot = s.current_tid();

        sleep(&mut s, 100);
        assert!(!s.sleepers.is_empty());

        // A collaborator wakes the sleeper before its deadline.
        s.unblock(boot);
        assert!(s.sleepers.is_empty());
        s.yield_now();
        assert_eq!(s.current_tid(), boot);

        // The stale deadline must not wake it a second time.
        for _ in 1..=100 {
            tick(&mut s);
            s.platform_mut().yield_requested = false;
        }
        assert_eq!(s.current_tid(), boot);
        assert_eq!(s.ready_count(), 0);
    }

    #[test]
    fn idle_thread_never_enters_the_ready_queue() {
        let mut s = started(Policy::RoundRobin);
        let idle = s.idle_tid().unwrap();

        sleep(&mut s, 5);
        assert_eq!(s.current_tid(), idle);
        for _ in 1..=5 {
            tick(&mut s);
        }
        s.yield_now();

        assert!(!s.ready.contains(idle));
        assert_eq!(s.thread(idle).unwrap().state(), ThreadState::Blocked);
    }

    #[test]
    fn donation_flows_through_the_hooks() {
        let mut s = booted(Policy::RoundRobin);
        let boot = s.current_tid();

        // The boot thread (priority 31) holds a lock.
        s.on_acquired(boot, 7);

        // A stronger thread appears, preempts, and goes to wait on it.
        let waiter = s.spawn("waiter", 50, entry, 0).unwrap();
        assert_eq!(s.current_tid(), waiter);

        s.on_wait_begin(waiter, 7);
        assert_eq!(s.priority_of(boot), 50);

        // The lock collaborator now blocks the waiter; the donated boot
        // thread gets the CPU back.
        s.platform_mut().intr = IntrLevel::Off;
        s.block();
        s.platform_mut().intr = IntrLevel::On;
        assert_eq!(s.current_tid(), boot);

        // Release: the donation evaporates and the woken waiter wins the
        // CPU back on the collaborator's preemption check.
        s.on_released(boot, 7);
        assert_eq!(s.priority_of(boot), 31);
        s.unblock(waiter);
        s.on_acquired(waiter, 7);
        s.yield_now();
        assert_eq!(s.current_tid(), waiter);
    }

    #[test]
    fn set_base_priority_with_current_value_is_inert() {
        let mut s = booted(Policy::RoundRobin);
        let boot = s.current_tid();
        s.spawn("peer", 31, entry, 0).unwrap();

        let switches_before = s.platform().switches.len();
        s.set_base_priority(boot, 31);

        assert_eq!(s.platform().switches.len(), switches_before);
        assert_eq!(s.current_tid(), boot);
        assert_eq!(s.priority_of(boot), 31);
    }

    #[test]
    fn time_slice_exhaustion_requests_preemption() {
        let mut s = booted(Policy::RoundRobin);
        let boot = s.current_tid();
        let peer = s.spawn("peer", 31, entry, 0).unwrap();

        for _ in 0..TIME_SLICE - 1 {
            tick(&mut s);
            assert!(!s.platform().yield_requested);
        }
        tick(&mut s);
        assert!(s.platform().yield_requested);

        // Round-robin among equals: the peer was enqueued first.
        s.yield_now();
        assert_eq!(s.current_tid(), peer);
        assert!(s.ready.contains(boot));
    }

    #[test]
    fn spawn_fails_cleanly_when_memory_is_exhausted() {
        let mut s = Scheduler::new(MockPlatform::without_memory(), Policy::RoundRobin, "main");
        assert_eq!(
            s.spawn("worker", 31, entry, 0),
            Err(SchedulerError::OutOfMemory)
        );
        assert_eq!(s.ready_count(), 0);
    }

    #[test]
    fn exited_thread_storage_is_reclaimed_after_the_switch() {
        let mut s = booted(Policy::RoundRobin);
        let boot = s.current_tid();
        let strong = s.spawn("strong", 50, entry, 0).unwrap();
        assert_eq!(s.current_tid(), strong);

        exit_current(&mut s);
        assert_eq!(s.current_tid(), boot);
        assert!(s.thread(strong).is_none());
        assert_eq!(s.platform().freed.len(), 1);
    }

    #[test]
    #[should_panic(expected = "Invariant violated")]
    fn unblocking_a_ready_thread_is_fatal() {
        let mut s = booted(Policy::RoundRobin);
        let t = s.spawn("worker", 1, entry, 0).unwrap();
        s.unblock(t);
    }

    #[test]
    fn mlfqs_ignores_manual_priorities_and_donation() {
        let mut s = booted(Policy::Mlfqs);
        let boot = s.current_tid();

        s.set_base_priority(boot, 50);
        assert_eq!(s.priority_of(boot), PRI_DEFAULT);

        // Fresh threads start at the formula's optimum and outrank the
        // aged boot thread regardless of the requested priority.
        let worker = s.spawn("worker", 1, entry, 0).unwrap();
        assert_eq!(s.priority_of(worker), PRI_MAX);
        assert_eq!(s.current_tid(), worker);

        // Donation hooks are inert under the feedback policy.
        s.on_acquired(worker, 7);
        s.on_wait_begin(boot, 7);
        assert_eq!(s.priority_of(worker), PRI_MAX);
    }

    #[test]
    fn mlfqs_ages_the_running_thread_every_four_ticks() {
        let mut s = booted(Policy::Mlfqs);

        for _ in 0..4 {
            tick(&mut s);
        }
        // recent_cpu grew to 4; priority = 63 - 4/4 - 0 = 62.
        assert_eq!(s.current_priority(), PRI_MAX - 1);
        assert_eq!(s.recent_cpu_x100(s.current_tid()), 400);
    }

    #[test]
    fn mlfqs_load_average_tracks_the_runnable_count() {
        let mut s = booted(Policy::Mlfqs);
        assert_eq!(s.load_avg_x100(), 0);

        for _ in 0..100 {
            tick(&mut s);
        }
        // One runnable thread for one second: load_avg = 1/60.
        assert_eq!(s.load_avg_x100(), 2);
    }

    #[test]
    fn mlfqs_set_nice_reshuffles_priorities() {
        let mut s = booted(Policy::Mlfqs);
        let boot = s.current_tid();
        let peer = s.spawn("peer", 31, entry, 0).unwrap();
        assert_eq!(s.current_tid(), peer);

        // Boot sits in the ready queue at PRI_DEFAULT; being nicer drops
        // the running peer below it.
        s.set_nice(peer, 20);
        assert_eq!(s.nice_of(peer), 20);
        assert_eq!(s.current_tid(), boot);
        assert_eq!(s.priority_of(peer), PRI_MAX - 40);
    }

    #[test]
    fn round_robin_reports_zero_feedback_statistics() {
        let s = booted(Policy::RoundRobin);
        assert_eq!(s.load_avg_x100(), 0);
        assert_eq!(s.recent_cpu_x100(s.current_tid()), 0);
    }

    #[test]
    fn ticks_are_attributed_to_idle_kernel_and_external() {
        let mut s = started(Policy::RoundRobin);

        tick(&mut s); // kernel: the boot thread is running
        s.on_interrupt_enter();
        tick(&mut s); // external: nested in a device interrupt
        s.on_interrupt_exit();

        sleep(&mut s, 1000);
        tick(&mut s); // idle

        let stats = s.tick_stats();
        assert_eq!(stats.total_ticks, 3);
        assert_eq!(stats.kernel_ticks, 1);
        assert_eq!(stats.external_ticks, 1);
        assert_eq!(stats.idle_ticks, 1);
        assert_eq!(stats.external_interrupts, 1);
    }
}
