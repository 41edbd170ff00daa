//! MLFQS accounting engine
//!
//! The multi-level feedback queue scheduler derives every thread's priority
//! from measured CPU usage instead of manual assignment:
//!
//! - each tick, the running thread's `recent_cpu` grows by one;
//! - each second, the system load average decays toward the number of
//!   runnable threads and every thread's `recent_cpu` decays by a factor
//!   derived from it;
//! - every fourth tick, the running thread's priority is recomputed as
//!   `PRI_MAX - recent_cpu/4 - nice*2`, clamped into the priority range.
//!
//! All fractional math uses the scheduler's fixed-point type; there is no
//! FPU in interrupt context.

use super::super::fixed::Fixed;
use super::super::thread::{Priority, ThreadId, ThreadState, ThreadTable, PRI_MAX, PRI_MIN};
use super::ready_queue::ReadyQueue;

/// Ticks per second of the timer the dispatcher is driven by.
pub const TIMER_FREQ: i64 = 100;

/// Ticks between recomputations of the running thread's priority.
pub const PRIORITY_RECOMPUTE_INTERVAL: i64 = 4;

static_assertions::const_assert!(PRIORITY_RECOMPUTE_INTERVAL > 0);
static_assertions::const_assert!(TIMER_FREQ % PRIORITY_RECOMPUTE_INTERVAL == 0);

/// Feedback-policy accumulator state.
pub struct MlfqsState {
    /// Decayed average of the runnable thread count. Defined only while
    /// the feedback policy governs; never reset after boot.
    load_avg: Fixed,
}

impl MlfqsState {
    pub const fn new() -> Self {
        Self {
            load_avg: Fixed::ZERO,
        }
    }

    /// Per-tick hook: charge the running thread one tick of CPU. The idle
    /// thread is never charged.
    pub fn tick_increment(&self, table: &mut ThreadTable, running: ThreadId, idle: ThreadId) {
        if running == idle {
            return;
        }
        let tcb = table.get_mut(running).expect("running thread not in table");
        tcb.set_recent_cpu(tcb.recent_cpu().add_int(1));
    }

    /// Per-second hook: refresh `load_avg`, decay every live thread's
    /// `recent_cpu`, and recompute its priority.
    pub fn per_second(
        &mut self,
        table: &mut ThreadTable,
        ready: &mut ReadyQueue,
        running: ThreadId,
        idle: ThreadId,
    ) {
        // Runnable threads: the ready queue plus the running thread unless
        // the CPU is idle.
        let ready_threads = ready.len() as i32 + i32::from(running != idle);

        // load_avg = (59/60)*load_avg + (1/60)*ready_threads
        self.load_avg = self.load_avg.mul_int(59).div_int(60)
            + Fixed::from_int(ready_threads).div_int(60);

        // recent_cpu = (2*load_avg)/(2*load_avg + 1) * recent_cpu + nice
        let twice_load = self.load_avg.mul_int(2);
        let decay = twice_load.div(twice_load.add_int(1));

        for tid in table.live_tids() {
            if tid == idle {
                continue;
            }
            {
                let tcb = table.get_mut(tid).expect("live thread vanished");
                let decayed = decay.mul(tcb.recent_cpu()).add_int(tcb.nice());
                tcb.set_recent_cpu(decayed);
            }
            self.refresh_priority(table, ready, tid);
        }
    }

    /// Recompute one thread's priority from its usage statistics and re-file
    /// it in the ready queue when resident. Returns the new priority.
    pub fn refresh_priority(
        &self,
        table: &mut ThreadTable,
        ready: &mut ReadyQueue,
        tid: ThreadId,
    ) -> Priority {
        let (priority, state) = {
            let tcb = table.get_mut(tid).expect("thread not in table");
            let p = Self::priority_for(tcb.recent_cpu(), tcb.nice());
            tcb.set_effective_priority(p);
            (p, tcb.state())
        };
        if state == ThreadState::Ready && ready.contains(tid) {
            ready.reorder(tid, priority);
        }
        priority
    }

    /// The feedback priority formula, clamped into `[PRI_MIN, PRI_MAX]`.
    pub fn priority_for(recent_cpu: Fixed, nice: i32) -> Priority {
        let raw = (Fixed::from_int(PRI_MAX) - recent_cpu.div_int(4))
            .sub_int(nice * 2)
            .trunc();
        raw.clamp(PRI_MIN, PRI_MAX)
    }

    /// System load average scaled by 100 and rounded, for observability.
    pub fn load_avg_x100(&self) -> i32 {
        self.load_avg.mul_int(100).round()
    }

    /// A thread's `recent_cpu` scaled by 100 and rounded.
    pub fn recent_cpu_x100(table: &ThreadTable, tid: ThreadId) -> i32 {
        let tcb = table.get(tid).expect("thread not in table");
        tcb.recent_cpu().mul_int(100).round()
    }
}

impl Default for MlfqsState {
    fn default() -> Self {
        Self::new()
    }
}
