//! Statistics - tick and interrupt accounting
//!
//! Counters are written only from tick context or by the running thread,
//! always with interrupts disabled, so plain fields are torn-read safe on
//! the single CPU.

/// Tick and interrupt counters kept by the dispatcher.
pub struct TickStats {
    total_ticks: i64,
    idle_ticks: i64,
    kernel_ticks: i64,
    external_ticks: i64,
    external_interrupts: u64,
    intr_nesting: u32,
}

impl TickStats {
    pub const fn new() -> Self {
        Self {
            total_ticks: 0,
            idle_ticks: 0,
            kernel_ticks: 0,
            external_ticks: 0,
            external_interrupts: 0,
            intr_nesting: 0,
        }
    }

    /// Account one timer tick. Returns the new tick count.
    pub fn record_tick(&mut self, idle: bool) -> i64 {
        self.total_ticks += 1;
        if idle {
            self.idle_ticks += 1;
        } else if self.intr_nesting > 0 {
            // The tick landed while a non-timer interrupt was in progress.
            self.external_ticks += 1;
        } else {
            self.kernel_ticks += 1;
        }
        self.total_ticks
    }

    /// A non-timer interrupt began.
    pub fn interrupt_enter(&mut self) {
        self.intr_nesting += 1;
        self.external_interrupts += 1;
    }

    /// A non-timer interrupt finished.
    pub fn interrupt_exit(&mut self) {
        crate::sched_assert!(self.intr_nesting > 0, "interrupt exit without enter");
        self.intr_nesting -= 1;
    }

    pub fn total_ticks(&self) -> i64 {
        self.total_ticks
    }

    pub fn snapshot(&self) -> TickStatsSnapshot {
        TickStatsSnapshot {
            total_ticks: self.total_ticks,
            idle_ticks: self.idle_ticks,
            kernel_ticks: self.kernel_ticks,
            external_ticks: self.external_ticks,
            external_interrupts: self.external_interrupts,
        }
    }
}

impl Default for TickStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStatsSnapshot {
    pub total_ticks: i64,
    pub idle_ticks: i64,
    pub kernel_ticks: i64,
    pub external_ticks: i64,
    pub external_interrupts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_attribute_to_idle_or_kernel() {
        let mut stats = TickStats::new();
        stats.record_tick(true);
        stats.record_tick(false);
        stats.record_tick(false);

        let snap = stats.snapshot();
        assert_eq!(snap.total_ticks, 3);
        assert_eq!(snap.idle_ticks, 1);
        assert_eq!(snap.kernel_ticks, 2);
        assert_eq!(snap.external_ticks, 0);
    }

    #[test]
    fn nested_interrupt_ticks_count_as_external() {
        let mut stats = TickStats::new();
        stats.interrupt_enter();
        stats.record_tick(false);
        stats.interrupt_exit();
        stats.record_tick(false);

        let snap = stats.snapshot();
        assert_eq!(snap.external_ticks, 1);
        assert_eq!(snap.kernel_ticks, 1);
        assert_eq!(snap.external_interrupts, 1);
    }

    #[test]
    #[should_panic(expected = "Invariant violated")]
    fn unbalanced_interrupt_exit_is_fatal() {
        let mut stats = TickStats::new();
        stats.interrupt_exit();
    }
}
