//! State - Thread state machine
//!
//! Manages thread lifecycle and state transitions

use core::fmt;

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is ready to run (resident in the ready queue, or the parked
    /// idle thread)
    Ready,

    /// Thread is currently running
    Running,

    /// Thread is blocked: sleeping until a deadline tick, or waiting on a
    /// synchronization primitive
    Blocked,

    /// Thread has exited; its storage is reclaimed after the next switch
    Dying,
}

impl ThreadState {
    /// Check if state is schedulable
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the thread still participates in global sweeps
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Dying)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Dying => write!(f, "Dying"),
        }
    }
}

/// Validate state transition
///
/// New threads are created Blocked so they cannot run before they are fully
/// initialized; the creator unblocks them into the ready queue. The
/// Blocked -> Running edge exists only for the idle thread, which is
/// dispatched straight off the empty-ready-queue path.
pub fn validate_transition(from: ThreadState, to: ThreadState) -> bool {
    use ThreadState::*;

    match (from, to) {
        // Blocked -> Ready (unblock, wake)
        (Blocked, Ready) => true,

        // Ready -> Running (dispatch)
        (Ready, Running) => true,

        // Running -> Ready (yield, preemption)
        (Running, Ready) => true,

        // Running -> Blocked (sleep, lock wait)
        (Running, Blocked) => true,

        // Running -> Dying (exit, terminal)
        (Running, Dying) => true,

        // Blocked -> Running (idle thread dispatched from the empty-queue
        // path; the dispatcher asserts the thread is the idle thread)
        (Blocked, Running) => true,

        // All other transitions invalid
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ThreadState::*;

    #[test]
    fn lifecycle_edges_are_valid() {
        assert!(validate_transition(Blocked, Ready));
        assert!(validate_transition(Ready, Running));
        assert!(validate_transition(Running, Ready));
        assert!(validate_transition(Running, Blocked));
        assert!(validate_transition(Running, Dying));
    }

    #[test]
    fn dying_is_terminal() {
        for to in [Ready, Running, Blocked, Dying] {
            assert!(!validate_transition(Dying, to));
        }
    }

    #[test]
    fn ready_cannot_block_without_running() {
        assert!(!validate_transition(Ready, Blocked));
        assert!(!validate_transition(Ready, Dying));
    }
}
