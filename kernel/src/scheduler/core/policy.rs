//! Scheduling policy selection
//!
//! One of two mutually exclusive priority policies is chosen at boot and
//! fixed for the life of the system: strict priority with donation, or the
//! multi-level feedback queue. While the feedback policy governs, donation
//! is suppressed and effective priorities come solely from the usage
//! formulas.

use core::fmt;

use super::donation::DonationEngine;
use super::mlfqs::MlfqsState;

/// Boot-time scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Strict priority scheduling with priority donation across locks;
    /// round-robin among equal priorities.
    RoundRobin,

    /// Multi-level feedback queue: priorities recomputed from recent CPU
    /// usage and niceness.
    Mlfqs,
}

impl Policy {
    /// True when the feedback policy owns priority computation.
    pub fn is_mlfqs(self) -> bool {
        matches!(self, Self::Mlfqs)
    }

    /// True when manual priorities and donation govern.
    pub fn donation_enabled(self) -> bool {
        matches!(self, Self::RoundRobin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Mlfqs => "mlfqs",
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The selected policy's engine state. Exactly one engine exists for the
/// life of the system; the dispatcher routes priority events to whichever
/// variant was chosen at boot, so the two policies never interleave.
pub enum PolicyEngine {
    /// Manual priorities, donation across locks.
    Donation(DonationEngine),

    /// Usage-derived priorities, donation suppressed.
    Mlfqs(MlfqsState),
}

impl PolicyEngine {
    pub fn for_policy(policy: Policy) -> Self {
        match policy {
            Policy::RoundRobin => Self::Donation(DonationEngine::new()),
            Policy::Mlfqs => Self::Mlfqs(MlfqsState::new()),
        }
    }

    pub fn kind(&self) -> Policy {
        match self {
            Self::Donation(_) => Policy::RoundRobin,
            Self::Mlfqs(_) => Policy::Mlfqs,
        }
    }
}
