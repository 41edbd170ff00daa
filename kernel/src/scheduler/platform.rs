//! Platform - external collaborator interface
//!
//! The scheduling core owns no hardware. Context switching, interrupt
//! control, and TCB-block allocation are supplied by the embedding kernel
//! through this trait; the core calls the hooks and trusts their contracts.

use super::thread::ThreadId;

/// Interrupt state, as seen and restored by the core's critical sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    /// Interrupts enabled
    On,
    /// Interrupts disabled
    Off,
}

/// An opaque, zeroed, page-aligned block backing one thread's control block
/// and stack. Obtained from and returned to the platform allocator; the
/// core never dereferences it.
#[derive(Debug, PartialEq, Eq)]
pub struct TcbBlock(u64);

impl TcbBlock {
    pub const fn new(base: u64) -> Self {
        Self(base)
    }

    pub const fn base(&self) -> u64 {
        self.0
    }
}

/// The services the embedding kernel provides to the scheduling core.
///
/// Single CPU model: all scheduler state is protected by disabling
/// interrupts, so `intr_disable`/`intr_restore` bracket every critical
/// section and there is no separate lock.
pub trait Platform {
    /// Disable interrupts, returning the previous level.
    fn intr_disable(&mut self) -> IntrLevel;

    /// Restore a previously saved interrupt level.
    fn intr_restore(&mut self, level: IntrLevel);

    /// Current interrupt level.
    fn intr_level(&self) -> IntrLevel;

    /// True while executing in interrupt context.
    fn in_interrupt(&self) -> bool;

    /// Request a yield at the next safe point after the current interrupt
    /// returns. Ticks run in interrupt context, so preemption is deferred,
    /// never performed inside the handler.
    fn yield_on_return(&mut self);

    /// Obtain a zeroed page-aligned block for a new thread, or `None` when
    /// memory is exhausted.
    fn alloc_block(&mut self) -> Option<TcbBlock>;

    /// Return a terminated thread's block. Never called for the boot
    /// thread, whose block was not obtained from this allocator.
    fn free_block(&mut self, block: TcbBlock);

    /// Switch from `current` to `next`; both sides' register save areas are
    /// owned by the platform. Returns the thread that occupied the CPU
    /// before this switch, used for deferred reclamation. Invoked only with
    /// interrupts disabled.
    fn switch(&mut self, current: ThreadId, next: ThreadId) -> Option<ThreadId>;
}
