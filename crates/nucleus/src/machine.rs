// The firmware-facing contract the nucleus runs against.

use crate::arch::ProcessorState;

/// Machine operations the firmware provides to the nucleus.
///
/// Word access covers all physical memory: the firmware pages (saved state,
/// pass-up vector), the bus and device registers, and RAM. The interval
/// timer is an ordinary bus register; only the time-of-day clock and the
/// processor-local timer need dedicated operations.
pub trait Machine {
    fn read_word(&self, addr: u32) -> u32;
    fn write_word(&mut self, addr: u32, value: u32);

    /// Snapshot the time-of-day clock, in nanoseconds since boot.
    fn tod(&self) -> u64;

    /// Arm the processor-local timer. Writing acknowledges a pending
    /// slice-timer interrupt.
    fn set_timer(&mut self, ns: u64);

    /// Remaining time on the processor-local timer.
    fn timer(&self) -> u64;
}

/// A minimal execution context: where pass-up enters the support layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub stack_ptr: u32,
    pub status: u32,
    pub pc: u32,
}

impl Context {
    /// Read a context descriptor from the bus at `addr`.
    pub fn load_from(m: &impl Machine, addr: u32) -> Self {
        Self {
            stack_ptr: m.read_word(addr),
            status: m.read_word(addr + 4),
            pc: m.read_word(addr + 8),
        }
    }
}

/// What the trap path decided the machine should do next.
///
/// Every nucleus entry runs to completion and ends in exactly one of these;
/// the executor (simulator, test harness) turns it into the corresponding
/// machine operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Resume execution of the given processor state.
    Load(ProcessorState),
    /// Enter a support-layer handler context.
    LoadContext(Context),
    /// Nothing runnable, but device events are outstanding: sleep with
    /// interrupts enabled until one arrives.
    Wait,
    /// Orderly shutdown: the last process terminated.
    Halt,
    /// Unrecoverable nucleus condition.
    Panic(&'static str),
}
