//! An educational operating-system nucleus for a MIPS-like simulated
//! machine.
//!
//! The nucleus supplies the lowest layer of the system: a statically sized
//! process pool with queue and tree structure ([`process::pcb`]), a sorted
//! active-semaphore list ([`process::asl`]), a round-robin scheduler with
//! preemptive slicing ([`sched`]), a unified trap entry with eight system
//! calls ([`kernel`], [`syscall`]), and device-interrupt acknowledgement
//! wired to synchronous I/O semaphores ([`interrupts`]).
//!
//! All machine access goes through the [`machine::Machine`] trait, the
//! contract the firmware provides: word-addressed memory, the time-of-day
//! clock, and the processor-local timer. [`sim::SimMachine`] implements it
//! for host execution, which is how the test suite drives every trap path.
//!
//! Every trap entry runs to completion and returns a
//! [`machine::Disposition`] telling the executor what to do next: resume a
//! state, enter a support-layer context, idle, halt, or panic.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod error;
pub mod interrupts;
pub mod kernel;
pub mod machine;
pub mod process;
pub mod sched;
pub mod sim;
pub mod syscall;

pub use arch::ProcessorState;
pub use error::{KernelError, Result};
pub use kernel::Nucleus;
pub use machine::{Context, Disposition, Machine};
pub use process::{PcbId, SemAddr, MAXPROC};
pub use sim::SimMachine;
