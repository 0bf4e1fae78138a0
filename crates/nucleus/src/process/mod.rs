// Process records and the structures that hold them.

pub mod asl;
pub mod pcb;

pub use asl::Asl;
pub use pcb::{Pcb, PcbId, PcbPool, ProcQueue, MAXPROC};

/// Bus address of a semaphore cell. Semaphores are plain signed words in
/// machine memory; their addresses double as sort keys on the active
/// semaphore list.
pub type SemAddr = u32;
