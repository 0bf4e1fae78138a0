// Kernel error definitions

/// Errors surfaced by nucleus primitives.
///
/// These are internal conditions; syscall-visible failures keep their ABI
/// encodings (e.g. `-1` in `v0` when process creation fails).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The fixed process-control-block pool has no free entry.
    PcbPoolExhausted,
    /// The fixed semaphore-descriptor pool has no free entry.
    SemdPoolExhausted,
    /// The named process is not blocked where the caller claimed.
    NotBlocked,
}

impl KernelError {
    /// Short static description, for diagnostics.
    pub fn description(self) -> &'static str {
        match self {
            KernelError::PcbPoolExhausted => "process pool exhausted",
            KernelError::SemdPoolExhausted => "semaphore descriptor pool exhausted",
            KernelError::NotBlocked => "process not blocked here",
        }
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
