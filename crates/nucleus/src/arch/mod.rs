// Processor-visible state of the simulated MIPS-like machine:
// the saved-state record, register aliases, and Cause/Status decoding.

pub mod mmio;

use bitflags::bitflags;

use crate::machine::Machine;

/// Number of general-register slots in a saved state (including HI/LO).
pub const STATE_GPR_LEN: usize = 31;

/// Size in bytes of a saved processor state on the bus: entry-hi, cause,
/// status, pc, then the register file.
pub const STATE_SIZE: u32 = 4 * (4 + STATE_GPR_LEN as u32);

/// Register-file aliases. These index [`ProcessorState::gpr`] and are part
/// of the external ABI: syscall arguments arrive in `a0..a3`, results leave
/// in `v0`.
pub mod reg {
    pub const AT: usize = 0;
    pub const V0: usize = 1;
    pub const V1: usize = 2;
    pub const A0: usize = 3;
    pub const A1: usize = 4;
    pub const A2: usize = 5;
    pub const A3: usize = 6;
    pub const T0: usize = 7;
    pub const T7: usize = 14;
    pub const S0: usize = 15;
    pub const S7: usize = 22;
    pub const T8: usize = 23;
    pub const T9: usize = 24;
    pub const GP: usize = 25;
    pub const SP: usize = 26;
    pub const FP: usize = 27;
    pub const RA: usize = 28;
    pub const HI: usize = 29;
    pub const LO: usize = 30;
}

bitflags! {
    /// Status register bits the nucleus manipulates.
    ///
    /// The "previous" bits are what the processor restores when a saved
    /// state is loaded, so they describe the mode the trapped code was
    /// running in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u32 {
        const INT_ENABLE_CURRENT = 1 << 0;
        const USER_MODE_CURRENT = 1 << 1;
        const INT_ENABLE_PREV = 1 << 2;
        const USER_MODE_PREV = 1 << 3;
        /// Interrupt mask, one bit per line.
        const INT_MASK_ALL = 0xFF << 8;
        /// Processor-local timer enable.
        const TIMER_ENABLE = 1 << 27;
    }
}

// Cause register layout: exception code in bits 2..6, pending-interrupt
// bits per line in bits 8..15.
pub const CAUSE_EXC_MASK: u32 = 0x7C;
pub const CAUSE_EXC_SHIFT: u32 = 2;
pub const CAUSE_IP_SHIFT: u32 = 8;

pub const EXC_INTERRUPT: u32 = 0;
pub const EXC_TLB_MOD: u32 = 1;
pub const EXC_TLB_LOAD: u32 = 2;
pub const EXC_TLB_STORE: u32 = 3;
pub const EXC_ADDR_LOAD: u32 = 4;
pub const EXC_SYSCALL: u32 = 8;
pub const EXC_BREAKPOINT: u32 = 9;
pub const EXC_RESERVED_INSTRUCTION: u32 = 10;

/// Exception code field of a Cause word.
#[inline]
pub fn exc_code(cause: u32) -> u32 {
    (cause & CAUSE_EXC_MASK) >> CAUSE_EXC_SHIFT
}

/// Rewrite the exception code field of a Cause word.
#[inline]
pub fn set_exc_code(cause: u32, code: u32) -> u32 {
    (cause & !CAUSE_EXC_MASK) | (code << CAUSE_EXC_SHIFT)
}

/// Pending-interrupt bit for one line, in Cause format.
#[inline]
pub const fn ip_bit(line: u32) -> u32 {
    1 << (CAUSE_IP_SHIFT + line)
}

/// Whether an interrupt is pending on `line` in the given Cause word.
#[inline]
pub fn ip_pending(cause: u32, line: u32) -> bool {
    cause & ip_bit(line) != 0
}

/// A full processor-state snapshot: what the firmware saves on every trap
/// and what a state load resumes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorState {
    /// Address-space identifier.
    pub entry_hi: u32,
    pub cause: u32,
    pub status: u32,
    pub pc: u32,
    pub gpr: [u32; STATE_GPR_LEN],
}

impl ProcessorState {
    pub const fn zeroed() -> Self {
        Self {
            entry_hi: 0,
            cause: 0,
            status: 0,
            pc: 0,
            gpr: [0; STATE_GPR_LEN],
        }
    }

    #[inline]
    pub fn a0(&self) -> u32 {
        self.gpr[reg::A0]
    }

    #[inline]
    pub fn a1(&self) -> u32 {
        self.gpr[reg::A1]
    }

    #[inline]
    pub fn a2(&self) -> u32 {
        self.gpr[reg::A2]
    }

    #[inline]
    pub fn a3(&self) -> u32 {
        self.gpr[reg::A3]
    }

    #[inline]
    pub fn v0(&self) -> u32 {
        self.gpr[reg::V0]
    }

    #[inline]
    pub fn set_v0(&mut self, value: u32) {
        self.gpr[reg::V0] = value;
    }

    #[inline]
    pub fn sp(&self) -> u32 {
        self.gpr[reg::SP]
    }

    #[inline]
    pub fn set_sp(&mut self, value: u32) {
        self.gpr[reg::SP] = value;
    }

    /// Set the program counter and the secondary jump register together,
    /// as position-independent entry conventions require.
    pub fn set_entry(&mut self, entry: u32) {
        self.pc = entry;
        self.gpr[reg::T9] = entry;
    }

    /// Read a saved state from the bus at `addr`.
    pub fn load_from(m: &impl Machine, addr: u32) -> Self {
        let mut state = Self::zeroed();
        state.entry_hi = m.read_word(addr);
        state.cause = m.read_word(addr + 4);
        state.status = m.read_word(addr + 8);
        state.pc = m.read_word(addr + 12);
        for (i, slot) in state.gpr.iter_mut().enumerate() {
            *slot = m.read_word(addr + 16 + 4 * i as u32);
        }
        state
    }

    /// Write this state to the bus at `addr`.
    pub fn store_to(&self, m: &mut impl Machine, addr: u32) {
        m.write_word(addr, self.entry_hi);
        m.write_word(addr + 4, self.cause);
        m.write_word(addr + 8, self.status);
        m.write_word(addr + 12, self.pc);
        for (i, slot) in self.gpr.iter().enumerate() {
            m.write_word(addr + 16 + 4 * i as u32, *slot);
        }
    }
}

impl Default for ProcessorState {
    fn default() -> Self {
        Self::zeroed()
    }
}
