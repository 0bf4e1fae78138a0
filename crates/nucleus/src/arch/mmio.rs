// Physical address map of the machine bus: firmware pages, bus registers,
// the device register bank, and the nucleus data area.

use super::STATE_SIZE;

/// Page where the firmware saves the processor state on every trap.
pub const BIOS_DATA_PAGE: u32 = 0x0FFF_F000;

/// Firmware table of handler entry points and stacks, written once at boot.
pub const PASS_UP_VECTOR: u32 = 0x0FFF_F900;
pub const PUV_TLB_REFILL_HANDLER: u32 = 0x0;
pub const PUV_TLB_REFILL_STACK: u32 = 0x4;
pub const PUV_EXCEPTION_HANDLER: u32 = 0x8;
pub const PUV_EXCEPTION_STACK: u32 = 0xC;

// Bus registers.
pub const RAM_BASE_REG: u32 = 0x1000_0000;
pub const RAM_SIZE_REG: u32 = 0x1000_0004;
pub const TOD_LO_REG: u32 = 0x1000_001C;
pub const INTERVAL_TIMER_REG: u32 = 0x1000_0020;
pub const TIMESCALE_REG: u32 = 0x1000_0024;

/// Interrupting-device bitmaps, one word per line 3..=7.
pub const INT_BITMAP_BASE: u32 = 0x1000_0040;

/// Device register bank: 5 lines x 8 devices x 4 words.
pub const DEV_REG_BASE: u32 = 0x1000_0054;

pub const FIRST_DEV_LINE: u32 = 3;
pub const TERMINAL_LINE: u32 = 7;
pub const DEV_LINES: u32 = 5;
pub const DEVS_PER_LINE: u32 = 8;

/// Interrupt line of the processor-local slice timer.
pub const LINE_LOCAL_TIMER: u32 = 1;
/// Interrupt line of the interval timer backing the pseudo-clock.
pub const LINE_INTERVAL_TIMER: u32 = 2;

#[inline]
pub const fn int_bitmap_addr(line: u32) -> u32 {
    INT_BITMAP_BASE + (line - FIRST_DEV_LINE) * 4
}

#[inline]
pub const fn dev_reg_addr(line: u32, dev: u32) -> u32 {
    DEV_REG_BASE + (line - FIRST_DEV_LINE) * 0x80 + dev * 0x10
}

// Device register fields.
pub const DEV_STATUS: u32 = 0x0;
pub const DEV_COMMAND: u32 = 0x4;
pub const DEV_DATA0: u32 = 0x8;
pub const DEV_DATA1: u32 = 0xC;

// Terminals expose two sub-devices through the same four words.
pub const TERM_RECV_STATUS: u32 = DEV_STATUS;
pub const TERM_RECV_COMMAND: u32 = DEV_COMMAND;
pub const TERM_TRANSM_STATUS: u32 = DEV_DATA0;
pub const TERM_TRANSM_COMMAND: u32 = DEV_DATA1;

pub const CMD_ACK: u32 = 1;
pub const STATUS_READY: u32 = 1;
pub const STATUS_CHAR_TRANSMITTED: u32 = 5;
pub const STATUS_CHAR_RECEIVED: u32 = 5;
pub const TERM_STATUS_MASK: u32 = 0xFF;

/// Start of physical RAM.
pub const RAM_START: u32 = 0x2000_0000;

/// Top of the kernel stack; the stack occupies the first RAM frame.
pub const KERNEL_STACK_TOP: u32 = 0x2000_1000;

// Symbolic nucleus entry points recorded in the pass-up vector. The
// simulator never jumps through these; they stand in for the addresses the
// linker would assign.
pub const TLB_REFILL_ENTRY: u32 = 0x2000_1100;
pub const EXCEPTION_ENTRY: u32 = 0x2000_1180;

// The nucleus static data area sits above the kernel stack and holds the
// device semaphore cells: one per device on lines 3..6, two per terminal
// (receive then transmit), and one for the pseudo-clock.
pub const DEVICE_SEM_BASE: u32 = 0x2000_1000;
pub const DEVICE_SEM_COUNT: usize = 49;
pub const PSEUDO_CLOCK_SEM: usize = DEVICE_SEM_COUNT - 1;

#[inline]
pub const fn device_sem_addr(index: usize) -> u32 {
    DEVICE_SEM_BASE + 4 * index as u32
}

pub const PSEUDO_CLOCK_SEM_ADDR: u32 = device_sem_addr(PSEUDO_CLOCK_SEM);

/// Whether `addr` is one of the device or pseudo-clock semaphore cells.
/// Blocking on these is "soft" blocking: an external event will end it.
#[inline]
pub fn is_device_sem(addr: u32) -> bool {
    (DEVICE_SEM_BASE..device_sem_addr(DEVICE_SEM_COUNT)).contains(&addr)
}

// Support-structure layout, consumed by pass-up. A support structure is an
// ASID word, two saved-state slots, then two entry contexts.
pub const PAGE_FAULT_INDEX: usize = 0;
pub const GENERAL_INDEX: usize = 1;
pub const CONTEXT_SIZE: u32 = 12;

#[inline]
pub const fn sup_state_addr(sup: u32, index: usize) -> u32 {
    sup + 4 + STATE_SIZE * index as u32
}

#[inline]
pub const fn sup_context_addr(sup: u32, index: usize) -> u32 {
    sup + 4 + 2 * STATE_SIZE + CONTEXT_SIZE * index as u32
}
