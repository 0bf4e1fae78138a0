// A host-side model of the simulated machine: flat word-addressed memory
// with the firmware page, bus registers, the device register bank, and the
// two countdown timers. Time only moves when the driver calls `advance`,
// which keeps every run deterministic.

use crate::arch::{ip_bit, mmio, ProcessorState};
use crate::machine::Machine;

const RAM_BYTES: u32 = 0x1_0000;
const RAM_WORDS: usize = (RAM_BYTES / 4) as usize;
const PAGE_WORDS: usize = 1024;

const DEV_COUNT: usize = (mmio::DEV_LINES * mmio::DEVS_PER_LINE) as usize;
const DEV_BANK_BYTES: u32 = mmio::DEV_LINES * 0x80;

pub struct SimMachine {
    bios: [u32; PAGE_WORDS],
    ram: [u32; RAM_WORDS],
    /// Four words per device: status, command, data0, data1.
    dev_regs: [[u32; 4]; DEV_COUNT],
    /// Requesting-device bits for lines 3..6.
    pending: [u32; 4],
    /// Terminal sub-device pending bits, one per device.
    term_recv_pending: u8,
    term_transm_pending: u8,
    tod: u64,
    local_timer: u64,
    local_timer_fired: bool,
    interval_timer: u64,
    interval_fired: bool,
}

impl SimMachine {
    pub fn new() -> Self {
        Self {
            bios: [0; PAGE_WORDS],
            ram: [0; RAM_WORDS],
            dev_regs: [[0; 4]; DEV_COUNT],
            pending: [0; 4],
            term_recv_pending: 0,
            term_transm_pending: 0,
            tod: 0,
            local_timer: u64::MAX,
            local_timer_fired: false,
            interval_timer: u64::MAX,
            interval_fired: false,
        }
    }

    /// Move simulated time forward, counting both timers down.
    pub fn advance(&mut self, ns: u64) {
        self.tod += ns;
        if self.local_timer != u64::MAX {
            if self.local_timer <= ns {
                self.local_timer = 0;
                self.local_timer_fired = true;
            } else {
                self.local_timer -= ns;
            }
        }
        if self.interval_timer != u64::MAX {
            if self.interval_timer <= ns {
                self.interval_timer = 0;
                self.interval_fired = true;
            } else {
                self.interval_timer -= ns;
            }
        }
    }

    /// Pending-interrupt bits, in Cause-register format.
    pub fn pending_cause(&self) -> u32 {
        let mut cause = 0;
        if self.local_timer_fired {
            cause |= ip_bit(mmio::LINE_LOCAL_TIMER);
        }
        if self.interval_fired {
            cause |= ip_bit(mmio::LINE_INTERVAL_TIMER);
        }
        for line in mmio::FIRST_DEV_LINE..=mmio::TERMINAL_LINE {
            if self.line_bitmap(line) != 0 {
                cause |= ip_bit(line);
            }
        }
        cause
    }

    /// Whether any interrupt is pending.
    pub fn interrupt_pending(&self) -> bool {
        self.pending_cause() != 0
    }

    /// Store a trapped state where the firmware would save it.
    pub fn deliver_trap(&mut self, state: &ProcessorState) {
        state.store_to(self, mmio::BIOS_DATA_PAGE);
    }

    /// Latch a completion on a device of lines 3..6.
    pub fn raise_device(&mut self, line: u32, dev: u32, status: u32) {
        assert!((mmio::FIRST_DEV_LINE..mmio::TERMINAL_LINE).contains(&line));
        assert!(dev < mmio::DEVS_PER_LINE);
        self.dev_regs[Self::dev_index(line, dev)][0] = status;
        self.pending[(line - mmio::FIRST_DEV_LINE) as usize] |= 1 << dev;
    }

    /// Latch a transmit completion on a terminal.
    pub fn raise_terminal_transmit(&mut self, dev: u32, status: u32) {
        assert!(dev < mmio::DEVS_PER_LINE);
        self.dev_regs[Self::dev_index(mmio::TERMINAL_LINE, dev)][2] = status;
        self.term_transm_pending |= 1 << dev;
    }

    /// Latch a receive completion on a terminal.
    pub fn raise_terminal_receive(&mut self, dev: u32, status: u32) {
        assert!(dev < mmio::DEVS_PER_LINE);
        self.dev_regs[Self::dev_index(mmio::TERMINAL_LINE, dev)][0] = status;
        self.term_recv_pending |= 1 << dev;
    }

    fn dev_index(line: u32, dev: u32) -> usize {
        ((line - mmio::FIRST_DEV_LINE) * mmio::DEVS_PER_LINE + dev) as usize
    }

    fn line_bitmap(&self, line: u32) -> u32 {
        if line == mmio::TERMINAL_LINE {
            (self.term_recv_pending | self.term_transm_pending) as u32
        } else {
            self.pending[(line - mmio::FIRST_DEV_LINE) as usize]
        }
    }

    fn dev_reg_write(&mut self, offset: u32, value: u32) {
        let line = offset / 0x80 + mmio::FIRST_DEV_LINE;
        let dev = offset % 0x80 / 0x10;
        let field = (offset % 0x10 / 4) as usize;
        let index = Self::dev_index(line, dev);
        self.dev_regs[index][field] = value;

        if value != mmio::CMD_ACK {
            return;
        }
        if line == mmio::TERMINAL_LINE {
            if field == 1 {
                self.term_recv_pending &= !(1 << dev);
                self.dev_regs[index][0] = mmio::STATUS_READY;
            } else if field == 3 {
                self.term_transm_pending &= !(1 << dev);
                self.dev_regs[index][2] = mmio::STATUS_READY;
            }
        } else if field == 1 {
            self.pending[(line - mmio::FIRST_DEV_LINE) as usize] &= !(1 << dev);
            self.dev_regs[index][0] = mmio::STATUS_READY;
        }
    }
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for SimMachine {
    fn read_word(&self, addr: u32) -> u32 {
        debug_assert!(addr % 4 == 0, "unaligned bus read at {addr:#010x}");
        match addr {
            mmio::BIOS_DATA_PAGE..=0x0FFF_FFFC => {
                self.bios[((addr - mmio::BIOS_DATA_PAGE) / 4) as usize]
            }
            mmio::RAM_BASE_REG => mmio::RAM_START,
            mmio::RAM_SIZE_REG => RAM_BYTES,
            mmio::TOD_LO_REG => self.tod as u32,
            mmio::INTERVAL_TIMER_REG => self.interval_timer as u32,
            mmio::TIMESCALE_REG => 1,
            a if (mmio::INT_BITMAP_BASE..mmio::DEV_REG_BASE).contains(&a) => {
                self.line_bitmap((a - mmio::INT_BITMAP_BASE) / 4 + mmio::FIRST_DEV_LINE)
            }
            a if (mmio::DEV_REG_BASE..mmio::DEV_REG_BASE + DEV_BANK_BYTES).contains(&a) => {
                let offset = a - mmio::DEV_REG_BASE;
                let line = offset / 0x80 + mmio::FIRST_DEV_LINE;
                let dev = offset % 0x80 / 0x10;
                self.dev_regs[Self::dev_index(line, dev)][(offset % 0x10 / 4) as usize]
            }
            a if (mmio::RAM_START..mmio::RAM_START + RAM_BYTES).contains(&a) => {
                self.ram[((a - mmio::RAM_START) / 4) as usize]
            }
            _ => panic!("sim: read from unmapped address {addr:#010x}"),
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        debug_assert!(addr % 4 == 0, "unaligned bus write at {addr:#010x}");
        match addr {
            mmio::BIOS_DATA_PAGE..=0x0FFF_FFFC => {
                self.bios[((addr - mmio::BIOS_DATA_PAGE) / 4) as usize] = value;
            }
            mmio::INTERVAL_TIMER_REG => {
                self.interval_timer = value as u64;
                self.interval_fired = false;
            }
            a if (mmio::DEV_REG_BASE..mmio::DEV_REG_BASE + DEV_BANK_BYTES).contains(&a) => {
                self.dev_reg_write(a - mmio::DEV_REG_BASE, value);
            }
            a if (mmio::RAM_START..mmio::RAM_START + RAM_BYTES).contains(&a) => {
                self.ram[((a - mmio::RAM_START) / 4) as usize] = value;
            }
            _ => panic!("sim: write to unmapped address {addr:#010x}"),
        }
    }

    fn tod(&self) -> u64 {
        self.tod
    }

    fn set_timer(&mut self, ns: u64) {
        self.local_timer = ns;
        self.local_timer_fired = false;
    }

    fn timer(&self) -> u64 {
        self.local_timer
    }
}
