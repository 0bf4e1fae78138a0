// The eight nucleus services.
//
// ABI: the service number arrives in `a0` of the saved state, arguments in
// `a1..a3`, results in `v0`. Services run in kernel mode only; a user-mode
// caller is made to look exactly like a reserved-instruction fault. Numbers
// outside the table go to the support layer untouched.

use log::{debug, warn};

use crate::arch::{self, mmio, ProcessorState, Status};
use crate::kernel::Nucleus;
use crate::machine::{Disposition, Machine};
use crate::process::{PcbId, SemAddr};

pub const CREATE_PROCESS: u32 = 1;
pub const TERMINATE_PROCESS: u32 = 2;
pub const PASSEREN: u32 = 3;
pub const VERHOGEN: u32 = 4;
pub const WAIT_FOR_IO: u32 = 5;
pub const GET_CPU_TIME: u32 = 6;
pub const WAIT_FOR_CLOCK: u32 = 7;
pub const GET_SUPPORT_DATA: u32 = 8;

impl Nucleus {
    pub(crate) fn handle_syscall(
        &mut self,
        m: &mut impl Machine,
        mut saved: ProcessorState,
    ) -> Disposition {
        let Some(cur) = self.current else {
            return Disposition::Panic("syscall trap with no current process");
        };
        let nr = saved.a0();
        if !(CREATE_PROCESS..=GET_SUPPORT_DATA).contains(&nr) {
            debug!("syscall: number {} passed up", nr);
            return self.pass_up_or_die(m, mmio::GENERAL_INDEX, &saved);
        }
        if Status::from_bits_retain(saved.status).contains(Status::USER_MODE_PREV) {
            warn!("syscall: privileged service {} requested from user mode", nr);
            saved.cause = arch::set_exc_code(saved.cause, arch::EXC_RESERVED_INSTRUCTION);
            return self.pass_up_or_die(m, mmio::GENERAL_INDEX, &saved);
        }

        // step past the trap instruction so a resume does not re-issue it,
        // then make the post-trap state the process's state of record
        saved.pc += 4;
        self.pcbs[cur].state = saved;

        match nr {
            CREATE_PROCESS => self.create_process(m, cur),
            TERMINATE_PROCESS => self.terminate_caller(m, cur),
            PASSEREN => self.passeren(m, cur),
            VERHOGEN => self.verhogen(m, cur),
            WAIT_FOR_IO => self.wait_for_io(m, cur),
            GET_CPU_TIME => self.get_cpu_time(m, cur),
            WAIT_FOR_CLOCK => self.wait_for_clock(m, cur),
            _ => self.get_support_data(m, cur),
        }
    }

    /// SYS1: spawn a child of the caller. `a1` points at the child's initial
    /// state, `a2` at its support structure (or null). Returns 0 in the
    /// caller's `v0`, or -1 when the pool is dry.
    fn create_process(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        let state_addr = self.pcbs[cur].state.a1();
        let support_addr = self.pcbs[cur].state.a2();
        match self.pcbs.alloc() {
            Some(child) => {
                self.pcbs[child].state = ProcessorState::load_from(m, state_addr);
                self.pcbs[child].support = (support_addr != 0).then_some(support_addr);
                self.pcbs.attach_child(cur, child);
                self.ready.enqueue(&mut self.pcbs, child);
                self.process_count += 1;
                debug!("syscall: created {:?} as child of {:?}", child, cur);
                self.pcbs[cur].state.set_v0(0);
            }
            None => {
                debug!("syscall: create rejected, pool exhausted");
                self.pcbs[cur].state.set_v0(-1i32 as u32);
            }
        }
        self.resume_current(m)
    }

    /// SYS2: terminate the caller and its whole subtree. Never returns to
    /// the caller.
    fn terminate_caller(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        debug!("syscall: terminating {:?} and descendants", cur);
        self.terminate_subtree(m, cur);
        self.current = None;
        self.schedule(m)
    }

    /// SYS3: P. Decrement the semaphore at `a1`; block the caller when it
    /// goes negative.
    fn passeren(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        let sem = self.pcbs[cur].state.a1();
        let value = (m.read_word(sem) as i32) - 1;
        m.write_word(sem, value as u32);
        if value < 0 {
            self.block_current(m, cur, sem)
        } else {
            self.resume_current(m)
        }
    }

    /// SYS4: V. Increment the semaphore at `a1`; hand the earliest waiter,
    /// if any, to the ready queue.
    fn verhogen(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        let sem = self.pcbs[cur].state.a1();
        let value = (m.read_word(sem) as i32) + 1;
        m.write_word(sem, value as u32);
        if value <= 0 {
            if let Some(p) = self.asl.remove_blocked(&mut self.pcbs, sem) {
                self.ready.enqueue(&mut self.pcbs, p);
            }
        }
        self.resume_current(m)
    }

    /// SYS5: wait for an I/O completion on line `a1`, device `a2`. For
    /// terminals `a3` selects the receiver; the transmitter sits one bank
    /// of semaphores above.
    fn wait_for_io(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        let line = self.pcbs[cur].state.a1();
        let dev = self.pcbs[cur].state.a2();
        let wait_for_read = self.pcbs[cur].state.a3() != 0;
        let mut index = (line - mmio::FIRST_DEV_LINE) * mmio::DEVS_PER_LINE + dev;
        if line == mmio::TERMINAL_LINE && !wait_for_read {
            index += mmio::DEVS_PER_LINE;
        }
        let sem = mmio::device_sem_addr(index as usize);
        debug!(
            "syscall: {:?} awaits line {} device {} (slot {})",
            cur, line, dev, index
        );
        self.soft_blocked += 1;
        let value = (m.read_word(sem) as i32) - 1;
        m.write_word(sem, value as u32);
        self.block_current(m, cur, sem)
    }

    /// SYS6: accumulated CPU time, including the time spent in this very
    /// call, returned in `v0`.
    fn get_cpu_time(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        let elapsed = m.tod().saturating_sub(self.start_tod);
        let total = self.pcbs[cur].cpu_time + elapsed;
        self.pcbs[cur].state.set_v0(total as u32);
        self.resume_current(m)
    }

    /// SYS7: block until the next pseudo-clock tick.
    fn wait_for_clock(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        let sem = mmio::PSEUDO_CLOCK_SEM_ADDR;
        self.soft_blocked += 1;
        let value = (m.read_word(sem) as i32) - 1;
        m.write_word(sem, value as u32);
        self.block_current(m, cur, sem)
    }

    /// SYS8: the caller's support-structure address (null when none).
    fn get_support_data(&mut self, m: &mut impl Machine, cur: PcbId) -> Disposition {
        let sup = self.pcbs[cur].support.unwrap_or(0);
        self.pcbs[cur].state.set_v0(sup);
        self.resume_current(m)
    }

    /// Park the current process on `sem` and give the CPU away. Accounting
    /// runs before the PCB reaches the waiter queue.
    fn block_current(&mut self, m: &mut impl Machine, cur: PcbId, sem: SemAddr) -> Disposition {
        self.charge_current(m.tod());
        if self
            .asl
            .insert_blocked(&mut self.pcbs, sem, cur)
            .is_err()
        {
            return Disposition::Panic("semaphore descriptors exhausted with processes to spare");
        }
        self.current = None;
        self.schedule(m)
    }
}
