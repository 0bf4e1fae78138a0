// Nucleus state and the unified trap entry.
//
// All nucleus storage lives in one `Nucleus` value constructed before boot
// and handed to every trap entry. Exactly one trap path runs at a time and
// runs to completion, so the value has a single owner and needs no locking.

use log::{debug, info, warn};

use crate::arch::{self, mmio, ProcessorState};
use crate::machine::{Context, Disposition, Machine};
use crate::process::{Asl, PcbId, PcbPool, ProcQueue, SemAddr, MAXPROC};

pub struct Nucleus {
    pub(crate) pcbs: PcbPool,
    pub(crate) asl: Asl,
    pub(crate) ready: ProcQueue,
    pub(crate) current: Option<PcbId>,
    /// Number of PCBs outside the free pool.
    pub(crate) process_count: u32,
    /// Number of PCBs blocked on a device or pseudo-clock semaphore.
    pub(crate) soft_blocked: u32,
    /// TOD at the last dispatch or accounting boundary; CPU time charged to
    /// the current process is measured from here.
    pub(crate) start_tod: u64,
}

impl Nucleus {
    pub fn new() -> Self {
        Self {
            pcbs: PcbPool::new(),
            asl: Asl::new(),
            ready: ProcQueue::new(),
            current: None,
            process_count: 0,
            soft_blocked: 0,
            start_tod: 0,
        }
    }

    /// One-shot initialization: populate the pass-up vector, clear the
    /// device semaphores, arm the pseudo-clock, create the first process
    /// and dispatch it.
    pub fn boot(&mut self, m: &mut impl Machine, entry: u32) -> Disposition {
        let puv = mmio::PASS_UP_VECTOR;
        m.write_word(puv + mmio::PUV_TLB_REFILL_HANDLER, mmio::TLB_REFILL_ENTRY);
        m.write_word(puv + mmio::PUV_TLB_REFILL_STACK, mmio::KERNEL_STACK_TOP);
        m.write_word(puv + mmio::PUV_EXCEPTION_HANDLER, mmio::EXCEPTION_ENTRY);
        m.write_word(puv + mmio::PUV_EXCEPTION_STACK, mmio::KERNEL_STACK_TOP);

        for i in 0..mmio::DEVICE_SEM_COUNT {
            m.write_word(mmio::device_sem_addr(i), 0);
        }
        m.write_word(
            mmio::INTERVAL_TIMER_REG,
            crate::interrupts::PSEUDO_CLOCK_TICK_NS,
        );

        let first = self.pcbs.alloc().expect("pcb pool is full at boot");
        let ram_top = m.read_word(mmio::RAM_BASE_REG) + m.read_word(mmio::RAM_SIZE_REG);
        let state = &mut self.pcbs[first].state;
        state.set_entry(entry);
        state.set_sp(ram_top);
        state.status = (arch::Status::INT_ENABLE_PREV
            | arch::Status::INT_MASK_ALL
            | arch::Status::TIMER_ENABLE)
            .bits();
        self.ready.enqueue(&mut self.pcbs, first);
        self.process_count = 1;

        info!("kernel: booted, first process enters at {:#010x}", entry);
        self.schedule(m)
    }

    /// Unified exception entry. The firmware has saved the offending state
    /// at the base of the BIOS data page; decode its cause and route.
    pub fn handle_trap(&mut self, m: &mut impl Machine) -> Disposition {
        let saved = ProcessorState::load_from(m, mmio::BIOS_DATA_PAGE);
        match arch::exc_code(saved.cause) {
            arch::EXC_INTERRUPT => self.handle_interrupt(m, saved),
            arch::EXC_TLB_MOD..=arch::EXC_TLB_STORE => {
                self.pass_up_or_die(m, mmio::PAGE_FAULT_INDEX, &saved)
            }
            arch::EXC_SYSCALL => self.handle_syscall(m, saved),
            _ => self.pass_up_or_die(m, mmio::GENERAL_INDEX, &saved),
        }
    }

    /// Hand an exception to the current process's support layer, or tear
    /// the process down if it never registered one. The state delivered is
    /// the one captured at the trap, untouched.
    pub(crate) fn pass_up_or_die(
        &mut self,
        m: &mut impl Machine,
        index: usize,
        saved: &ProcessorState,
    ) -> Disposition {
        let Some(cur) = self.current else {
            return Disposition::Panic("exception raised with no current process");
        };
        match self.pcbs[cur].support {
            Some(sup) => {
                saved.store_to(m, mmio::sup_state_addr(sup, index));
                self.charge_current(m.tod());
                let ctx = Context::load_from(m, mmio::sup_context_addr(sup, index));
                debug!("kernel: pass up index {} to {:#010x}", index, ctx.pc);
                Disposition::LoadContext(ctx)
            }
            None => {
                warn!("kernel: no support structure registered, killing subtree");
                self.terminate_subtree(m, cur);
                self.current = None;
                self.schedule(m)
            }
        }
    }

    /// Tear down `p` and every descendant: children first, then `p` itself
    /// is detached from the tree and from whichever queue holds it, its
    /// semaphore accounting is repaired, and its PCB is recycled.
    pub(crate) fn terminate_subtree(&mut self, m: &mut impl Machine, p: PcbId) {
        while let Some(child) = self.pcbs.first_child(p) {
            self.terminate_subtree(m, child);
        }
        self.pcbs.detach_child(p);
        if self.current == Some(p) {
            // the caller owns the current slot and clears it afterwards
        } else if let Some(sem) = self.pcbs[p].sem_addr {
            self.asl
                .out_blocked(&mut self.pcbs, p)
                .expect("blocked pcb sits on its semaphore's queue");
            if mmio::is_device_sem(sem) {
                // device semaphores signal rather than count; the waiter
                // is tracked by the soft-block counter instead
                self.soft_blocked -= 1;
            } else {
                let value = m.read_word(sem) as i32;
                m.write_word(sem, (value + 1) as u32);
            }
        } else {
            self.ready.remove(&mut self.pcbs, p);
        }
        self.pcbs.free(p);
        self.process_count -= 1;
    }

    /// Charge the current process for the time since the last boundary and
    /// move the boundary up to `now`.
    pub(crate) fn charge_current(&mut self, now: u64) {
        if let Some(cur) = self.current {
            self.pcbs[cur].cpu_time += now.saturating_sub(self.start_tod);
            self.start_tod = now;
        }
    }

    /// Resume the current process, charging it for nucleus time first.
    pub(crate) fn resume_current(&mut self, m: &mut impl Machine) -> Disposition {
        let cur = self.current.expect("resume requires a current process");
        self.charge_current(m.tod());
        Disposition::Load(self.pcbs[cur].state)
    }

    // Read-only surface for diagnostics and tests.

    pub fn process_count(&self) -> u32 {
        self.process_count
    }

    pub fn soft_blocked_count(&self) -> u32 {
        self.soft_blocked
    }

    pub fn current(&self) -> Option<PcbId> {
        self.current
    }

    /// Accumulated CPU time of a process, not counting an in-progress slice.
    pub fn cpu_time(&self, p: PcbId) -> u64 {
        self.pcbs[p].cpu_time
    }

    /// Ready-queue contents in dispatch order.
    pub fn ready_snapshot(&self) -> heapless::Vec<PcbId, MAXPROC> {
        let mut out = heapless::Vec::new();
        for p in self.ready.iter(&self.pcbs) {
            let _ = out.push(p);
        }
        out
    }

    /// Earliest waiter on the given semaphore, if any.
    pub fn blocked_head(&self, sem: SemAddr) -> Option<PcbId> {
        self.asl.head_blocked(&self.pcbs, sem)
    }

    /// Whether the semaphore currently holds waiters.
    pub fn semaphore_active(&self, sem: SemAddr) -> bool {
        self.asl.is_active(sem)
    }

    pub fn free_pcbs(&self) -> usize {
        self.pcbs.free_count()
    }

    pub fn free_semaphore_descriptors(&self) -> usize {
        self.asl.free_descriptors()
    }
}

impl Default for Nucleus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::reg;
    use crate::sim::SimMachine;

    const ENTRY: u32 = 0x2000_4000;

    #[test]
    fn boot_dispatches_the_first_process() {
        let mut m = SimMachine::new();
        let mut n = Nucleus::new();
        let d = n.boot(&mut m, ENTRY);
        let Disposition::Load(state) = d else {
            panic!("boot should dispatch, got {:?}", d);
        };
        assert_eq!(state.pc, ENTRY);
        assert_eq!(state.gpr[reg::T9], ENTRY);
        assert_eq!(
            state.sp(),
            m.read_word(mmio::RAM_BASE_REG) + m.read_word(mmio::RAM_SIZE_REG)
        );
        assert_eq!(n.process_count(), 1);
        assert!(n.current().is_some());

        // pass-up vector is in place and the pseudo-clock is armed
        assert_eq!(
            m.read_word(mmio::PASS_UP_VECTOR + mmio::PUV_EXCEPTION_HANDLER),
            mmio::EXCEPTION_ENTRY
        );
        assert_eq!(
            m.read_word(mmio::PASS_UP_VECTOR + mmio::PUV_TLB_REFILL_STACK),
            mmio::KERNEL_STACK_TOP
        );
        assert_eq!(
            m.read_word(mmio::INTERVAL_TIMER_REG),
            crate::interrupts::PSEUDO_CLOCK_TICK_NS
        );
        assert_eq!(m.read_word(mmio::PSEUDO_CLOCK_SEM_ADDR), 0);
    }

    #[test]
    fn tlb_exceptions_reach_the_page_fault_slot() {
        let mut m = SimMachine::new();
        let mut n = Nucleus::new();
        let Disposition::Load(mut state) = n.boot(&mut m, ENTRY) else {
            panic!("boot should dispatch");
        };

        // register a support structure by hand
        let sup = mmio::RAM_START + 0x6000;
        let cur = n.current().unwrap();
        n.pcbs[cur].support = Some(sup);
        let ctx_addr = mmio::sup_context_addr(sup, mmio::PAGE_FAULT_INDEX);
        m.write_word(ctx_addr, 0x2000_f800);
        m.write_word(ctx_addr + 4, 0x0000_ff04);
        m.write_word(ctx_addr + 8, 0x2000_5000);

        state.cause = arch::set_exc_code(0, arch::EXC_TLB_LOAD);
        m.deliver_trap(&state);
        let d = n.handle_trap(&mut m);
        assert_eq!(
            d,
            Disposition::LoadContext(Context {
                stack_ptr: 0x2000_f800,
                status: 0x0000_ff04,
                pc: 0x2000_5000,
            })
        );
        // the trapped state landed in the page-fault slot, verbatim
        let delivered = ProcessorState::load_from(
            &m,
            mmio::sup_state_addr(sup, mmio::PAGE_FAULT_INDEX),
        );
        assert_eq!(delivered, state);
    }

    #[test]
    fn program_trap_without_support_kills_the_process() {
        let mut m = SimMachine::new();
        let mut n = Nucleus::new();
        let Disposition::Load(mut state) = n.boot(&mut m, ENTRY) else {
            panic!("boot should dispatch");
        };
        state.cause = arch::set_exc_code(0, arch::EXC_ADDR_LOAD);
        m.deliver_trap(&state);
        // sole process dies, nothing remains: orderly halt
        assert_eq!(n.handle_trap(&mut m), Disposition::Halt);
        assert_eq!(n.process_count(), 0);
        assert_eq!(n.free_pcbs(), MAXPROC);
    }
}
