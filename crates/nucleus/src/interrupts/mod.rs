// Interrupt classification and acknowledgement.
//
// One interrupt is serviced per trap, highest priority first: the slice
// timer, then the interval timer backing the pseudo-clock, then device
// lines in ascending order with the lowest-numbered requesting device
// winning within a line. Anything still pending re-traps immediately.

use log::debug;

use crate::arch::{self, mmio, ProcessorState};
use crate::kernel::Nucleus;
use crate::machine::{Disposition, Machine};
use crate::sched::TIME_SLICE_NS;

/// Interval-timer period backing the pseudo-clock.
pub const PSEUDO_CLOCK_TICK_NS: u32 = 100_000_000;

impl Nucleus {
    pub(crate) fn handle_interrupt(
        &mut self,
        m: &mut impl Machine,
        saved: ProcessorState,
    ) -> Disposition {
        // Snapshot time and the slice remainder before anything else; the
        // first funds preemption accounting, the second keeps a resumed
        // process from silently receiving a fresh slice.
        let now = m.tod();
        let slice_left = m.timer();

        if arch::ip_pending(saved.cause, mmio::LINE_LOCAL_TIMER) {
            return self.slice_expired(m, saved, now);
        }
        if arch::ip_pending(saved.cause, mmio::LINE_INTERVAL_TIMER) {
            return self.pseudo_clock_tick(m, saved, slice_left);
        }
        for line in mmio::FIRST_DEV_LINE..=mmio::TERMINAL_LINE {
            if arch::ip_pending(saved.cause, line) {
                return self.device_interrupt(m, saved, line, slice_left);
            }
        }
        Disposition::Panic("interrupt trap with nothing pending")
    }

    // Line 1: the running process consumed its slice. Charge it, move it to
    // the back of the ready queue, dispatch the next one.
    fn slice_expired(
        &mut self,
        m: &mut impl Machine,
        saved: ProcessorState,
        now: u64,
    ) -> Disposition {
        let Some(cur) = self.current else {
            return Disposition::Panic("slice timer fired with no current process");
        };
        m.set_timer(TIME_SLICE_NS); // acknowledge
        self.pcbs[cur].state = saved;
        self.pcbs[cur].cpu_time += now.saturating_sub(self.start_tod);
        self.ready.enqueue(&mut self.pcbs, cur);
        self.current = None;
        debug!("interrupt: slice expired for {:?}", cur);
        self.schedule(m)
    }

    // Line 2: pseudo-clock tick. Release every waiter and reset the
    // semaphore; the released set drove it exactly that far negative.
    fn pseudo_clock_tick(
        &mut self,
        m: &mut impl Machine,
        saved: ProcessorState,
        slice_left: u64,
    ) -> Disposition {
        m.write_word(mmio::INTERVAL_TIMER_REG, PSEUDO_CLOCK_TICK_NS); // acknowledge + rearm
        let sem = mmio::PSEUDO_CLOCK_SEM_ADDR;
        let mut released = 0;
        while let Some(p) = self.asl.remove_blocked(&mut self.pcbs, sem) {
            self.ready.enqueue(&mut self.pcbs, p);
            self.soft_blocked -= 1;
            released += 1;
        }
        m.write_word(sem, 0);
        debug!("interrupt: pseudo-clock tick released {}", released);
        self.resume_or_schedule(m, saved, slice_left)
    }

    // Lines 3..7: a device completed. Acknowledge it and V its semaphore,
    // delivering the latched status to the released waiter.
    fn device_interrupt(
        &mut self,
        m: &mut impl Machine,
        saved: ProcessorState,
        line: u32,
        slice_left: u64,
    ) -> Disposition {
        let bitmap = m.read_word(mmio::int_bitmap_addr(line));
        if bitmap == 0 {
            return Disposition::Panic("device line pending with an empty bitmap");
        }
        let dev = bitmap.trailing_zeros();
        let base = mmio::dev_reg_addr(line, dev);
        let mut index = (line - mmio::FIRST_DEV_LINE) * mmio::DEVS_PER_LINE + dev;

        let status;
        if line == mmio::TERMINAL_LINE {
            let transm = m.read_word(base + mmio::TERM_TRANSM_STATUS);
            if transm & mmio::TERM_STATUS_MASK == mmio::STATUS_CHAR_TRANSMITTED {
                status = transm;
                m.write_word(base + mmio::TERM_TRANSM_COMMAND, mmio::CMD_ACK);
                index += mmio::DEVS_PER_LINE;
            } else {
                status = m.read_word(base + mmio::TERM_RECV_STATUS);
                m.write_word(base + mmio::TERM_RECV_COMMAND, mmio::CMD_ACK);
            }
        } else {
            status = m.read_word(base + mmio::DEV_STATUS);
            m.write_word(base + mmio::DEV_COMMAND, mmio::CMD_ACK);
        }

        let sem = mmio::device_sem_addr(index as usize);
        let value = (m.read_word(sem) as i32) + 1;
        m.write_word(sem, value as u32);
        if value <= 0 {
            if let Some(p) = self.asl.remove_blocked(&mut self.pcbs, sem) {
                self.pcbs[p].state.set_v0(status);
                self.ready.enqueue(&mut self.pcbs, p);
                self.soft_blocked -= 1;
            }
        }
        debug!(
            "interrupt: line {} device {} status {:#x}",
            line, dev, status
        );
        self.resume_or_schedule(m, saved, slice_left)
    }

    // Give the CPU back to the interrupted process with its slice
    // remainder, or dispatch if the interrupt ended an idle wait.
    fn resume_or_schedule(
        &mut self,
        m: &mut impl Machine,
        saved: ProcessorState,
        slice_left: u64,
    ) -> Disposition {
        if self.current.is_some() {
            m.set_timer(slice_left);
            Disposition::Load(saved)
        } else {
            self.schedule(m)
        }
    }
}
