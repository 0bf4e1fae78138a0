// Round-robin dispatch and the three terminal states.

use log::{debug, info};

use crate::kernel::Nucleus;
use crate::machine::{Disposition, Machine};

/// Per-process time slice.
pub const TIME_SLICE_NS: u64 = 5_000_000;

/// Slice-timer value used to mask it during the idle wait.
pub(crate) const TIMER_NEVER: u64 = u64::MAX;

impl Nucleus {
    /// Give the CPU to the next ready process. With nothing ready the
    /// outcome depends on the counters: no processes at all means an
    /// orderly halt; processes waiting on devices or the clock mean idling
    /// until an interrupt; anything else is a deadlock.
    pub fn schedule(&mut self, m: &mut impl Machine) -> Disposition {
        if let Some(p) = self.ready.dequeue(&mut self.pcbs) {
            self.current = Some(p);
            m.set_timer(TIME_SLICE_NS);
            self.start_tod = m.tod();
            debug!("sched: dispatching {:?}", p);
            return Disposition::Load(self.pcbs[p].state);
        }
        if self.process_count == 0 {
            info!("sched: last process gone, halting");
            Disposition::Halt
        } else if self.soft_blocked > 0 {
            debug!("sched: idle until the next device interrupt");
            m.set_timer(TIMER_NEVER);
            Disposition::Wait
        } else {
            Disposition::Panic("deadlock: live processes, none runnable, no I/O outstanding")
        }
    }
}
