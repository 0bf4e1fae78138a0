// Active Semaphore List: one descriptor per semaphore that currently has
// waiters, kept sorted by semaphore address.
//
// The descriptor table is static. Slots 0 and 1 are permanent sentinels
// keyed by the smallest and largest possible addresses, so the search loop
// never walks off either end; the rest cycle through a free list. A
// descriptor only ever exists with a non-empty waiter queue.

use heapless::Vec;

use crate::error::{KernelError, Result};
use super::pcb::{PcbId, PcbPool, ProcQueue, MAXPROC};
use super::SemAddr;

const SEMD_SLOTS: usize = MAXPROC + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SemdId(u8);

impl SemdId {
    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

const HEAD_SENTINEL: SemdId = SemdId(0);
const TAIL_SENTINEL: SemdId = SemdId(1);

#[derive(Debug)]
struct Semd {
    key: SemAddr,
    next: Option<SemdId>,
    waiters: ProcQueue,
}

pub struct Asl {
    slots: [Semd; SEMD_SLOTS],
    free_list: Vec<SemdId, MAXPROC>,
}

impl Asl {
    pub fn new() -> Self {
        const EMPTY: Semd = Semd {
            key: 0,
            next: None,
            waiters: ProcQueue::new(),
        };
        let mut asl = Self {
            slots: [EMPTY; SEMD_SLOTS],
            free_list: Vec::new(),
        };
        asl.slots[HEAD_SENTINEL.index()].key = SemAddr::MIN;
        asl.slots[HEAD_SENTINEL.index()].next = Some(TAIL_SENTINEL);
        asl.slots[TAIL_SENTINEL.index()].key = SemAddr::MAX;
        let mut i = 2;
        while i < SEMD_SLOTS {
            let _ = asl.free_list.push(SemdId(i as u8));
            i += 1;
        }
        asl
    }

    // Last descriptor with key < `key`; its successor is the first with
    // key >= `key` (possibly the tail sentinel).
    fn search(&self, key: SemAddr) -> SemdId {
        let mut prev = HEAD_SENTINEL;
        while let Some(next) = self.slots[prev.index()].next {
            if self.slots[next.index()].key >= key {
                break;
            }
            prev = next;
        }
        prev
    }

    fn lookup(&self, key: SemAddr) -> Option<(SemdId, SemdId)> {
        let prev = self.search(key);
        let cur = self.slots[prev.index()].next?;
        if cur != TAIL_SENTINEL && self.slots[cur.index()].key == key {
            Some((prev, cur))
        } else {
            None
        }
    }

    // Unlink an emptied descriptor and recycle it.
    fn retire(&mut self, prev: SemdId, desc: SemdId) {
        self.slots[prev.index()].next = self.slots[desc.index()].next;
        self.slots[desc.index()].next = None;
        let _ = self.free_list.push(desc);
    }

    /// Block `p` on the semaphore at `sem`: append it to the semaphore's
    /// waiter queue (FIFO), creating the descriptor if this is the first
    /// waiter. Fails only when a descriptor would be needed and the free
    /// list is empty.
    pub fn insert_blocked(&mut self, pool: &mut PcbPool, sem: SemAddr, p: PcbId) -> Result<()> {
        debug_assert!(sem != SemAddr::MIN && sem != SemAddr::MAX);
        let prev = self.search(sem);
        let next = self.slots[prev.index()].next.expect("tail sentinel is linked");
        let desc = if next != TAIL_SENTINEL && self.slots[next.index()].key == sem {
            next
        } else {
            let d = self
                .free_list
                .pop()
                .ok_or(KernelError::SemdPoolExhausted)?;
            self.slots[d.index()] = Semd {
                key: sem,
                next: Some(next),
                waiters: ProcQueue::new(),
            };
            self.slots[prev.index()].next = Some(d);
            d
        };
        self.slots[desc.index()].waiters.enqueue(pool, p);
        pool[p].sem_addr = Some(sem);
        Ok(())
    }

    /// Release the earliest waiter on `sem`. Returns `None` when no
    /// descriptor exists for that address.
    pub fn remove_blocked(&mut self, pool: &mut PcbPool, sem: SemAddr) -> Option<PcbId> {
        let (prev, desc) = self.lookup(sem)?;
        let p = self.slots[desc.index()]
            .waiters
            .dequeue(pool)
            .expect("active descriptor has waiters");
        pool[p].sem_addr = None;
        if self.slots[desc.index()].waiters.is_empty() {
            self.retire(prev, desc);
        }
        Some(p)
    }

    /// Pull `p` out of whatever waiter queue holds it, using its recorded
    /// blocking key. A caller naming an unblocked PCB is in error.
    pub fn out_blocked(&mut self, pool: &mut PcbPool, p: PcbId) -> Result<PcbId> {
        let sem = pool[p].sem_addr.ok_or(KernelError::NotBlocked)?;
        let (prev, desc) = self.lookup(sem).ok_or(KernelError::NotBlocked)?;
        self.slots[desc.index()]
            .waiters
            .remove(pool, p)
            .ok_or(KernelError::NotBlocked)?;
        pool[p].sem_addr = None;
        if self.slots[desc.index()].waiters.is_empty() {
            self.retire(prev, desc);
        }
        Ok(p)
    }

    /// Earliest waiter on `sem` without removing it.
    pub fn head_blocked(&self, pool: &PcbPool, sem: SemAddr) -> Option<PcbId> {
        let (_, desc) = self.lookup(sem)?;
        self.slots[desc.index()].waiters.head(pool)
    }

    /// Whether a descriptor for `sem` is live (i.e. someone waits there).
    pub fn is_active(&self, sem: SemAddr) -> bool {
        self.lookup(sem).is_some()
    }

    pub fn free_descriptors(&self) -> usize {
        self.free_list.len()
    }

    pub fn active_descriptors(&self) -> usize {
        MAXPROC - self.free_list.len()
    }
}

impl Default for Asl {
    fn default() -> Self {
        Self::new()
    }
}
