// End-to-end scenarios: whole trap flows driven through the simulated
// machine, from boot to halt/idle/panic.

use mps_nucleus::arch::{self, mmio, reg, Status};
use mps_nucleus::sched::TIME_SLICE_NS;
use mps_nucleus::syscall;
use mps_nucleus::{Disposition, Machine, Nucleus, ProcessorState, SimMachine, MAXPROC};

const ROOT_ENTRY: u32 = 0x2000_4000;
const CHILD_ENTRIES: [u32; 4] = [0x2000_4800, 0x2000_5000, 0x2000_5800, 0x2000_6000];
const CHILD_STATES: [u32; 4] = [0x2000_9000, 0x2000_9100, 0x2000_9200, 0x2000_9300];
const SEM_A: u32 = 0x2000_8000;
const SEM_B: u32 = 0x2000_8004;
const SEM_C: u32 = 0x2000_8008;

fn boot() -> (Nucleus, SimMachine, ProcessorState) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut m = SimMachine::new();
    let mut n = Nucleus::new();
    match n.boot(&mut m, ROOT_ENTRY) {
        Disposition::Load(st) => (n, m, st),
        d => panic!("boot should dispatch the first process, got {d:?}"),
    }
}

fn load(d: Disposition) -> ProcessorState {
    match d {
        Disposition::Load(st) => st,
        d => panic!("expected a state load, got {d:?}"),
    }
}

fn do_syscall(
    n: &mut Nucleus,
    m: &mut SimMachine,
    base: &ProcessorState,
    nr: u32,
    a1: u32,
    a2: u32,
    a3: u32,
) -> Disposition {
    let mut st = *base;
    st.cause = arch::set_exc_code(0, arch::EXC_SYSCALL);
    st.gpr[reg::A0] = nr;
    st.gpr[reg::A1] = a1;
    st.gpr[reg::A2] = a2;
    st.gpr[reg::A3] = a3;
    m.deliver_trap(&st);
    n.handle_trap(m)
}

fn deliver_interrupt(n: &mut Nucleus, m: &mut SimMachine, running: &ProcessorState) -> Disposition {
    let mut st = *running;
    st.cause = m.pending_cause();
    m.deliver_trap(&st);
    n.handle_trap(m)
}

fn write_child_state(m: &mut SimMachine, addr: u32, entry: u32) {
    let mut st = ProcessorState::zeroed();
    st.set_entry(entry);
    st.set_sp(mmio::RAM_START + 0xe000);
    st.status = (Status::INT_ENABLE_PREV | Status::INT_MASK_ALL | Status::TIMER_ENABLE).bits();
    st.store_to(m, addr);
}

// Creates `count` children and returns the creator's latest resumed state.
fn spawn_children(
    n: &mut Nucleus,
    m: &mut SimMachine,
    mut st: ProcessorState,
    count: usize,
) -> ProcessorState {
    for i in 0..count {
        write_child_state(m, CHILD_STATES[i], CHILD_ENTRIES[i]);
        let resumed = load(do_syscall(
            n,
            m,
            &st,
            syscall::CREATE_PROCESS,
            CHILD_STATES[i],
            0,
            0,
        ));
        assert_eq!(resumed.v0(), 0, "create {i} should succeed");
        st = resumed;
    }
    st
}

#[test]
fn round_robin_across_three_cpu_bound_children() {
    let (mut n, mut m, st) = boot();
    let root = n.current().unwrap();
    let root_st = spawn_children(&mut n, &mut m, st, 3);

    // the parent parks on a private semaphore and the first child runs
    m.write_word(SEM_A, 0);
    let mut running = load(do_syscall(&mut n, &mut m, &root_st, syscall::PASSEREN, SEM_A, 0, 0));
    assert_eq!(running.pc, CHILD_ENTRIES[0]);
    let c1 = n.current().unwrap();
    let snapshot = n.ready_snapshot();
    let (c2, c3) = (snapshot[0], snapshot[1]);

    let expected = [
        (CHILD_ENTRIES[1], [c3, c1]),
        (CHILD_ENTRIES[2], [c1, c2]),
        (CHILD_ENTRIES[0], [c2, c3]),
    ];
    for (entry, ready_after) in expected {
        assert_eq!(m.timer(), TIME_SLICE_NS, "every dispatch arms a full slice");
        m.advance(TIME_SLICE_NS);
        running = load(deliver_interrupt(&mut n, &mut m, &running));
        assert_eq!(running.pc, entry, "strict round-robin rotation");
        assert_eq!(n.ready_snapshot().as_slice(), &ready_after);
    }

    // 15 ms of simulated time: one full slice charged to each child
    for p in [c1, c2, c3] {
        let t = n.cpu_time(p);
        assert!(
            (TIME_SLICE_NS - 100_000..=TIME_SLICE_NS + 100_000).contains(&t),
            "child should have consumed about one slice, got {t}"
        );
    }
    assert_eq!(n.blocked_head(SEM_A), Some(root), "the parent stayed parked");
}

#[test]
fn producer_consumer_handshake_on_one_semaphore() {
    let (mut n, mut m, st) = boot();
    let consumer = n.current().unwrap();
    let consumer_st = spawn_children(&mut n, &mut m, st, 1);

    m.write_word(SEM_A, 0);
    let descriptors_before = n.free_semaphore_descriptors();

    // consumer Ps first: it blocks and the producer child runs
    let producer_st = load(do_syscall(&mut n, &mut m, &consumer_st, syscall::PASSEREN, SEM_A, 0, 0));
    assert_eq!(producer_st.pc, CHILD_ENTRIES[0]);
    assert_eq!(m.read_word(SEM_A) as i32, -1);
    assert_eq!(n.blocked_head(SEM_A), Some(consumer));
    assert_eq!(n.free_semaphore_descriptors(), descriptors_before - 1);

    // producer Vs: the consumer is made ready and the descriptor drains
    let _ = load(do_syscall(&mut n, &mut m, &producer_st, syscall::VERHOGEN, SEM_A, 0, 0));
    assert_eq!(m.read_word(SEM_A), 0);
    assert!(!n.semaphore_active(SEM_A));
    assert_eq!(n.free_semaphore_descriptors(), descriptors_before);
    assert_eq!(n.ready_snapshot().as_slice(), &[consumer]);
}

#[test]
fn terminal_write_releases_the_waiter_with_its_status() {
    let (mut n, mut m, st) = boot();
    let writer = n.current().unwrap();

    // wait for the transmitter of terminal 0
    let d = do_syscall(&mut n, &mut m, &st, syscall::WAIT_FOR_IO, mmio::TERMINAL_LINE, 0, 0);
    assert_eq!(d, Disposition::Wait, "nothing else to run: idle until I/O");
    let sem = mmio::device_sem_addr(40);
    assert_eq!(m.read_word(sem) as i32, -1);
    assert_eq!(n.soft_blocked_count(), 1);
    assert_eq!(n.blocked_head(sem), Some(writer));

    // transmission completes with status 0x5
    m.raise_terminal_transmit(0, 0x5);
    let resumed = load(deliver_interrupt(&mut n, &mut m, &ProcessorState::zeroed()));
    assert_eq!(resumed.v0(), 0x5, "latched status lands in the waiter's v0");
    assert_eq!(resumed.pc, st.pc + 4);
    assert_eq!(n.current(), Some(writer));
    assert_eq!(n.soft_blocked_count(), 0);
    assert_eq!(m.read_word(sem), 0);
    assert_eq!(
        m.read_word(mmio::dev_reg_addr(7, 0) + mmio::TERM_TRANSM_COMMAND),
        mmio::CMD_ACK
    );
}

#[test]
fn pseudo_clock_tick_releases_every_sleeper_in_order() {
    let (mut n, mut m, st) = boot();
    let root = n.current().unwrap();
    let mut running = spawn_children(&mut n, &mut m, st, 4);

    // all five processes go to sleep on the pseudo-clock
    let mut sleepers = vec![root];
    for _ in 0..4 {
        let d = do_syscall(&mut n, &mut m, &running, syscall::WAIT_FOR_CLOCK, 0, 0, 0);
        match d {
            Disposition::Load(next) => {
                sleepers.push(n.current().unwrap());
                running = next;
            }
            Disposition::Wait => break,
            d => panic!("unexpected disposition {d:?}"),
        }
    }
    let d = do_syscall(&mut n, &mut m, &running, syscall::WAIT_FOR_CLOCK, 0, 0, 0);
    assert_eq!(d, Disposition::Wait);
    assert_eq!(n.soft_blocked_count(), 5);
    assert_eq!(m.read_word(mmio::PSEUDO_CLOCK_SEM_ADDR) as i32, -5);

    // the 100 ms tick arrives
    m.advance(100_000_000);
    let resumed = load(deliver_interrupt(&mut n, &mut m, &ProcessorState::zeroed()));

    // everyone woke, in the order they went to sleep; the root runs first
    assert_eq!(n.current(), Some(root));
    assert_eq!(resumed.pc, ROOT_ENTRY + 4 * 5, "root resumed after its five traps");
    assert_eq!(n.ready_snapshot().as_slice(), &sleepers[1..]);
    assert_eq!(m.read_word(mmio::PSEUDO_CLOCK_SEM_ADDR), 0);
    assert_eq!(n.soft_blocked_count(), 0);
    assert_eq!(
        m.read_word(mmio::INTERVAL_TIMER_REG),
        100_000_000,
        "tick rearms the interval timer"
    );
}

#[test]
fn blocking_with_no_outstanding_io_is_a_deadlock() {
    let (mut n, mut m, st) = boot();
    m.write_word(SEM_A, 0);
    let d = do_syscall(&mut n, &mut m, &st, syscall::PASSEREN, SEM_A, 0, 0);
    assert!(
        matches!(d, Disposition::Panic(reason) if reason.contains("deadlock")),
        "got {d:?}"
    );
    assert_eq!(n.process_count(), 1);
    assert_eq!(n.soft_blocked_count(), 0);
}

#[test]
fn recursive_termination_reclaims_everything() {
    let (mut n, mut m, st) = boot();
    let root_st = spawn_children(&mut n, &mut m, st, 3);

    m.write_word(SEM_A, 0);
    m.write_word(SEM_B, 0);
    m.write_word(SEM_C, 0);

    // root parks on SEM_A; child 1 takes over
    let c1_st = load(do_syscall(&mut n, &mut m, &root_st, syscall::PASSEREN, SEM_A, 0, 0));
    assert_eq!(c1_st.pc, CHILD_ENTRIES[0]);

    // child 1 spawns a grandchild, wakes the root, then parks on SEM_B
    write_child_state(&mut m, CHILD_STATES[3], CHILD_ENTRIES[3]);
    let c1_st = load(do_syscall(&mut n, &mut m, &c1_st, syscall::CREATE_PROCESS, CHILD_STATES[3], 0, 0));
    let c1_st = load(do_syscall(&mut n, &mut m, &c1_st, syscall::VERHOGEN, SEM_A, 0, 0));
    let c2_st = load(do_syscall(&mut n, &mut m, &c1_st, syscall::PASSEREN, SEM_B, 0, 0));
    assert_eq!(c2_st.pc, CHILD_ENTRIES[1]);

    // children 2 and 3 and the grandchild pile onto SEM_C
    let c3_st = load(do_syscall(&mut n, &mut m, &c2_st, syscall::PASSEREN, SEM_C, 0, 0));
    assert_eq!(c3_st.pc, CHILD_ENTRIES[2]);
    let gc_st = load(do_syscall(&mut n, &mut m, &c3_st, syscall::PASSEREN, SEM_C, 0, 0));
    assert_eq!(gc_st.pc, CHILD_ENTRIES[3]);
    let root_st = load(do_syscall(&mut n, &mut m, &gc_st, syscall::PASSEREN, SEM_C, 0, 0));
    assert_eq!(m.read_word(SEM_C) as i32, -3);
    assert_eq!(n.process_count(), 5);

    // the root tears the whole family down
    let d = do_syscall(&mut n, &mut m, &root_st, syscall::TERMINATE_PROCESS, 0, 0, 0);
    assert_eq!(d, Disposition::Halt);
    assert_eq!(n.process_count(), 0);
    assert_eq!(n.free_pcbs(), MAXPROC);
    assert_eq!(n.free_semaphore_descriptors(), MAXPROC);
    // terminating blocked processes repaired the counting semaphores
    assert_eq!(m.read_word(SEM_B), 0);
    assert_eq!(m.read_word(SEM_C), 0);
}

#[test]
fn create_process_reports_exhaustion_without_side_effects() {
    let (mut n, mut m, st) = boot();
    write_child_state(&mut m, CHILD_STATES[0], CHILD_ENTRIES[0]);
    let mut running = st;
    for _ in 0..MAXPROC - 1 {
        let resumed = load(do_syscall(
            &mut n,
            &mut m,
            &running,
            syscall::CREATE_PROCESS,
            CHILD_STATES[0],
            0,
            0,
        ));
        assert_eq!(resumed.v0(), 0);
        running = resumed;
    }
    assert_eq!(n.process_count(), MAXPROC as u32);

    let ready_before = n.ready_snapshot().len();
    let resumed = load(do_syscall(
        &mut n,
        &mut m,
        &running,
        syscall::CREATE_PROCESS,
        CHILD_STATES[0],
        0,
        0,
    ));
    assert_eq!(resumed.v0() as i32, -1);
    assert_eq!(n.process_count(), MAXPROC as u32);
    assert_eq!(n.ready_snapshot().len(), ready_before);
}

#[test]
fn last_process_terminating_halts_the_machine() {
    let (mut n, mut m, st) = boot();
    let d = do_syscall(&mut n, &mut m, &st, syscall::TERMINATE_PROCESS, 0, 0, 0);
    assert_eq!(d, Disposition::Halt);
    assert_eq!(n.process_count(), 0);
    assert_eq!(n.free_pcbs(), MAXPROC);
}

#[test]
fn lone_sleeper_idles_until_the_clock_wakes_it() {
    let (mut n, mut m, st) = boot();
    let sleeper = n.current().unwrap();
    let d = do_syscall(&mut n, &mut m, &st, syscall::WAIT_FOR_CLOCK, 0, 0, 0);
    assert_eq!(d, Disposition::Wait, "soft-blocked process means idle, not deadlock");

    m.advance(100_000_000);
    let resumed = load(deliver_interrupt(&mut n, &mut m, &ProcessorState::zeroed()));
    assert_eq!(n.current(), Some(sleeper));
    assert_eq!(resumed.pc, st.pc + 4);
}

#[test]
fn preempted_work_is_charged_across_slices() {
    let (mut n, mut m, st) = boot();
    let worker = n.current().unwrap();
    let _ = spawn_children(&mut n, &mut m, st, 1);

    // run the root for two partial slices with a clock tick in between
    let mut total = 0u64;
    let mut running = {
        // force a rotation so the root is re-dispatched cleanly
        m.advance(TIME_SLICE_NS);
        total += TIME_SLICE_NS;
        let child = load(deliver_interrupt(&mut n, &mut m, &{
            let mut s = ProcessorState::zeroed();
            s.pc = ROOT_ENTRY;
            s
        }));
        assert_eq!(child.pc, CHILD_ENTRIES[0]);
        m.advance(TIME_SLICE_NS);
        load(deliver_interrupt(&mut n, &mut m, &child))
    };
    assert_eq!(n.current(), Some(worker));

    m.advance(TIME_SLICE_NS);
    running = load(deliver_interrupt(&mut n, &mut m, &running));
    total += TIME_SLICE_NS;
    let _ = running;

    let charged = n.cpu_time(worker);
    assert!(
        charged >= total && charged <= total + TIME_SLICE_NS,
        "monotonic accounting within a slice: {charged} vs {total}"
    );
}
