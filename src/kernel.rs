// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel control block: the single piece of global state every other
//! module operates on.
//!
//! Grounded on `sys/kern/src/startup.rs`'s `safe_start_kernel` (task-table
//! assembly, then handing off to the first task) for the overall `init`
//! shape, and on design note §9 ("system phase as a Rust enum rather than
//! an integer state machine") for [`Phase`].
//!
//! Every method takes `&'static self`: the only instance that ever exists
//! is the process-wide singleton returned by [`kernel`], and pinning the
//! receiver's lifetime to `'static` is what lets `current`/`next` hand out
//! `&'static Tcb` without a lifetime parameter threaded through the whole
//! crate.

use core::cell::{Cell, UnsafeCell};
use core::panic::Location;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Caller, Code, ErrorLog, FatalHook, WarningHook};
use crate::task::{Priority, TaskState, Tcb, MAX_TASKS, PRIORITY_LEVELS};

/// System phase, tracked so the scheduler and the IRQ dispatcher can tell
/// apart "before the first task has ever run", "ordinary task-mode
/// execution", "a scheduling pass is already in progress" (the re-entrancy
/// guard), and "dispatching an external interrupt".
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Phase {
    FromReset,
    NormalRun,
    Scheduling,
    IrqRun,
}

fn idle_entry() -> ! {
    loop {
        crate::arch::wait_for_interrupt();
    }
}

/// Default `return_hook`: a task entry point is `fn() -> !` and is never
/// supposed to reach a `bx lr`, so this is purely a backstop against a
/// task that does anyway.
fn default_return_hook() -> ! {
    loop {
        crate::arch::wait_for_interrupt();
    }
}

/// The kernel control block. One process-wide instance, reached through
/// [`kernel`]; every public API function in this crate is a thin wrapper
/// around a method here.
pub struct Kernel {
    tasks: UnsafeCell<[Option<&'static Tcb>; MAX_TASKS]>,
    task_count: Cell<u8>,
    priority_counts: Cell<[u8; PRIORITY_LEVELS]>,
    priority_starts: Cell<[u8; PRIORITY_LEVELS]>,
    cursors: Cell<[u8; PRIORITY_LEVELS]>,
    current: Cell<Option<&'static Tcb>>,
    next: Cell<Option<&'static Tcb>>,
    phase: Cell<Phase>,
    reschedule_after_isr: AtomicBool,
    started: AtomicBool,
    idle: Tcb,
    tick_hook: Cell<fn()>,
    return_hook: Cell<fn() -> !>,
    errors: ErrorLog,
}

// SAFETY: every field is mutated either under a critical section
// (`register_task`, hook setters, `init`) or from the non-reentrant
// context-switch/tick handlers, which on a single core never race each
// other or task-mode code holding a critical section — the same invariant
// `Tcb` relies on.
unsafe impl Sync for Kernel {}

fn default_tick_hook() {}

impl Kernel {
    const fn new() -> Self {
        Kernel {
            tasks: UnsafeCell::new([None; MAX_TASKS]),
            task_count: Cell::new(0),
            priority_counts: Cell::new([0; PRIORITY_LEVELS]),
            priority_starts: Cell::new([0; PRIORITY_LEVELS]),
            cursors: Cell::new([0; PRIORITY_LEVELS]),
            current: Cell::new(None),
            next: Cell::new(None),
            phase: Cell::new(Phase::FromReset),
            reschedule_after_isr: AtomicBool::new(false),
            started: AtomicBool::new(false),
            idle: Tcb::new_idle(idle_entry),
            tick_hook: Cell::new(default_tick_hook),
            return_hook: Cell::new(default_return_hook),
            errors: ErrorLog::new(),
        }
    }

    pub(crate) fn phase(&'static self) -> Phase {
        self.phase.get()
    }

    pub(crate) fn set_phase(&'static self, phase: Phase) -> Phase {
        self.phase.replace(phase)
    }

    pub(crate) fn idle(&'static self) -> &'static Tcb {
        &self.idle
    }

    pub(crate) fn task_count(&'static self) -> u8 {
        self.task_count.get()
    }

    pub(crate) fn task_at(&'static self, index: u8) -> &'static Tcb {
        // SAFETY: `index` is always produced by the scheduler from its own
        // bookkeeping, which never exceeds `task_count`.
        unsafe { (*self.tasks.get())[index as usize].expect("scheduler index always populated") }
    }

    pub(crate) fn priority_counts(&'static self) -> [u8; PRIORITY_LEVELS] {
        self.priority_counts.get()
    }

    pub(crate) fn priority_starts(&'static self) -> [u8; PRIORITY_LEVELS] {
        self.priority_starts.get()
    }

    pub(crate) fn cursor(&'static self, p: usize) -> u8 {
        self.cursors.get()[p]
    }

    pub(crate) fn set_cursor(&'static self, p: usize, value: u8) {
        let mut cursors = self.cursors.get();
        cursors[p] = value;
        self.cursors.set(cursors);
    }

    pub(crate) fn current(&'static self) -> Option<&'static Tcb> {
        self.current.get()
    }

    pub(crate) fn set_current(&'static self, tcb: Option<&'static Tcb>) {
        self.current.set(tcb);
    }

    pub(crate) fn next(&'static self) -> Option<&'static Tcb> {
        self.next.get()
    }

    pub(crate) fn set_next(&'static self, tcb: Option<&'static Tcb>) {
        self.next.set(tcb);
    }

    pub(crate) fn request_reschedule_after_isr(&'static self) {
        self.reschedule_after_isr.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_reschedule_after_isr(&'static self) -> bool {
        self.reschedule_after_isr.swap(false, Ordering::SeqCst)
    }

    /// Returns the currently running task's TCB reference, for diagnostics
    /// and for tests. `None` only before the first task has ever been
    /// dispatched.
    pub fn current_task(&'static self) -> Option<&'static Tcb> {
        self.current.get()
    }

    pub fn last_error(&'static self) -> Option<Code> {
        self.errors.last()
    }

    pub fn set_fatal_hook(&'static self, hook: FatalHook) {
        self.errors.set_fatal_hook(hook);
    }

    pub fn set_warning_hook(&'static self, hook: WarningHook) {
        self.errors.set_warning_hook(hook);
    }

    pub fn set_tick_hook(&'static self, hook: fn()) {
        self.tick_hook.set(hook);
    }

    /// Replaces the hook a task's forged return address points at. Default
    /// spins forever; since every task entry point is `fn() -> !`, this
    /// only ever runs if a task breaks that contract and actually returns.
    pub fn set_return_hook(&'static self, hook: fn() -> !) {
        self.return_hook.set(hook);
    }

    /// Replaces the idle task's entry point. Default is a bare
    /// wait-for-interrupt loop; must be called before [`Kernel::init`]
    /// (the idle TCB's initial frame is forged there) and, like every
    /// other task entry point, must never return.
    pub fn set_idle_hook(&'static self, entry: fn() -> !) {
        self.idle.set_entry(entry);
    }

    pub(crate) fn tick_hook(&'static self) -> fn() {
        self.tick_hook.get()
    }

    pub(crate) fn return_hook(&'static self) -> fn() -> ! {
        self.return_hook.get()
    }

    pub(crate) fn fatal(&'static self, code: Code, caller: Caller) -> ! {
        self.errors.fatal(code, caller)
    }

    pub(crate) fn warning(&'static self, code: Code, caller: Caller) {
        self.errors.warning(code, caller)
    }

    /// Registers a task to be scheduled once [`Kernel::init`] runs.
    ///
    /// Precondition: the kernel has not started yet, and fewer than
    /// [`MAX_TASKS`] tasks have been registered so far. On overflow, the
    /// call is fatal: `ERR_TOO_MANY_TASKS`.
    #[track_caller]
    pub fn register_task(
        &'static self,
        entry: fn() -> !,
        tcb: &'static Tcb,
        priority: Priority,
    ) -> Result<(), Code> {
        let caller: Caller = Location::caller();
        debug_assert!(
            (priority.0 as usize) < PRIORITY_LEVELS,
            "priority out of range"
        );
        let _guard = crate::critical::Critical::enter();
        let count = self.task_count.get();
        if count as usize >= MAX_TASKS {
            self.fatal(Code::TooManyTasks, caller);
        }

        tcb.fill_registration(entry, count, priority);
        crate::arch::forge_initial_frame(tcb, entry);

        // SAFETY: still inside the critical section; exclusive access.
        unsafe {
            (*self.tasks.get())[count as usize] = Some(tcb);
        }
        self.task_count.set(count + 1);

        let mut counts = self.priority_counts.get();
        counts[priority.0 as usize] += 1;
        self.priority_counts.set(counts);

        Ok(())
    }

    /// Sorts the registered tasks by priority, computes each priority
    /// band's starting index, programs the tick hardware, and dispatches
    /// into the highest-priority ready task. Must be called exactly once,
    /// after every task has been registered, and never returns (control
    /// passes to the first task via the architecture backend).
    pub fn init(&'static self, tick_period_ms: u32) -> ! {
        let guard = crate::critical::Critical::enter();
        self.sort_tasks_by_priority();
        self.compute_priority_starts();
        // The idle TCB is built at compile time (`Kernel::new`) and never
        // goes through `register_task`, so its initial frame is forged
        // here instead - after `set_idle_hook`, if any, has had its
        // chance to replace the entry point.
        let idle_entry_point = self.idle.entry().expect("idle task always has an entry point");
        crate::arch::forge_initial_frame(&self.idle, idle_entry_point);
        self.started.store(true, Ordering::SeqCst);
        drop(guard);

        crate::arch::init_hardware(tick_period_ms);
        self.schedule();
        let first = self.next().unwrap_or(self.idle());
        self.set_current(Some(first));
        first.set_state(TaskState::Running);
        self.set_phase(Phase::NormalRun);

        // SAFETY: called exactly once, with every task's initial frame
        // already forged by `register_task`.
        unsafe { crate::arch::start_first_task(first) }
    }

    /// Quicksort with an explicit stack over the registered-tasks prefix of
    /// `self.tasks`, comparing by priority. `MAX_TASKS` is small enough
    /// (8) that the explicit stack is a fixed-size array, no allocation
    /// involved — matching the spec's "an explicit stack is sufficient"
    /// note and the teacher's general aversion to anything heap-backed.
    pub(crate) fn sort_tasks_by_priority(&'static self) {
        let n = self.task_count.get() as usize;
        if n < 2 {
            return;
        }
        // SAFETY: called from `init` (or, in tests, under the test
        // serialization lock), before any task runs.
        let tasks = unsafe { &mut *self.tasks.get() };

        // (low, high) ranges still to partition.
        let mut stack: [(usize, usize); MAX_TASKS] = [(0, 0); MAX_TASKS];
        let mut sp = 0usize;
        stack[sp] = (0, n - 1);
        sp += 1;

        while sp > 0 {
            sp -= 1;
            let (lo, hi) = stack[sp];
            if lo >= hi {
                continue;
            }
            let pivot = tasks[hi].unwrap().priority();
            let mut i = lo;
            for j in lo..hi {
                if tasks[j].unwrap().priority() <= pivot {
                    tasks.swap(i, j);
                    i += 1;
                }
            }
            tasks.swap(i, hi);

            if i > 0 && i - 1 > lo {
                stack[sp] = (lo, i - 1);
                sp += 1;
            }
            if i + 1 < hi {
                stack[sp] = (i + 1, hi);
                sp += 1;
            }
        }
    }

    pub(crate) fn compute_priority_starts(&'static self) {
        let counts = self.priority_counts.get();
        let mut starts = [0u8; PRIORITY_LEVELS];
        let mut running = 0u8;
        for p in 0..PRIORITY_LEVELS {
            starts[p] = running;
            running += counts[p];
        }
        self.priority_starts.set(starts);
    }

    /// Resets all mutable state back to its just-constructed shape.
    /// `Kernel` is a process-wide singleton (see [`kernel`]), so tests
    /// share one instance and must reset it between cases rather than
    /// constructing fresh ones.
    #[cfg(test)]
    pub(crate) fn reset_for_test(&'static self) {
        // SAFETY: exclusive access is guaranteed by the caller holding
        // `testutil::serialize()` for the duration of the test.
        unsafe {
            *self.tasks.get() = [None; MAX_TASKS];
        }
        self.task_count.set(0);
        self.priority_counts.set([0; PRIORITY_LEVELS]);
        self.priority_starts.set([0; PRIORITY_LEVELS]);
        self.cursors.set([0; PRIORITY_LEVELS]);
        self.current.set(None);
        self.next.set(None);
        self.phase.set(Phase::FromReset);
        self.reschedule_after_isr.store(false, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        self.idle.set_state(TaskState::Ready);
        self.tick_hook.set(default_tick_hook);
        self.return_hook.set(default_return_hook);
        self.errors.reset();
    }
}

static KERNEL: Kernel = Kernel::new();

/// Returns the process-wide kernel instance.
pub fn kernel() -> &'static Kernel {
    &KERNEL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    fn task_a() -> ! {
        loop {}
    }
    fn task_b() -> ! {
        loop {}
    }

    #[test]
    fn register_task_assigns_increasing_ids() {
        let _serial = crate::testutil::serialize();
        let k = kernel();
        k.reset_for_test();
        static TCB_A: Tcb = Tcb::new();
        static TCB_B: Tcb = Tcb::new();
        k.register_task(task_a, &TCB_A, Priority(1)).unwrap();
        k.register_task(task_b, &TCB_B, Priority(0)).unwrap();
        assert_eq!(TCB_A.id(), 0);
        assert_eq!(TCB_B.id(), 1);
        assert_eq!(k.task_count(), 2);
    }

    #[test]
    fn sort_groups_tasks_by_priority_band() {
        let _serial = crate::testutil::serialize();
        let k = kernel();
        k.reset_for_test();
        static T0: Tcb = Tcb::new();
        static T1: Tcb = Tcb::new();
        static T2: Tcb = Tcb::new();
        k.register_task(task_a, &T0, Priority(2)).unwrap();
        k.register_task(task_a, &T1, Priority(0)).unwrap();
        k.register_task(task_a, &T2, Priority(1)).unwrap();

        k.sort_tasks_by_priority();
        k.compute_priority_starts();

        assert_eq!(k.task_at(0).priority(), Priority(0));
        assert_eq!(k.task_at(1).priority(), Priority(1));
        assert_eq!(k.task_at(2).priority(), Priority(2));
        assert_eq!(k.priority_starts(), [0, 1, 2, 3]);
    }

    fn panicking_fatal_hook(code: Code, _caller: Caller) -> ! {
        panic!("fatal:{:?}", code);
    }

    #[test]
    fn too_many_tasks_is_fatal() {
        let _serial = crate::testutil::serialize();
        let k = kernel();
        k.reset_for_test();
        k.set_fatal_hook(panicking_fatal_hook);

        static TCBS: [Tcb; MAX_TASKS] = [
            Tcb::new(),
            Tcb::new(),
            Tcb::new(),
            Tcb::new(),
            Tcb::new(),
            Tcb::new(),
            Tcb::new(),
            Tcb::new(),
        ];
        static ONE_TOO_MANY: Tcb = Tcb::new();
        for tcb in TCBS.iter() {
            k.register_task(task_a, tcb, Priority(0)).unwrap();
        }
        assert_eq!(k.task_count() as usize, MAX_TASKS);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            k.register_task(task_a, &ONE_TOO_MANY, Priority(0))
        }));
        assert!(result.is_err());
        assert_eq!(k.last_error(), Some(Code::TooManyTasks));
    }
}
