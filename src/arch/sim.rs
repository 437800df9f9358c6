// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host simulation backend, selected under `#[cfg(test)]`.
//!
//! Grounded on `sys/kern/src/arch/fake.rs`: a do-nothing implementation of
//! the same surface the real backend provides, so the portable scheduling,
//! tick, semaphore, queue, and critical-section logic can run as ordinary
//! host unit tests. Like the teacher's `fake.rs`, this backend does not
//! attempt to simulate real preemption or a second call stack — there is no
//! assembly here, no register save/restore, nothing that actually
//! "switches" execution to a different Rust call frame. Tests exercise the
//! portable decision functions (`Kernel::schedule`, `Kernel::compute_next_sp`,
//! `Semaphore::try_take`/`give`, ...) directly, the same way
//! `sys/kern`'s own tests exercise `task::select`/`task::process_timers`
//! against `arch::fake` without ever taking a real exception.

use core::sync::atomic::{AtomicBool, Ordering};

/// Nothing to save: there is no real register file to preserve on the host.
#[derive(Copy, Clone, Debug, Default)]
pub struct SavedState {
    /// Opaque "stack pointer" the portable kernel round-trips through
    /// `compute_next_sp`; on the host this carries no meaning beyond
    /// equality comparison in tests.
    pub sp: usize,
}

impl SavedState {
    pub const fn new() -> Self {
        SavedState { sp: 0 }
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn set_sp(&mut self, value: usize) {
        self.sp = value;
    }
}

static IRQ_MASKED: AtomicBool = AtomicBool::new(false);
static SWITCH_PENDING: AtomicBool = AtomicBool::new(false);

pub fn disable_interrupts() {
    IRQ_MASKED.store(true, Ordering::SeqCst);
}

pub fn enable_interrupts() {
    IRQ_MASKED.store(false, Ordering::SeqCst);
}

pub fn interrupts_masked() -> bool {
    IRQ_MASKED.load(Ordering::SeqCst)
}

pub fn wait_for_interrupt() {
    // Nothing to wait for on the host; yield the OS thread so a test
    // driving a spin loop doesn't peg a core.
    std::thread::yield_now();
}

/// Forges the initial exception frame. On real hardware this writes a
/// `BaseExceptionFrame` into the task's stack and sets up `SavedState` so
/// the first context switch dispatches straight into `entry`. On the host
/// there is no frame to forge; we just remember the stack's address as the
/// "initial stack pointer" so `compute_next_sp` has something to round-trip.
pub fn forge_initial_frame(tcb: &crate::task::Tcb, entry: fn() -> !) {
    let _ = entry;
    // SAFETY: called only from `register_task`, before the task is
    // schedulable, same precondition as the real backend.
    let stack_ptr = unsafe { tcb.stack_words().as_ptr() as usize };
    unsafe {
        tcb.saved_state().sp = stack_ptr;
    }
}

/// Marks a context switch as pending and records it for inspection by
/// tests; the simulation does not itself perform the switch (`cargo test`
/// has no PendSV to tail-chain into). Callers in the portable layer
/// (`delay`, `sem_take`, `queue`) follow this with an explicit call into
/// `Kernel::schedule`/`Kernel::compute_next_sp`, which is the part under
/// test.
pub fn pend_switch() {
    SWITCH_PENDING.store(true, Ordering::SeqCst);
}

/// Test hook: was a switch requested since the last `take_pend_switch`?
pub fn take_pend_switch() -> bool {
    SWITCH_PENDING.swap(false, Ordering::SeqCst)
}

/// No real NVIC/SysTick to program on the host.
pub fn init_hardware(_tick_period_ms: u32) {}

pub fn enable_irq_line(_line: usize) {}

pub fn disable_irq_line(_line: usize) {}

pub fn clear_pending_irq_line(_line: usize) {}

/// There is no real first-task handoff on the host: no separate stack to
/// switch to, no exception-return trick available. We call the entry point
/// directly, which is enough to keep the signature symmetric with the real
/// backend; nothing in the test suite calls `Kernel::init` end-to-end
/// (it would hang forever in the idle/task loop, same as it would on real
/// hardware), so this path only needs to type-check, not to be exercised.
///
/// # Safety
/// Mirrors the real backend's contract: call exactly once, after the
/// initial frame has been forged.
pub unsafe fn start_first_task(first: &crate::task::Tcb) -> ! {
    let entry = first.entry().expect("first task must be registered");
    entry()
}
