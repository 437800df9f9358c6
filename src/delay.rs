// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delay API.
//!
//! Grounded on spec §4.6 directly; the critical-section-then-yield-loop
//! shape mirrors the blocking calls in `sys/kern`'s syscall handlers
//! (`syscalls.rs`), generalized from message-passing blocks to a plain
//! tick countdown.

use core::panic::Location;

use crate::critical::Critical;
use crate::error::Code;
use crate::kernel::{kernel, Phase};
use crate::task::TaskState;

/// Blocks the calling task for `ticks` tick periods.
///
/// Fatal (`ERR_DELAY_FROM_ISR`) if called while an interrupt handler
/// dispatched through [`crate::irq::install_irq`] is running — there is no
/// "calling task" to block in that context.
///
/// `delay(0)` returns immediately without yielding, matching the spec's
/// "ticks_remaining == 0 exits the loop" edge case taken to its limit.
#[track_caller]
pub fn delay(ticks: u32) {
    let k = kernel();
    let caller = Location::caller();
    if k.phase() == Phase::IrqRun {
        k.fatal(Code::DelayFromIsr, caller);
    }
    if ticks == 0 {
        return;
    }

    let current = k
        .current_task()
        .expect("delay called before the kernel has dispatched any task");

    {
        let _guard = Critical::enter();
        current.set_ticks_remaining(ticks);
        current.set_state(TaskState::Blocked);
    }

    // Re-asserting `Blocked` on every iteration (rather than once, before
    // the loop) matches the spec's defensive loop shape: the task resumes
    // here only once rescheduled, at which point its own state must still
    // read `Blocked` for as long as ticks remain, even though nothing
    // outside the tick handler should have changed it in between.
    while current.ticks_remaining() > 0 {
        current.set_state(TaskState::Blocked);
        crate::arch::pend_switch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::kernel;

    #[test]
    fn delay_zero_is_a_no_op() {
        let _serial = crate::testutil::serialize();
        let k = kernel();
        k.reset_for_test();
        static TCB: crate::task::Tcb = crate::task::Tcb::new();
        fn body() -> ! {
            loop {}
        }
        k.register_task(body, &TCB, crate::task::Priority(0))
            .unwrap();
        k.sort_tasks_by_priority();
        k.compute_priority_starts();
        k.schedule();
        k.compute_next_sp(0);

        delay(0);
        assert_eq!(TCB.state(), crate::task::TaskState::Running);
    }

    #[test]
    fn delay_from_irq_run_is_fatal() {
        let _serial = crate::testutil::serialize();
        let k = kernel();
        k.reset_for_test();
        fn hook(code: Code, _caller: crate::error::Caller) -> ! {
            panic!("fatal:{:?}", code);
        }
        k.set_fatal_hook(hook);
        let saved = k.set_phase(Phase::IrqRun);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| delay(1)));
        assert!(result.is_err());
        assert_eq!(k.last_error(), Some(Code::DelayFromIsr));

        k.set_phase(saved);
    }
}
