// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary semaphore.
//!
//! Grounded on the single-waiter wake shape of `sys/kern/src/task.rs::post`
//! (record a waiter, flip it back to runnable, let the caller decide
//! whether a reschedule is needed) adapted from notification bits to a
//! plain "signal pending" flag, since `corekernel` has no notification
//! subsystem — see `DESIGN.md`'s open-question resolution #1 for the
//! give-with-no-waiter behavior this flag encodes.

use core::cell::Cell;

use crate::critical::Critical;
use crate::kernel::kernel;
use crate::task::{TaskState, Tcb};

/// A binary semaphore: at most one outstanding "give" is ever remembered,
/// and at most one task can be blocked on it at a time (spec's explicit
/// non-goal: no counting semaphores).
pub struct Semaphore {
    signaled: Cell<bool>,
    waiter: Cell<Option<&'static Tcb>>,
}

// SAFETY: both fields are only ever mutated inside a critical section
// (`take`'s registration, `give`'s handoff), the same discipline `Tcb` and
// `Kernel` rely on.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new() -> Self {
        Semaphore {
            signaled: Cell::new(false),
            waiter: Cell::new(None),
        }
    }

    /// Blocks the calling task until a signal is available, consuming it.
    /// If a signal is already pending (a prior `give` found no waiter),
    /// returns immediately without blocking.
    ///
    /// Loops until the signal is actually consumed, re-registering as
    /// waiter each pass: something other than a genuine `give` marking the
    /// task `Ready` again (a spurious wake) must not be mistaken for
    /// success, so on every iteration this re-enters the critical section
    /// and re-checks `signaled` exactly like a fresh `take` would, rather
    /// than trusting the task's state alone. Matches `queue.rs`'s
    /// `write`/`read`.
    pub fn take(&self) {
        let k = kernel();
        let current = k
            .current_task()
            .expect("take called before the kernel has dispatched any task");

        loop {
            let done = {
                let _guard = Critical::enter();
                if self.signaled.get() {
                    self.signaled.set(false);
                    true
                } else {
                    self.waiter.set(Some(current));
                    current.set_state(TaskState::Blocked);
                    false
                }
            };
            if done {
                return;
            }
            while current.state() == TaskState::Blocked {
                crate::arch::pend_switch();
            }
        }
    }

    /// Signals the semaphore. If a task is waiting, wakes it; otherwise
    /// the signal is remembered for the next `take`.
    pub fn give(&self) {
        let _guard = Critical::enter();
        self.give_locked();
    }

    /// Signals the semaphore from an interrupt handler and marks a
    /// reschedule as owed once the handler returns — see
    /// [`crate::irq::install_irq`].
    pub fn give_from_isr(&self) {
        {
            let _guard = Critical::enter();
            self.give_locked();
        }
        kernel().request_reschedule_after_isr();
    }

    fn give_locked(&self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.set_state(TaskState::Ready);
        } else {
            self.signaled.set(true);
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Semaphore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::kernel;
    use crate::task::{Priority, Tcb};

    fn body() -> ! {
        loop {}
    }

    #[test]
    fn give_without_waiter_is_dropped_when_already_taken() {
        let _serial = crate::testutil::serialize();
        let sem = Semaphore::new();
        // Two gives with no intervening take: the second is redundant, the
        // flag simply stays set, it does not accumulate (a later `take`
        // only consumes one signal, matching "binary", not "counting").
        sem.give();
        sem.give();
        assert!(sem.signaled.get());

        let k = kernel();
        k.reset_for_test();
        static TCB: Tcb = Tcb::new();
        k.register_task(body, &TCB, Priority(0)).unwrap();
        k.sort_tasks_by_priority();
        k.compute_priority_starts();
        k.schedule();
        k.compute_next_sp(0);

        sem.take(); // consumes the single pending signal, no block
        assert_eq!(TCB.state(), crate::task::TaskState::Running);
        assert!(!sem.signaled.get());
    }

    #[test]
    fn take_with_no_signal_blocks_then_give_wakes_it() {
        let _serial = crate::testutil::serialize();
        let k = kernel();
        k.reset_for_test();
        static TCB: Tcb = Tcb::new();
        k.register_task(body, &TCB, Priority(0)).unwrap();
        k.sort_tasks_by_priority();
        k.compute_priority_starts();
        k.schedule();
        k.compute_next_sp(0);

        let sem = Semaphore::new();
        {
            // Exercise only the registration half of `take` directly,
            // since the real blocking loop requires a real context switch
            // to ever make progress (see `arch::sim`'s module docs).
            let _guard = Critical::enter();
            assert!(!sem.signaled.get());
            sem.waiter.set(Some(&TCB));
            TCB.set_state(crate::task::TaskState::Blocked);
        }
        assert_eq!(TCB.state(), crate::task::TaskState::Blocked);

        sem.give();
        assert_eq!(TCB.state(), crate::task::TaskState::Ready);
        assert!(sem.waiter.get().is_none());
    }

    #[test]
    fn give_from_isr_requests_reschedule() {
        let _serial = crate::testutil::serialize();
        let k = kernel();
        k.reset_for_test();
        let sem = Semaphore::new();
        sem.give_from_isr();
        assert!(k.take_reschedule_after_isr());
        // Consuming it once clears the flag.
        assert!(!k.take_reschedule_after_isr());
    }
}
