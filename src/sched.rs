// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler: priority-first, round-robin within a priority band.
//!
//! Grounded on `sys/kern/src/task.rs`'s `select`/`priority_scan` (scan from
//! a cursor, prefer the first `Ready` task at the highest populated
//! priority, stop without switching if the scan reaches the task that's
//! already `Running`) and the `FROM_RESET`/re-entrancy handling in the same
//! file's `select`. Generalized from the teacher's single global cursor to
//! one persistent cursor per priority band, since round-robin here is
//! scoped to "tasks at the same priority", not the whole system (spec
//! §4.2).

use crate::kernel::{Kernel, Phase};
use crate::task::{TaskState, PRIORITY_LEVELS};

/// Outcome of a scheduling pass: whether a different task should run next.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SchedResult {
    NoChange,
    SwitchPending,
}

impl Kernel {
    /// Runs one scheduling pass. Safe to call from task context (after a
    /// blocking call sets the current task `Blocked`), from the tick
    /// handler, or from the IRQ dispatcher's post-handler reschedule step.
    ///
    /// Re-entrant calls (a scheduling pass already in progress) return
    /// `NoChange` immediately rather than recursing — see
    /// `DESIGN.md`'s open-question resolution for why this never drops a
    /// wake-up.
    pub(crate) fn schedule(&'static self) -> SchedResult {
        match self.phase() {
            Phase::FromReset => {
                self.set_current(Some(self.idle()));
                self.set_phase(Phase::NormalRun);
                self.schedule_scan()
            }
            Phase::Scheduling => SchedResult::NoChange,
            _ => {
                let saved = self.set_phase(Phase::Scheduling);
                let result = self.schedule_scan();
                self.set_phase(saved);
                result
            }
        }
    }

    fn schedule_scan(&'static self) -> SchedResult {
        let count = self.task_count();
        if count == 0 {
            return self.select(self.idle());
        }

        let counts = self.priority_counts();
        let starts = self.priority_starts();

        for p in 0..PRIORITY_LEVELS {
            let n = counts[p];
            if n == 0 {
                continue;
            }
            let start = starts[p];
            let mut idx = self.cursor(p);
            let mut scanned = 0u8;

            loop {
                let tcb = self.task_at(start + idx);
                match tcb.state() {
                    TaskState::Ready => {
                        self.set_cursor(p, (idx + 1) % n);
                        return self.select(tcb);
                    }
                    TaskState::Running => {
                        // The current task, at a priority nothing higher
                        // preempted and nothing else at this priority has
                        // pre-empted it yet either: stay put.
                        return SchedResult::NoChange;
                    }
                    TaskState::Blocked => {
                        idx = (idx + 1) % n;
                        scanned += 1;
                        if scanned == n {
                            break;
                        }
                    }
                }
            }
        }

        self.select(self.idle())
    }

    fn select(&'static self, tcb: &'static crate::task::Tcb) -> SchedResult {
        if let Some(current) = self.current() {
            if core::ptr::eq(current, tcb) {
                return SchedResult::NoChange;
            }
        }
        self.set_next(Some(tcb));
        crate::arch::pend_switch();
        SchedResult::SwitchPending
    }

    /// Voluntarily gives up the remainder of the current task's time slice.
    /// Marks the calling task `Ready` (it stays dispatchable, just no
    /// longer preferred over the next task at its own priority) and runs a
    /// scheduling pass. Combined with the per-priority round-robin cursor
    /// in `schedule_scan` — already advanced past the calling task by its
    /// own earlier dispatch — this is what makes two equal-priority tasks
    /// that each call `yield_now()` once per iteration take turns rather
    /// than one starving the other.
    pub fn yield_now(&'static self) {
        let current = self
            .current_task()
            .expect("yield_now called before the kernel has dispatched any task");
        {
            let _guard = crate::critical::Critical::enter();
            current.set_state(TaskState::Ready);
        }
        self.schedule();
    }

    /// Called from the context-switch handler with the outgoing task's
    /// saved stack pointer; returns the incoming task's stack pointer.
    /// Demotes the outgoing task `Running` -> `Ready` (never touches a task
    /// that's already `Blocked` — see `DESIGN.md`'s open-question
    /// resolution #3) and promotes the incoming task to `Running`.
    pub(crate) fn compute_next_sp(
        &'static self,
        outgoing_sp: crate::arch::RawSp,
    ) -> crate::arch::RawSp {
        if let Some(current) = self.current() {
            // SAFETY: called only from the context-switch handler, which
            // owns exclusive access to the outgoing task's saved state
            // while it is not running.
            unsafe { current.saved_state() }.set_sp(outgoing_sp);
            if current.state() == TaskState::Running {
                current.set_state(TaskState::Ready);
            }
        }

        let incoming = self.next().unwrap_or_else(|| self.current().unwrap_or(self.idle()));
        incoming.set_state(TaskState::Running);
        self.set_current(Some(incoming));
        self.set_next(None);
        self.set_phase(Phase::NormalRun);

        // SAFETY: same as above, for the incoming task.
        unsafe { incoming.saved_state() }.sp()
    }
}
