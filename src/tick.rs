// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tick handler: the periodic timebase driving delays and round-robin
//! preemption.
//!
//! Grounded on `sys/kern/src/task.rs::process_timers` (decrement-and-wake
//! shape, generalized here from a single absolute deadline to a per-task
//! countdown, since `corekernel` has no wall-clock notion) and the
//! teacher's `SysTick` exception in `arch/arm_m.rs`.

use crate::kernel::Kernel;
use crate::task::TaskState;

impl Kernel {
    /// Runs once per tick: decrements every task's countdown, promotes any
    /// task whose countdown just reached zero back to `Ready`, runs a
    /// scheduling pass, then calls the application's tick hook. Order
    /// matters — the scheduling pass must see the just-woken tasks, and
    /// the tick hook must run after scheduling decisions are final, since
    /// applications often use it to toggle a "heartbeat" pin rather than
    /// to affect scheduling itself.
    pub(crate) fn on_tick(&'static self) {
        let count = self.task_count();
        for i in 0..count {
            let tcb = self.task_at(i);
            if tcb.state() == TaskState::Blocked && tcb.ticks_remaining() > 0 && tcb.tick_decrement()
            {
                tcb.set_state(TaskState::Ready);
            }
        }
        self.schedule();
        (self.tick_hook())();
    }
}
