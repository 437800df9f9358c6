// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `corekernel` — a small preemptive, priority-based real-time kernel core
//! for single-core ARM Cortex-M targets.
//!
//! Fixed-size task table, static TCBs, priority scheduling with
//! round-robin within a priority band, a tick-driven delay API, a binary
//! semaphore, a fixed-capacity byte queue, and an IRQ dispatcher. No
//! dynamic task creation after [`kernel::Kernel::init`], no priority
//! inheritance, no mutexes or counting semaphores, no SMP, no memory
//! protection, no dynamic allocation — see `SPEC_FULL.md` for the full
//! rationale behind each of those non-goals.
//!
//! Modeled on `sys/kern` in the teacher repository this crate was built
//! against: a portable kernel core (task table, scheduler, tick
//! processing) behind an [`arch`] abstraction, with a do-nothing host
//! backend swapped in under `#[cfg(test)]` so the portable logic has real
//! unit test coverage without needing target hardware or an emulator.
#![cfg_attr(not(test), no_std)]

pub mod arch;
mod critical;
mod delay;
mod error;
mod irq;
mod kernel;
mod sched;
mod sem;
mod queue;
mod task;
mod tick;

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod scenarios;

pub use critical::{depth as critical_depth, enter_critical, exit_critical};
pub use delay::delay;
pub use error::{has_failed, Caller, Code, FatalHook, WarningHook};
pub use irq::{install_irq, remove_irq, Handler as IrqHandler, MAX_IRQS};
pub use kernel::{kernel, Kernel, Phase};
pub use queue::Queue;
pub use sem::Semaphore;
pub use task::{Priority, TaskState, Tcb, MAX_TASKS, PRIORITY_LEVELS, STACK_WORDS};
