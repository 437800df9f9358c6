// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task Control Block and the handful of types describing a task's
//! scheduling state.
//!
//! Grounded on `sys/kern/src/task.rs`'s `Task` struct (saved-register block,
//! priority, state, and the `ArchState` split between portable bookkeeping
//! and architecture-specific register storage) and `sys/kern/src/arch/arm_m.rs`'s
//! `SavedState`/exception-frame forging, narrowed to this kernel's simpler
//! model: no IPC, no regions, no notifications, just run/block/ready.

use core::cell::{Cell, UnsafeCell};

use crate::arch;

/// Fixed per-task stack size, in 32-bit words (256 bytes). Matches the
/// spec's "application-sized, kernel-forged" stack model: the application
/// owns the storage (a `static`), the kernel only ever writes the initial
/// frame into it once, at `register_task` time.
pub const STACK_WORDS: usize = 64;

/// Maximum number of tasks the kernel can track, idle task not included.
pub const MAX_TASKS: usize = 8;

/// Number of distinct priority levels, 0 (highest) through
/// `PRIORITY_LEVELS - 1` (lowest).
pub const PRIORITY_LEVELS: usize = 4;

/// A task priority. Lower numeric value is more important, matching
/// `abi::Priority::is_more_important_than` in the teacher.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Priority(pub u8);

impl Priority {
    /// Sentinel used only by the kernel's own idle task; never assigned via
    /// `register_task` (priorities passed to `register_task` must be
    /// `< PRIORITY_LEVELS`).
    pub(crate) const IDLE: Priority = Priority(0xFF);

    pub fn is_more_important_than(self, other: Priority) -> bool {
        self.0 < other.0
    }
}

/// Task scheduling state, matching spec §3 exactly: a task is always in
/// exactly one of these three states.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
}

/// Task Control Block.
///
/// `Tcb`s are owned by the application as `'static` storage (a `static TCB:
/// Tcb = Tcb::new();` per task, the same way the original C source declares
/// `tarea_t` globals) and handed to [`crate::kernel::Kernel::register_task`]
/// by reference; the kernel never allocates one.
///
/// All fields are `Cell`/`UnsafeCell` rather than requiring `&mut` access,
/// because a `Tcb` is read and written from both task context and the
/// context-switch exception — the kernel's own invariant (every mutation
/// happens either inside a critical section, or inside the non-reentrant
/// `PendSV` handler with interrupts already effectively serialized on a
/// single core) is what makes that sound, not anything the type system
/// tracks for us. Matches the spirit of `sys/kern/src/task.rs`'s `Task`,
/// which is likewise mutated through shared table access guarded by the
/// kernel's own calling discipline rather than by `&mut`.
pub struct Tcb {
    save: UnsafeCell<arch::SavedState>,
    stack: UnsafeCell<[u32; STACK_WORDS]>,
    entry: Cell<Option<fn() -> !>>,
    id: Cell<u8>,
    priority: Cell<Priority>,
    state: Cell<TaskState>,
    ticks_remaining: Cell<u32>,
}

// SAFETY: see the type-level doc comment above — every mutation point is
// serialized by the kernel's own critical-section/exception-handler
// discipline, never by concurrent unsynchronized access.
unsafe impl Sync for Tcb {}

impl Tcb {
    /// Builds a blank TCB. Every field is a don't-care until
    /// `register_task` fills it in; the task is not schedulable before
    /// that.
    pub const fn new() -> Self {
        Tcb {
            save: UnsafeCell::new(arch::SavedState::new()),
            stack: UnsafeCell::new([0; STACK_WORDS]),
            entry: Cell::new(None),
            id: Cell::new(0xFF),
            priority: Cell::new(Priority::IDLE),
            state: Cell::new(TaskState::Blocked),
            ticks_remaining: Cell::new(0),
        }
    }

    /// Builds the kernel's own idle TCB, with a fixed entry point and the
    /// priority sentinel, bypassing the registry (the idle task is never
    /// counted in `task_count` or scanned by the priority loop).
    pub(crate) const fn new_idle(entry: fn() -> !) -> Self {
        Tcb {
            save: UnsafeCell::new(arch::SavedState::new()),
            stack: UnsafeCell::new([0; STACK_WORDS]),
            entry: Cell::new(Some(entry)),
            id: Cell::new(0xFF),
            priority: Cell::new(Priority::IDLE),
            state: Cell::new(TaskState::Ready),
            ticks_remaining: Cell::new(0),
        }
    }

    pub fn id(&self) -> u8 {
        self.id.get()
    }

    pub fn priority(&self) -> Priority {
        self.priority.get()
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    pub(crate) fn ticks_remaining(&self) -> u32 {
        self.ticks_remaining.get()
    }

    pub(crate) fn set_ticks_remaining(&self, ticks: u32) {
        self.ticks_remaining.set(ticks);
    }

    /// Decrements the countdown by one if it's nonzero. Returns `true` if
    /// this call is the one that brought it to exactly zero.
    pub(crate) fn tick_decrement(&self) -> bool {
        let remaining = self.ticks_remaining.get();
        if remaining == 0 {
            return false;
        }
        self.ticks_remaining.set(remaining - 1);
        remaining - 1 == 0
    }

    pub(crate) fn entry(&self) -> Option<fn() -> !> {
        self.entry.get()
    }

    pub(crate) fn set_entry(&self, entry: fn() -> !) {
        self.entry.set(Some(entry));
    }

    pub(crate) fn fill_registration(&self, entry: fn() -> !, id: u8, priority: Priority) {
        self.entry.set(Some(entry));
        self.id.set(id);
        self.priority.set(priority);
        self.state.set(TaskState::Ready);
        self.ticks_remaining.set(0);
    }

    /// The task's private stack, as a mutable word slice, for the
    /// architecture backend to forge the initial exception frame into.
    ///
    /// # Safety
    /// Caller must hold exclusive access, i.e. only call this from
    /// `register_task` (before the task is schedulable) or from the
    /// context-switch handler for the currently-switched-out task.
    pub(crate) unsafe fn stack_words(&self) -> &mut [u32; STACK_WORDS] {
        &mut *self.stack.get()
    }

    pub(crate) unsafe fn saved_state(&self) -> &mut arch::SavedState {
        &mut *self.save.get()
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Tcb::new()
    }
}
