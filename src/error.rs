// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error and warning log.
//!
//! Mirrors the recoverable/fatal split in the teacher's `kern::err` and the
//! failure-latch pattern in `kern::fail`, collapsed down to the two-case
//! taxonomy this kernel actually needs: a fatal `Code` halts the system
//! (there is no fault/restart model here, unlike hubris), a warning `Code`
//! just gets latched and handed to a hook.

use core::cell::Cell;
use core::panic::Location;
use core::sync::atomic::{AtomicBool, Ordering};

/// Identifies the call site that raised an error or warning.
///
/// The spec talks about "the address of the faulting call site"; we use
/// `Location` instead of a raw link-register read, since `#[track_caller]`
/// gives the same diagnostic value without needing inline assembly to read
/// `LR`, and it works identically on the host simulation backend.
pub type Caller = &'static Location<'static>;

/// Stable error/warning codes.
///
/// Negative values below -100 are warnings (the system keeps running);
/// everything else is fatal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Code {
    /// `register_task` called after the task table is full.
    TooManyTasks = -1,
    /// The scheduler found no dispatchable task and no idle task either
    /// (should be unreachable once `init` has run; kept as a belt-and-braces
    /// fatal check).
    Scheduling = -2,
    /// `delay` called while `Phase::IrqRun` is active.
    DelayFromIsr = -3,
    /// `Queue::try_write_isr` found the queue full.
    QueueFullFromIsr = -100,
    /// `Queue::try_read_isr` found the queue empty.
    QueueEmptyFromIsr = -101,
    /// The IRQ dispatcher fired for a line with no handler registered: the
    /// line was unmasked at the controller without a matching
    /// `install_irq` call.
    UnregisteredIrqLine = -102,
}

impl Code {
    /// Warnings are the `WARN_*` codes; everything else is fatal.
    pub fn is_warning(self) -> bool {
        (self as i32) <= -100
    }
}

/// Application-replaceable hooks, set (if at all) before [`crate::kernel::Kernel::init`].
pub type FatalHook = fn(Code, Caller) -> !;
pub type WarningHook = fn(Code, Caller);

fn default_fatal_hook(_code: Code, _caller: Caller) -> ! {
    loop {
        crate::arch::wait_for_interrupt();
    }
}

fn default_warning_hook(_code: Code, _caller: Caller) {}

static FATAL_LATCHED: AtomicBool = AtomicBool::new(false);

/// Last-error cell. `Cell<Option<Code>>` is not `Sync`, so this lives behind
/// the kernel's own `unsafe impl Sync` on [`crate::kernel::Kernel`] rather
/// than as a bare static here — see `Kernel::last_error`.
pub(crate) struct ErrorLog {
    last: Cell<Option<Code>>,
    fatal_hook: Cell<FatalHook>,
    warning_hook: Cell<WarningHook>,
}

impl ErrorLog {
    pub(crate) const fn new() -> Self {
        ErrorLog {
            last: Cell::new(None),
            fatal_hook: Cell::new(default_fatal_hook),
            warning_hook: Cell::new(default_warning_hook),
        }
    }

    pub(crate) fn last(&self) -> Option<Code> {
        self.last.get()
    }

    pub(crate) fn set_fatal_hook(&self, hook: FatalHook) {
        self.fatal_hook.set(hook);
    }

    pub(crate) fn set_warning_hook(&self, hook: WarningHook) {
        self.warning_hook.set(hook);
    }

    /// Records `code`, then calls the fatal hook. The default hook never
    /// returns; a replacement hook that does return is still treated as
    /// fatal by looping forever afterwards, since a fatal code must halt
    /// forward progress.
    ///
    /// If a fatal code has already been latched (e.g. the fatal hook itself
    /// triggers a second fault on its way down), this skips straight to the
    /// halt loop instead of re-entering the hook: `has_failed` is the check
    /// that keeps a fault-while-faulting from recursing.
    pub(crate) fn fatal(&self, code: Code, caller: Caller) -> ! {
        if has_failed() {
            loop {
                crate::arch::wait_for_interrupt();
            }
        }
        self.last.set(Some(code));
        FATAL_LATCHED.store(true, Ordering::SeqCst);
        (self.fatal_hook.get())(code, caller);
        loop {
            crate::arch::wait_for_interrupt();
        }
    }

    pub(crate) fn warning(&self, code: Code, caller: Caller) {
        self.last.set(Some(code));
        (self.warning_hook.get())(code, caller);
    }

    #[cfg(test)]
    pub(crate) fn reset(&self) {
        self.last.set(None);
        self.fatal_hook.set(default_fatal_hook);
        self.warning_hook.set(default_warning_hook);
        FATAL_LATCHED.store(false, Ordering::SeqCst);
    }
}

/// True once any fatal code has been raised. Mirrors `kern::fail`'s
/// `KERNEL_HAS_FAILED` latch; `ErrorLog::fatal` checks this itself so a
/// fault raised while already unwinding a fatal error doesn't recurse back
/// into the fatal hook.
pub fn has_failed() -> bool {
    FATAL_LATCHED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panicking_hook(code: Code, _caller: Caller) -> ! {
        // `fatal` latches `has_failed` before invoking this hook, so a
        // hook that itself observes a fault in progress sees it.
        assert!(has_failed());
        panic!("fatal:{:?}", code);
    }

    #[test]
    fn fatal_latches_has_failed_before_calling_the_hook() {
        // `FATAL_LATCHED` is a single process-wide static shared by every
        // `ErrorLog` (including the kernel singleton's), so this needs the
        // same cross-test serialization as the kernel-singleton tests.
        let _serial = crate::testutil::serialize();
        let log = ErrorLog::new();
        log.reset();
        log.set_fatal_hook(panicking_hook);
        assert!(!has_failed());

        let caller = Location::caller();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            log.fatal(Code::TooManyTasks, caller)
        }));
        assert!(result.is_err());
        assert!(has_failed());
        assert_eq!(log.last(), Some(Code::TooManyTasks));

        log.reset();
        assert!(!has_failed());
    }
}
