// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IRQ dispatcher.
//!
//! Grounded on `sys/kern/src/arch/arm_m.rs::DefaultHandler` (phase
//! transition around interrupt dispatch, NVIC enable/disable/clear-pending
//! helpers) generalized from the teacher's fixed interrupt-to-notification-bit
//! table to a registered-handler table, since `corekernel` has no
//! task/notification model to post into.

use core::cell::Cell;
use core::panic::Location;

use crate::error::Code;
use crate::kernel::{kernel, Phase};

/// Number of external interrupt lines the dispatcher can track. 32 matches
/// a single NVIC `ISER`/`ICER` register's worth of lines, the common case
/// for the small Cortex-M0/M0+/M3 parts this kernel targets; boards with
/// more lines are out of scope here the same way concrete vector-table
/// wiring is (spec §1).
pub const MAX_IRQS: usize = 32;

pub type Handler = fn();

struct IrqTable {
    handlers: [Cell<Option<Handler>>; MAX_IRQS],
}

// SAFETY: every slot is only ever written inside a critical section
// (`install_irq`/`remove_irq`) and only ever read from `dispatch`, which
// itself runs with the line's interrupt already active (so nothing else
// re-enters the same slot concurrently on a single core).
unsafe impl Sync for IrqTable {}

#[allow(clippy::declare_interior_mutable_const)]
const NO_HANDLER: Cell<Option<Handler>> = Cell::new(None);

static TABLE: IrqTable = IrqTable {
    handlers: [NO_HANDLER; MAX_IRQS],
};

/// Registers `handler` for interrupt line `line`: clears any pending state
/// left at the controller, then unmasks it. Returns `false` without
/// touching anything if the slot was already occupied — a line can only
/// ever have one handler installed at a time; the caller must
/// `remove_irq` it first.
pub fn install_irq(line: usize, handler: Handler) -> bool {
    assert!(line < MAX_IRQS, "interrupt line out of range");
    let _guard = crate::critical::Critical::enter();
    if TABLE.handlers[line].get().is_some() {
        return false;
    }
    TABLE.handlers[line].set(Some(handler));
    crate::arch::clear_pending_irq_line(line);
    crate::arch::enable_irq_line(line);
    true
}

/// Masks `line` at the NVIC, clears any pending state, and removes its
/// handler.
pub fn remove_irq(line: usize) {
    assert!(line < MAX_IRQS, "interrupt line out of range");
    let _guard = crate::critical::Critical::enter();
    crate::arch::disable_irq_line(line);
    crate::arch::clear_pending_irq_line(line);
    TABLE.handlers[line].set(None);
}

/// Dispatch trampoline: called by the architecture's generic exception
/// handler (`DefaultHandler` on the real backend) with the firing line
/// number. Saves and restores the system phase around the registered
/// handler so `delay`'s `ERR_DELAY_FROM_ISR` check sees `Phase::IrqRun`
/// for the whole duration of the handler, then — once the phase is
/// restored — consults the reschedule-after-ISR flag exactly once, so a
/// handler that calls `Semaphore::give_from_isr`/`Queue::try_write_isr`
/// gets a single reschedule after it returns rather than one per wake-up.
///
/// A line with no registered handler is a logic error — the interrupt was
/// unmasked at the controller without a matching `install_irq` — and is
/// reported through the warning hook rather than silently skipped.
#[track_caller]
pub(crate) fn dispatch(line: usize) {
    let caller = Location::caller();
    let k = kernel();
    let saved_phase = k.set_phase(Phase::IrqRun);

    match TABLE.handlers.get(line).and_then(Cell::get) {
        Some(handler) => handler(),
        None => k.warning(Code::UnregisteredIrqLine, caller),
    }

    k.set_phase(saved_phase);

    if k.take_reschedule_after_isr() {
        crate::arch::pend_switch();
    }
}
