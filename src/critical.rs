// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Critical sections: nested IRQ masking with a depth counter.
//!
//! Grounded on the masking discipline in the teacher's `arch/arm_m.rs`
//! (`cortex_m::interrupt::free`/primask save-restore around task-table
//! mutation) generalized into an explicit, re-entrant `enter`/`exit` pair
//! per spec §4.5, plus design note §9's "plain atomics are an acceptable
//! substitute for a real lock on a single core".

use core::sync::atomic::{AtomicI32, Ordering};

static DEPTH: AtomicI32 = AtomicI32::new(0);

/// Masks interrupts unconditionally and increments the depth counter.
///
/// Unconditional masking on every call (rather than only on the
/// zero-to-one transition) matches the spec exactly: it keeps the
/// depth counter the only piece of state `exit_critical` needs to consult.
pub fn enter_critical() {
    crate::arch::disable_interrupts();
    DEPTH.fetch_add(1, Ordering::SeqCst);
}

/// Decrements the depth counter (clamped at zero) and unmasks interrupts
/// once it reaches zero.
pub fn exit_critical() {
    let prev = DEPTH.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
        Some(if d > 0 { d - 1 } else { 0 })
    });
    let reached_zero = match prev {
        Ok(1) => true,
        Ok(_) => false,
        Err(_) => unreachable!("fetch_update's closure always returns Some"),
    };
    if reached_zero {
        crate::arch::enable_interrupts();
    }
}

/// Current nesting depth. Exposed for tests and for `delay`/`sem`/`queue`
/// assertions that a call happened (or didn't happen) inside a critical
/// section.
pub fn depth() -> i32 {
    DEPTH.load(Ordering::SeqCst)
}

/// RAII guard pairing `enter_critical`/`exit_critical`, used internally so
/// the kernel's own code can't forget the matching `exit_critical` on an
/// early return.
#[must_use]
pub(crate) struct Critical(());

impl Critical {
    pub(crate) fn enter() -> Self {
        enter_critical();
        Critical(())
    }
}

impl Drop for Critical {
    fn drop(&mut self) {
        exit_critical();
    }
}
