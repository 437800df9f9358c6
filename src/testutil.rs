// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only helpers.
//!
//! `Kernel` and the critical-section depth counter are process-wide
//! singletons, the same way they'd be on real hardware (there's only one
//! kernel, one depth counter). `cargo test` runs tests on multiple threads
//! by default, so any test touching shared global state needs to serialize
//! against the others. This is the one piece of ambient stack the teacher
//! doesn't need (hubris's kernel isn't exercised as a Rust singleton under
//! `cargo test`; its host tests are over plain data, not a global `Kernel`),
//! so it's grounded on ordinary Rust testing practice for singleton state
//! rather than on a specific teacher file.

use std::sync::{Mutex, OnceLock};

static LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Acquire the process-wide test serialization lock. Hold the returned
/// guard for the duration of a test that reads or writes singleton kernel
/// state (the critical-section depth counter, `crate::kernel::kernel()`).
#[must_use]
pub(crate) fn serialize() -> std::sync::MutexGuard<'static, ()> {
    match LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
