// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! This works the same way as in the teacher's `kern::arch`: a nested module
//! is selected and its contents re-exported here, so the rest of the crate
//! just writes `arch::whatever` and gets whichever backend is active.
//!
//! - `arm_m` is the real Cortex-M backend: exception-frame forging, the
//!   `PendSV`/`SysTick` handlers, NVIC/SysTick setup, and interrupt masking.
//! - `sim` is a do-nothing backend used under `#[cfg(test)]` so the portable
//!   scheduling/tick/semaphore/queue logic can be exercised on the host.
//!
//! The module is named `arm_m`, not `cortex_m`, to avoid shadowing the
//! `cortex-m` crate it depends on.

cfg_if::cfg_if! {
    if #[cfg(test)] {
        mod sim;
        pub use sim::*;
    } else if #[cfg(target_arch = "arm")] {
        #[macro_use]
        mod arm_m;
        pub use arm_m::*;
    } else {
        compile_error!(
            "corekernel requires target_arch = \"arm\"; build with `cfg(test)` \
             to use the host simulation backend instead"
        );
    }
}

/// Raw stack-pointer value as handed to/from the context-switch handler.
///
/// This is deliberately untyped (just the bit pattern the hardware uses for
/// the process stack pointer) because the only thing the portable kernel
/// does with it is store it into, and retrieve it from, a [`crate::task::Tcb`].
pub type RawSp = usize;
