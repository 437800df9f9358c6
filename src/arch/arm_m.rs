// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real Cortex-M architecture backend.
//!
//! Grounded on `sys/kern/src/arch/arm_m.rs`: the `SavedState`/exception-frame
//! layout, the `reinitialize` stack-forging routine, the hand-written
//! `PendSV` `global_asm!` (selected per architecture variant, not wrapped in
//! `cortex-m-rt`'s `#[exception]` since vector-table ownership is an
//! external concern — see spec §6), and `cortex_m::peripheral` register
//! access for NVIC/SCB/SysTick setup. The exact register-save/restore and
//! `sp_actual`/`sp_siguiente` swap semantics additionally follow
//! `examples/original_source/src/MSE_OS_Core.c`'s `getContextoSiguiente`.

use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::peripheral::{scb::SystemHandler, Peripherals, SCB, SYST};
use cortex_m::register::primask;

use crate::kernel::kernel;
use crate::task::Tcb;

/// Registers the context-switch handler must preserve across a switch but
/// that the hardware doesn't stack automatically on exception entry: the
/// callee-saved set `r4`-`r11`, plus the process stack pointer itself and
/// the `EXC_RETURN` value that tells the exception return sequence whether
/// to restore the base or the FPU-extended frame.
///
/// Matches `sys/kern/src/arch/arm_m.rs`'s `SavedState`, minus the
/// region-table/MPU fields this kernel has no use for (no memory
/// protection, an explicit non-goal).
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct SavedState {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub psp: u32,
    pub exc_return: u32,
}

impl SavedState {
    pub const fn new() -> Self {
        SavedState {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            psp: 0,
            exc_return: 0,
        }
    }

    pub fn sp(&self) -> usize {
        self.psp as usize
    }

    pub fn set_sp(&mut self, value: usize) {
        self.psp = value as u32;
    }
}

/// The frame the hardware automatically stacks on exception entry (and
/// unstacks on exception return), in the order Cortex-M defines it: r0-r3,
/// r12, lr, pc, xpsr.
#[repr(C)]
struct ExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Default xPSR for a freshly forged task: Thumb bit set, no other flags,
/// matching the original source's forged frame.
const INITIAL_XPSR: u32 = 0x0100_0000;

/// `EXC_RETURN` for "return to thread mode, use PSP, no floating point
/// frame": thread/PSP/no-FP variant used for every forged task, since none
/// of them start inside a nested exception.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Forges the initial exception frame at the top of `tcb`'s stack, so the
/// first context switch into this task "returns" straight into `entry`
/// with a clean register file. Mirrors `reinitialize` in the teacher and
/// `os_InitTarea` in the original C source: the forged layout reserves
/// room for *both* the hardware-stacked frame (r0-r3, r12, lr, pc, xpsr)
/// and the manually-stacked callee-saved block (r4-r11) directly below it
/// — `FULL_STACKING_SIZE` in the original — because `PendSV`'s restore
/// path (`ldmia r0!, {r4-r11}` before `msr psp, r0`) walks through the
/// callee-saved block first no matter whether this is the very first time
/// the task runs or its hundredth. `SavedState.psp` is seeded to the start
/// of that callee-saved block, not the hardware frame, so a task that has
/// never run before restores exactly the same way as one being switched
/// back in.
pub fn forge_initial_frame(tcb: &Tcb, entry: fn() -> !) {
    // SAFETY: called only from `register_task`, before the task is
    // schedulable and before any concurrent access is possible.
    let stack = unsafe { tcb.stack_words() };
    let frame_words = core::mem::size_of::<ExceptionFrame>() / 4;
    let saved_words = core::mem::size_of::<SavedState>() / 4 - 2; // r4-r11 only
    let frame_index = stack.len() - frame_words;
    let saved_index = frame_index - saved_words;

    // SAFETY: `ExceptionFrame` is `repr(C)` and exactly `frame_words` words
    // wide; `frame_index` leaves exactly that much room at the top of the
    // stack array.
    let frame = unsafe { &mut *(stack[frame_index..].as_mut_ptr() as *mut ExceptionFrame) };
    frame.r0 = 0;
    frame.r1 = 0;
    frame.r2 = 0;
    frame.r3 = 0;
    frame.r12 = 0;
    // A task entry point is `fn() -> !`; it must never execute a `bx lr`.
    // `lr` is forged to the current `return_hook` anyway, so a task that
    // breaks that contract and returns lands somewhere defined (spinning
    // forever by default) instead of branching to garbage.
    frame.lr = (kernel().return_hook() as usize as u32) | 1;
    frame.pc = (entry as usize as u32) | 1;
    frame.xpsr = INITIAL_XPSR;

    // The callee-saved block below the frame: zeroed, since its contents
    // are don't-care until the task is switched out for the first time.
    for word in &mut stack[saved_index..frame_index] {
        *word = 0;
    }
    let restore_addr = &stack[saved_index] as *const u32 as u32;

    // SAFETY: exclusive access, same precondition as above.
    let saved = unsafe { tcb.saved_state() };
    *saved = SavedState {
        r4: 0,
        r5: 0,
        r6: 0,
        r7: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
        psp: restore_addr,
        exc_return: EXC_RETURN_THREAD_PSP,
    };
}

static SWITCH_PENDING: AtomicBool = AtomicBool::new(false);

/// Pends the context-switch exception and executes the barrier pair the
/// architecture reference requires after reprogramming `NVIC`/`SCB`
/// pending-exception state, so the pend is visible before the next
/// instruction boundary. `PendSV` runs at the lowest configurable priority,
/// so pending it from thread-mode code (where `delay`/`sem_take`/
/// `queue_read`/`queue_write` call this) causes the processor to tail-chain
/// into it essentially immediately once the current critical section exits.
pub fn pend_switch() {
    SWITCH_PENDING.store(true, Ordering::SeqCst);
    SCB::set_pendsv();
    cortex_m::asm::isb();
    cortex_m::asm::dsb();
}

pub fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

pub fn enable_interrupts() {
    // SAFETY: paired with a prior `disable_interrupts`, per the depth-
    // counter discipline in `critical.rs`; this backend never unmasks
    // without the portable layer having tracked the matching enable.
    unsafe { cortex_m::interrupt::enable() };
}

pub fn interrupts_masked() -> bool {
    primask::read().is_inactive()
}

pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// NVIC Interrupt Set/Clear-Enable register base addresses. There is no
/// generated peripheral-access-crate interrupt enum in scope here (the
/// spec excludes concrete vector-table wiring as a board concern), so
/// lines are unmasked/masked directly by register offset instead of going
/// through `cortex_m::peripheral::NVIC`'s generic `InterruptNumber` API.
const NVIC_ISER_BASE: usize = 0xE000_E100;
const NVIC_ICER_BASE: usize = 0xE000_E180;
const NVIC_ICPR_BASE: usize = 0xE000_E280;

pub fn enable_irq_line(line: usize) {
    let reg = (NVIC_ISER_BASE + 4 * (line / 32)) as *mut u32;
    // SAFETY: `line` is validated against `MAX_IRQS` by `irq::install_irq`
    // before this is called; the ISER/ICER/ICPR block is always mapped on
    // Cortex-M.
    unsafe { reg.write_volatile(1 << (line % 32)) };
}

pub fn disable_irq_line(line: usize) {
    let reg = (NVIC_ICER_BASE + 4 * (line / 32)) as *mut u32;
    // SAFETY: see `enable_irq_line`.
    unsafe { reg.write_volatile(1 << (line % 32)) };
}

/// Clears `line`'s pending state at the NVIC (write-1-to-clear), so a
/// line freshly installed or removed doesn't immediately fire, or
/// re-fire, on stale pending state left over from before it was masked.
pub fn clear_pending_irq_line(line: usize) {
    let reg = (NVIC_ICPR_BASE + 4 * (line / 32)) as *mut u32;
    // SAFETY: see `enable_irq_line`.
    unsafe { reg.write_volatile(1 << (line % 32)) };
}

/// Programs `SysTick` for a `tick_period_ms` millisecond tick and drops
/// `PendSV`'s exception priority to the lowest configurable value, so it
/// always tail-chains after `SysTick` and any other pending exception
/// rather than preempting them. Matches `start_first_task`'s NVIC/SCB setup
/// in the teacher, minus the MPU/region-table programming this kernel has
/// no use for.
pub fn init_hardware(tick_period_ms: u32) {
    // SAFETY: called once, from `Kernel::init`, before interrupts are
    // enabled and before any task has run.
    let mut peripherals = unsafe { Peripherals::steal() };

    unsafe {
        peripherals
            .SCB
            .set_priority(SystemHandler::PendSV, 0xFF);
    }

    let reload = systick_reload_for(tick_period_ms);
    peripherals.SYST.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
    peripherals.SYST.set_reload(reload);
    peripherals.SYST.clear_current();
    peripherals.SYST.enable_interrupt();
    peripherals.SYST.enable_counter();
}

fn systick_reload_for(tick_period_ms: u32) -> u32 {
    // Reload value selection is a board/clock-tree concern out of scope
    // here (spec §1); callers on real hardware are expected to have
    // calibrated `tick_period_ms` against their actual core clock. We use
    // the max reload as a placeholder so this compiles standalone.
    let _ = tick_period_ms;
    SYST::get_ticks_per_10ms().saturating_mul(100).min(0x00FF_FFFF)
}

/// Transfers control to the first task. Unlike every later switch, this
/// one isn't triggered by an exception: there's no "previous task" to save,
/// so we just load the process stack pointer from the forged frame, switch
/// `CONTROL` to use it, and branch straight into `entry`. Matches
/// `start_first_task` in the teacher and the `FROM_RESET` special case in
/// the original C source's `getContextoSiguiente`.
///
/// `SavedState.psp` points at the callee-saved (r4-r11) block `PendSV`'s
/// restore path would walk through first; since this path skips that
/// restore entirely and loads straight into `entry`, it steps over that
/// block to find the hardware exception frame directly beneath it.
///
/// # Safety
/// Must be called exactly once, with `first`'s initial frame already
/// forged by [`forge_initial_frame`], and must never return.
pub unsafe fn start_first_task(first: &Tcb) -> ! {
    let saved_words = (core::mem::size_of::<SavedState>() / 4 - 2) as u32;
    let psp = unsafe { first.saved_state() }.psp + saved_words * 4;
    let entry = first.entry().expect("first task must be registered");

    cortex_m::register::psp::write(psp);
    let mut control = cortex_m::register::control::read();
    control.set_spsel(cortex_m::register::control::Spsel::Psp);
    cortex_m::register::control::write(control);
    cortex_m::asm::isb();

    enable_interrupts();
    entry()
}

/// Entry point called (from assembly, in task-mode register context) once
/// `PendSV`'s prologue has stacked the callee-saved registers of the
/// outgoing task onto its own process stack and loaded `current_sp` as an
/// argument. Calls into the portable scheduler to decide who runs next and
/// returns the stack pointer the epilogue should restore from — the same
/// split as `pendsv_entry` in the teacher and `getContextoSiguiente` in the
/// original C source.
#[no_mangle]
extern "C" fn corekernel_pendsv_entry(current_sp: u32) -> u32 {
    kernel().compute_next_sp(current_sp as usize) as u32
}

#[no_mangle]
extern "C" fn corekernel_systick_entry() {
    kernel().on_tick();
}

/// Generic interrupt entry point for external IRQ lines. Not itself wired
/// into any vector table (board bring-up is out of scope here, spec §1);
/// a board's own vector table is expected to route its IRQn entries here,
/// the same way `sys/kern/src/arch/arm_m.rs::DefaultHandler` reads `IPSR`
/// to recover which exception fired rather than having one hand-written
/// handler per line.
#[no_mangle]
extern "C" fn corekernel_irq_entry() {
    // SAFETY: read-only status read of `ICSR`; sound from any context.
    let exception_number = unsafe { cortex_m::peripheral::SCB::steal() }.vect_active() as usize;
    // Exceptions 0-15 are the fixed Cortex-M set (Reset, NMI, HardFault,
    // ..., SysTick); external interrupts start at 16.
    if let Some(line) = exception_number.checked_sub(16) {
        crate::irq::dispatch(line);
    }
}

// PendSV handler: stack the callee-saved registers the hardware didn't
// stack automatically, call into Rust with the outgoing PSP, then restore
// from whatever PSP came back (which may belong to a different task) and
// return from the exception. Mirrors the `global_asm!` blocks in
// `sys/kern/src/arch/arm_m.rs`; ARMv6-M lacks `stmdb`/`ldmia` with the
// high-register-only operand form `{r4-r11}` that ARMv7-M/ARMv8-M have, so
// it pushes/pops the high registers via `r0` one at a time instead.
cfg_if::cfg_if! {
    if #[cfg(feature = "armv6m")] {
        core::arch::global_asm!(
            ".thumb_func",
            ".global PendSV",
            "PendSV:",
            "mrs r0, psp",
            "subs r0, r0, #40",
            "mov r1, r0",
            "stmia r1!, {{r4-r7}}",
            "mov r4, r8",
            "mov r5, r9",
            "mov r6, r10",
            "mov r7, r11",
            "stmia r1!, {{r4-r7}}",
            "push {{lr}}",
            "bl corekernel_pendsv_entry",
            "pop {{r1}}",
            "mov lr, r1",
            "mov r1, r0",
            "adds r1, r1, #16",
            "ldmia r1!, {{r4-r7}}",
            "mov r8, r4",
            "mov r9, r5",
            "mov r10, r6",
            "mov r11, r7",
            "ldmia r0!, {{r4-r7}}",
            "msr psp, r1",
            "bx lr",
        );
    } else {
        core::arch::global_asm!(
            ".thumb_func",
            ".global PendSV",
            "PendSV:",
            "mrs r0, psp",
            "stmdb r0!, {{r4-r11}}",
            "bl corekernel_pendsv_entry",
            "ldmia r0!, {{r4-r11}}",
            "msr psp, r0",
            "bx lr",
        );
    }
}

core::arch::global_asm!(
    ".thumb_func",
    ".global SysTick",
    "SysTick:",
    "push {{lr}}",
    "bl corekernel_systick_entry",
    "pop {{r0}}",
    "mov lr, r0",
    "bx lr",
);
