//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and interrupt management.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority (0xFF), so a context
//! switch never preempts an application interrupt handler.
//!
//! Built for `thumbv7em-none-eabi` (soft float): no FPU context is saved.

use core::arch::{asm, naked_asm};
use core::cell::Cell;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use super::Port;
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::rtos;
use crate::stack::{push_initial_frame, StackRegion, StackWord};
use crate::task::{TaskArg, TaskEntry, TaskKind};

/// The hardware port. Owns SysTick until the scheduler starts it.
pub struct CortexM4 {
    syst: Cell<Option<SYST>>,
}

impl CortexM4 {
    /// Program SysTick for `TICK_HZ` from the core clock. The counter is
    /// enabled when the first task starts.
    pub fn new(mut syst: SYST) -> Self {
        syst.disable_counter();
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(SYSTEM_CLOCK_HZ / TICK_HZ - 1);
        syst.clear_current();
        Self {
            syst: Cell::new(Some(syst)),
        }
    }
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
fn set_interrupt_priorities() {
    // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
    // Bits [23:16] = PendSV priority
    // Bits [31:24] = SysTick priority
    const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;
    // SAFETY: SHPR3 is always mapped on ARMv7-M.
    unsafe {
        let val = core::ptr::read_volatile(SHPR3);
        core::ptr::write_volatile(SHPR3, val | (0xFF << 16) | (0xFF << 24));
    }
}

impl Port for CortexM4 {
    #[inline]
    fn disable_interrupts(&self) {
        cortex_m::interrupt::disable();
    }

    #[inline]
    fn enable_interrupts(&self) {
        // SAFETY: only called when the outermost critical section ends.
        unsafe { cortex_m::interrupt::enable() };
    }

    #[inline]
    fn request_context_switch(&self) {
        SCB::set_pendsv();
    }

    unsafe fn init_stack(
        &self,
        region: &StackRegion,
        entry: TaskEntry,
        argument: TaskArg,
    ) -> *mut StackWord {
        let exit: extern "C" fn() -> ! = rtos::task_exit;
        // SAFETY: forwarded to the caller.
        unsafe {
            push_initial_frame(
                region,
                entry as usize as StackWord,
                argument as usize as StackWord,
                exit as usize as StackWord,
            )
        }
    }

    unsafe fn start_first_task(&self, sp: *mut StackWord) {
        set_interrupt_priorities();
        if let Some(mut syst) = self.syst.take() {
            syst.clear_current();
            syst.enable_interrupt();
            syst.enable_counter();
        }
        // SAFETY: forwarded to the caller.
        unsafe { start_first_task(sp) }
    }

    fn system_entry(&self, kind: TaskKind) -> TaskEntry {
        match kind {
            TaskKind::TimerService => rtos::timer_task,
            _ => rtos::idle_task,
        }
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching to PSP and branching to Thread mode.
///
/// Unwinds the initial frame built by `push_initial_frame` by hand, since we
/// are not really returning from an exception.
///
/// # Safety
/// Must only be called once, with a valid stack pointer.
unsafe fn start_first_task(psp: *mut StackWord) -> ! {
    // SAFETY: forwarded to the caller.
    unsafe {
        asm!(
            // Set PSP to the task's stack pointer (skip SW-saved R4-R11)
            "adds r0, #32",
            "msr psp, r0",

            // Switch to PSP for Thread mode (set CONTROL.SPSEL = 1)
            "movs r0, #2",
            "msr control, r0",
            "isb",

            // Pop the hardware frame
            "pop {{r0-r3, r12}}",  // R0 = task argument
            "pop {{r4, r5, r6}}",  // LR, PC, xPSR
            "mov lr, r4",          // Return lands in the task_exit trampoline

            // Branch to the task
            "cpsie i",
            "bx r5",

            in("r0") psp,
            options(noreturn)
        )
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler. Performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4–R11 onto the current task's stack (PSP)
/// 2. Hand the updated PSP to the kernel, which records it, checks the
///    outgoing stack and selects the next task
/// 3. Restore R4–R11 from the new task's stack
/// 4. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
///
/// # Safety
/// Called directly by the NVIC. Must follow the exact Cortex-M4 exception
/// entry/exit convention.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        // r0 = next task's PSP
        "bl {switch}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        // Return to Thread mode using PSP
        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        switch = sym rtos::switch_context,
    );
}
