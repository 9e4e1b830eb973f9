//! # Architecture Abstraction Layer
//!
//! The [`Port`] trait is the boundary between the portable scheduler core
//! and the processor: interrupt masking, pending a context switch, building
//! a task's first frame and launching the first task.
//!
//! - `cortex_m4`: the hardware port (PendSV / SysTick), bare-metal only.
//! - `sim`: a hosted port used by the simulator and the test suite.
//! - `cmsdk_uart`: console driver for the MPS2 board's UART0.

use crate::stack::{StackRegion, StackWord};
use crate::task::{TaskArg, TaskEntry, TaskKind};

pub mod cmsdk_uart;

#[cfg(target_os = "none")]
pub mod cortex_m4;

#[cfg(not(target_os = "none"))]
pub mod sim;

/// Platform services the kernel needs.
pub trait Port {
    /// Mask interrupts that may call into the kernel.
    fn disable_interrupts(&self);

    /// Undo [`Port::disable_interrupts`].
    fn enable_interrupts(&self);

    /// Pend a context switch. It is taken as soon as interrupts are
    /// unmasked and no other handler is active.
    fn request_context_switch(&self);

    /// Build the initial context frame for a task in `region` and return
    /// the stack pointer to save in its TCB.
    ///
    /// # Safety
    ///
    /// `region` must be exclusively owned by the new task and at least
    /// `MIN_STACK_WORDS` long.
    unsafe fn init_stack(
        &self,
        region: &StackRegion,
        entry: TaskEntry,
        argument: TaskArg,
    ) -> *mut StackWord;

    /// Enter the first task, whose saved stack pointer is `sp`. Hardware
    /// ports never return from this.
    ///
    /// # Safety
    ///
    /// `sp` must come from [`Port::init_stack`] and the kernel must be fully
    /// set up for exception handlers to use.
    unsafe fn start_first_task(&self, sp: *mut StackWord);

    /// Entry point for one of the system tasks.
    fn system_entry(&self, kind: TaskKind) -> TaskEntry;
}

/// Stop the system: interrupts off, spin forever.
#[cfg(target_os = "none")]
pub fn halt() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::nop();
    }
}

/// Stop the process. Hosted stand-in for the firmware halt.
#[cfg(not(target_os = "none"))]
pub fn halt() -> ! {
    std::process::abort()
}
