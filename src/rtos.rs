//! # Firmware Binding
//!
//! Binds one [`Kernel<CortexM4>`] for the exception handlers and for task
//! code, which has no other way to reach it. `main` builds the kernel,
//! [`install`]s it, creates the tasks and calls [`start`].
//!
//! ```text
//! SysTick ──► Kernel::tick()            ──► PendSV pended on wakeup
//! PendSV  ──► switch_context(psp)       ──► Kernel::switch_context()
//! task    ──► rtos::delay() etc.        ──► Kernel::delay() etc.
//! ```
//!
//! Every kernel operation masks interrupts for its critical section, so a
//! handler never observes the kernel in the middle of an update.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::arch::cortex_m4::CortexM4;
use crate::arch;
use crate::error::KernelError;
use crate::hooks::StaticMemory;
use crate::kernel::Kernel;
use crate::stack::StackWord;
use crate::task::{Priority, TaskArg, TaskId, TaskParams};
use crate::time::TickType;

static KERNEL: AtomicPtr<Kernel<CortexM4>> = AtomicPtr::new(ptr::null_mut());

/// Make `kernel` the one the handlers and the free functions below use.
pub fn install(kernel: &'static mut Kernel<CortexM4>) {
    KERNEL.store(kernel, Ordering::Release);
}

/// The installed kernel. Halts if [`install`] was never called.
#[allow(clippy::mut_from_ref)]
fn kernel() -> &'static mut Kernel<CortexM4> {
    let kernel = KERNEL.load(Ordering::Acquire);
    if kernel.is_null() {
        log::error!("kernel used before install");
        arch::halt();
    }
    // SAFETY: set from a `&'static mut` in `install`. Single core; every
    // mutation happens inside a kernel critical section.
    unsafe { &mut *kernel }
}

pub fn create_task(params: TaskParams) -> Result<TaskId, KernelError> {
    kernel().create_task(params)
}

pub fn create_static_task(
    params: TaskParams,
    stack: &'static mut [StackWord],
) -> Result<TaskId, KernelError> {
    kernel().create_static_task(params, stack)
}

/// Start scheduling. Only returns, with the error, if the kernel could not
/// be started; the caller has nothing left to do but halt.
pub fn start(memory: &mut impl StaticMemory) -> KernelError {
    match kernel().start(memory) {
        Err(err) => err,
        // The first task never hands control back here
        Ok(()) => arch::halt(),
    }
}

pub fn delay(ticks: TickType) {
    kernel().delay(ticks);
}

pub fn delay_until(previous_wake: &mut TickType, increment: TickType) -> bool {
    kernel().delay_until(previous_wake, increment)
}

pub fn yield_now() {
    kernel().yield_now();
}

pub fn set_priority(task: Option<TaskId>, priority: Priority) -> Result<(), KernelError> {
    kernel().set_priority(task, priority)
}

pub fn priority(task: Option<TaskId>) -> Result<Priority, KernelError> {
    kernel().priority(task)
}

pub fn delete(task: Option<TaskId>) -> Result<(), KernelError> {
    kernel().delete(task)
}

/// Delete the calling task. The pended switch is taken as soon as the
/// critical section ends, so this never returns.
pub fn delete_self() -> ! {
    let kernel = kernel();
    if let Err(err) = kernel.delete(None) {
        log::error!("delete_self: {}", err);
    }
    kernel.task_returned(kernel.current_task())
}

pub fn suspend(task: Option<TaskId>) -> Result<(), KernelError> {
    kernel().suspend(task)
}

pub fn resume(task: TaskId) -> Result<(), KernelError> {
    kernel().resume(task)
}

pub fn tick_count() -> TickType {
    kernel().tick_count()
}

pub fn critical_section<R>(f: impl FnOnce() -> R) -> R {
    kernel().critical_section(f)
}

// ---------------------------------------------------------------------------
// Exception handlers and system task entry points
// ---------------------------------------------------------------------------

#[cortex_m_rt::exception]
fn SysTick() {
    kernel().tick();
}

/// Called from PendSV with the outgoing task's PSP (R4-R11 already pushed).
/// Returns the incoming task's PSP.
pub extern "C" fn switch_context(sp: *mut StackWord) -> *mut StackWord {
    kernel().switch_context(sp)
}

/// Return address of every task frame.
pub extern "C" fn task_exit() -> ! {
    let kernel = kernel();
    kernel.task_returned(kernel.current_task())
}

pub extern "C" fn idle_task(_: TaskArg) -> ! {
    loop {
        kernel().idle_step();
        cortex_m::asm::wfi();
    }
}

pub extern "C" fn timer_task(_: TaskArg) -> ! {
    loop {
        kernel().run_timer_service();
    }
}
