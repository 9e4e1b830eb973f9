//! # Application Hooks
//!
//! Callbacks the kernel invokes at well-defined points, and the provider
//! trait through which it obtains memory for its own tasks.
//!
//! Fault hooks are always called synchronously and outside the kernel's
//! critical section. The defaults log and halt with interrupts disabled.

use crate::arch;
use crate::stack::StackWord;
use crate::task::TaskId;
use crate::time::TickType;

/// Hook table handed to the kernel at construction.
#[derive(Clone, Copy)]
pub struct Hooks {
    /// The stack pool could not satisfy a request of this many words. If it
    /// returns, `create_task` fails with `ResourceExhausted`.
    pub allocation_failed: fn(usize),
    /// A task's stack was found past its bound at a context switch.
    pub stack_overflow: fn(TaskId, &'static str) -> !,
    /// An internal invariant check failed at `file:line`.
    pub assertion_failed: fn(&'static str, u32) -> !,
    /// Every tick, before the counter advances. Interrupt context: must not
    /// block.
    pub tick: fn(TickType),
    /// Every idle-task pass. Must not block.
    pub idle: fn(),
    /// Once, when the timer task first runs.
    pub daemon_startup: fn(),
}

impl Hooks {
    pub const fn new() -> Self {
        Self {
            allocation_failed: halt_on_allocation_failure,
            stack_overflow: halt_on_stack_overflow,
            assertion_failed: halt_on_assertion,
            tick: ignore_tick,
            idle: ignore,
            daemon_startup: ignore,
        }
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}

fn halt_on_allocation_failure(words: usize) {
    log::error!("stack pool exhausted ({} words requested), halting", words);
    arch::halt()
}

fn halt_on_stack_overflow(task: TaskId, name: &'static str) -> ! {
    log::error!("stack overflow in {} ({}), halting", name, task);
    arch::halt()
}

fn halt_on_assertion(file: &'static str, line: u32) -> ! {
    log::error!("assertion failed at {}:{}, halting", file, line);
    arch::halt()
}

fn ignore_tick(_: TickType) {}

fn ignore() {}

/// Supplies the stacks for the idle and timer tasks at start.
///
/// `None` means the application has no buffer to give, which is a fatal
/// configuration error.
pub trait StaticMemory {
    fn idle_task_stack(&mut self) -> Option<&'static mut [StackWord]>;
    fn timer_task_stack(&mut self) -> Option<&'static mut [StackWord]>;
}
