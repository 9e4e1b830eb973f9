//! # Simulation Port
//!
//! A hosted [`Port`] with no real interrupts or registers. It records the
//! interrupt mask and pended switches so the simulator (and tests) can act
//! on them, and keeps a stand-in process stack pointer that the simulator
//! feeds to `Kernel::switch_context` the way PendSV would.

use core::cell::Cell;

use super::Port;
use crate::arch;
use crate::stack::{push_initial_frame, StackRegion, StackWord};
use crate::task::{TaskArg, TaskEntry, TaskKind};

pub struct SimPort {
    masked: Cell<bool>,
    mask_count: Cell<u32>,
    switch_pending: Cell<bool>,
    started: Cell<bool>,
    psp: Cell<*mut StackWord>,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            masked: Cell::new(false),
            mask_count: Cell::new(0),
            switch_pending: Cell::new(false),
            started: Cell::new(false),
            psp: Cell::new(core::ptr::null_mut()),
        }
    }

    #[inline]
    pub fn interrupts_masked(&self) -> bool {
        self.masked.get()
    }

    /// How many times interrupts have been masked so far.
    #[inline]
    pub fn mask_count(&self) -> u32 {
        self.mask_count.get()
    }

    #[inline]
    pub fn switch_pending(&self) -> bool {
        self.switch_pending.get()
    }

    /// Consume a pended switch, as taking PendSV would.
    pub fn take_switch_request(&self) -> bool {
        self.switch_pending.replace(false)
    }

    #[inline]
    pub fn started(&self) -> bool {
        self.started.get()
    }

    /// Stack pointer of the task that is "executing".
    #[inline]
    pub fn psp(&self) -> *mut StackWord {
        self.psp.get()
    }

    pub fn set_psp(&self, sp: *mut StackWord) {
        self.psp.set(sp);
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated tasks are driven by the simulator, never by jumping to an
/// entry point. Reaching this is a bug in the embedding.
pub extern "C" fn unreachable_entry(_: TaskArg) -> ! {
    log::error!("simulated task entry point called");
    arch::halt()
}

impl Port for SimPort {
    fn disable_interrupts(&self) {
        self.masked.set(true);
        self.mask_count.set(self.mask_count.get() + 1);
    }

    fn enable_interrupts(&self) {
        self.masked.set(false);
    }

    fn request_context_switch(&self) {
        self.switch_pending.set(true);
    }

    unsafe fn init_stack(
        &self,
        region: &StackRegion,
        entry: TaskEntry,
        argument: TaskArg,
    ) -> *mut StackWord {
        // Host addresses are wider than a word; the frame only needs to have
        // the right shape.
        let exit: TaskEntry = unreachable_entry;
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
        self.psp.set(sp);
        self.started.set(true);
    }

    fn system_entry(&self, _kind: TaskKind) -> TaskEntry {
        unreachable_entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_request_is_consumed_once() {
        let port = SimPort::new();
        assert!(!port.take_switch_request());
        port.request_context_switch();
        port.request_context_switch();
        assert!(port.switch_pending());
        assert!(port.take_switch_request());
        assert!(!port.take_switch_request());
    }

    #[test]
    fn test_init_stack_builds_full_frame() {
        let port = SimPort::new();
        let mut region = StackRegion::from_static(Box::leak(vec![0; 64].into_boxed_slice()));
        region.paint();
        let sp = unsafe { port.init_stack(&region, unreachable_entry, core::ptr::null_mut()) };
        assert_eq!(region.top() as usize - sp as usize, 16 * 4);
        assert!(!region.overflowed(sp));

        unsafe { port.start_first_task(sp) };
        assert!(port.started());
        assert_eq!(port.psp(), sp);
    }
}
