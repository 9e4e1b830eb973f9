//! # Synchronization Primitives
//!
//! Nestable critical sections. Interrupts are masked through the port on the
//! outermost entry and unmasked on the matching outermost exit.
//!
//! The kernel only ever enters through [`CriticalSection`], a guard whose
//! `Drop` performs the exit, so every early return and every `?` releases
//! it. The manual `enter`/`exit` pair is kept for applications that need a
//! region spanning several kernel calls.

use core::cell::Cell;

use crate::arch::Port;
use crate::error::{ensure, Fault};

/// Critical-section nesting depth.
pub struct CriticalNesting {
    depth: Cell<u32>,
}

impl CriticalNesting {
    pub const fn new() -> Self {
        Self { depth: Cell::new(0) }
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// Mask interrupts and increase the nesting depth.
    pub fn enter<P: Port>(&self, port: &P) {
        port.disable_interrupts();
        self.depth.set(self.depth.get() + 1);
    }

    /// Decrease the nesting depth; unmask interrupts when it reaches zero.
    /// Exiting more often than entering is an invariant violation.
    pub fn exit<P: Port>(&self, port: &P) -> Result<(), Fault> {
        let depth = self.depth.get();
        ensure!(depth > 0);
        self.depth.set(depth - 1);
        if depth == 1 {
            port.enable_interrupts();
        }
        Ok(())
    }
}

impl Default for CriticalNesting {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped critical section. Interrupts stay masked while the guard lives.
///
/// ```ignore
/// let _cs = CriticalSection::enter(&self.nesting, &self.port);
/// self.scheduler.delay_current(ticks)
/// ```
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalSection<'a, P: Port> {
    nesting: &'a CriticalNesting,
    port: &'a P,
}

impl<'a, P: Port> CriticalSection<'a, P> {
    #[inline]
    pub fn enter(nesting: &'a CriticalNesting, port: &'a P) -> Self {
        nesting.enter(port);
        Self { nesting, port }
    }
}

impl<P: Port> Drop for CriticalSection<'_, P> {
    fn drop(&mut self) {
        // The guard's own entry keeps the depth above zero.
        let _ = self.nesting.exit(self.port);
    }
}

/// Run `f` inside a critical section.
#[inline]
pub fn critical_section<P: Port, R>(
    nesting: &CriticalNesting,
    port: &P,
    f: impl FnOnce() -> R,
) -> R {
    let _cs = CriticalSection::enter(nesting, port);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimPort;

    #[test]
    fn test_nesting_unmasks_on_outermost_exit() {
        let port = SimPort::new();
        let nesting = CriticalNesting::new();

        nesting.enter(&port);
        nesting.enter(&port);
        assert!(port.interrupts_masked());
        assert_eq!(nesting.depth(), 2);

        assert_eq!(nesting.exit(&port), Ok(()));
        assert!(port.interrupts_masked());
        assert_eq!(nesting.exit(&port), Ok(()));
        assert!(!port.interrupts_masked());
    }

    #[test]
    fn test_unbalanced_exit_is_a_fault() {
        let port = SimPort::new();
        let nesting = CriticalNesting::new();
        assert!(matches!(nesting.exit(&port), Err(Fault::Assertion { .. })));
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn bail(nesting: &CriticalNesting, port: &SimPort, fail: bool) -> Result<u32, ()> {
            let _cs = CriticalSection::enter(nesting, port);
            if fail {
                return Err(());
            }
            Ok(nesting.depth())
        }

        let port = SimPort::new();
        let nesting = CriticalNesting::new();
        assert_eq!(bail(&nesting, &port, false), Ok(1));
        assert_eq!(bail(&nesting, &port, true), Err(()));
        assert_eq!(nesting.depth(), 0);
        assert!(!port.interrupts_masked());

        let value = critical_section(&nesting, &port, || {
            assert!(port.interrupts_masked());
            42
        });
        assert_eq!(value, 42);
        assert!(!port.interrupts_masked());
    }
}
