//! # Kernel Errors
//!
//! Two classes of failure:
//!
//! - [`KernelError`]: recoverable, returned to the immediate caller as a
//!   `Result` (creation-time resource shortages, bad handles, start-up
//!   configuration problems).
//! - [`Fault`]: terminal. Detected deep inside the kernel and routed to the
//!   failure hooks instead of being propagated to task code, because the
//!   calling context may already be corrupt.

use core::fmt;

use crate::task::TaskId;

/// Recoverable kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No TCB slot, pool memory or timer slot was available.
    ResourceExhausted(Resource),
    /// Static memory provisioning for the system tasks failed at start.
    Configuration(ConfigError),
    /// The handle does not name a live task.
    InvalidTask,
    /// The operation is not permitted on the idle or timer task.
    SystemTask,
    /// Requested stack is smaller than `MIN_STACK_WORDS`.
    InvalidStackSize,
    /// The handle does not name a live software timer.
    InvalidTimer,
    /// Software timers need a non-zero period.
    InvalidTimerPeriod,
    /// The operation needs a running scheduler.
    NotStarted,
    /// `start` was called twice.
    AlreadyStarted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted(r) => write!(f, "resource exhausted: {r}"),
            Self::Configuration(e) => write!(f, "configuration error: {e}"),
            Self::InvalidTask => f.write_str("invalid task handle"),
            Self::SystemTask => f.write_str("operation not permitted on a system task"),
            Self::InvalidStackSize => f.write_str("stack size below minimum"),
            Self::InvalidTimer => f.write_str("invalid timer handle"),
            Self::InvalidTimerPeriod => f.write_str("timer period must be non-zero"),
            Self::NotStarted => f.write_str("scheduler not started"),
            Self::AlreadyStarted => f.write_str("scheduler already started"),
        }
    }
}

impl From<ConfigError> for KernelError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err)
    }
}

/// The resource that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Every TCB arena slot is in use.
    TaskSlots,
    /// The stack pool has no contiguous run large enough.
    StackPool,
    /// Every software timer slot is in use.
    TimerSlots,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskSlots => f.write_str("task slots"),
            Self::StackPool => f.write_str("stack pool"),
            Self::TimerSlots => f.write_str("timer slots"),
        }
    }
}

/// Start-up configuration errors. Not recoverable: the scheduler never
/// begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The provider returned no idle-task stack.
    MissingIdleStack,
    /// The provider returned no timer-task stack.
    MissingTimerStack,
    /// A provided system stack is smaller than `MIN_STACK_WORDS`.
    SystemStackTooSmall,
    /// No arena slot left for a system task.
    NoSlotForSystemTask,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIdleStack => f.write_str("idle task stack not provided"),
            Self::MissingTimerStack => f.write_str("timer task stack not provided"),
            Self::SystemStackTooSmall => f.write_str("system task stack too small"),
            Self::NoSlotForSystemTask => f.write_str("no task slot left for system task"),
        }
    }
}

/// Terminal failure, handed to the hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A task's saved stack pointer or guard band was found past its
    /// allocated bound at a context switch.
    StackOverflow {
        /// The offending task.
        task: TaskId,
        /// Its debug name.
        name: &'static str,
    },
    /// An internal invariant check failed.
    Assertion {
        /// Source file of the check.
        file: &'static str,
        /// Source line of the check.
        line: u32,
    },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow { task, name } => write!(f, "stack overflow in {name} ({task})"),
            Self::Assertion { file, line } => write!(f, "assertion failed at {file}:{line}"),
        }
    }
}

/// Return `Err(Fault::Assertion)` tagged with the current source location
/// unless the condition holds.
macro_rules! ensure {
    ($cond:expr) => {
        if !$cond {
            return Err($crate::error::Fault::Assertion {
                file: file!(),
                line: line!(),
            });
        }
    };
}

pub(crate) use ensure;

#[cfg(test)]
mod tests {
    use super::*;

    fn check(v: u32) -> Result<u32, Fault> {
        ensure!(v < 10);
        Ok(v)
    }

    #[test]
    fn test_ensure_reports_location() {
        assert_eq!(check(3), Ok(3));
        match check(30) {
            Err(Fault::Assertion { file, line }) => {
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let e = KernelError::ResourceExhausted(Resource::StackPool);
        assert_eq!(format!("{e}"), "resource exhausted: stack pool");
        let e: KernelError = ConfigError::MissingIdleStack.into();
        assert_eq!(format!("{e}"), "configuration error: idle task stack not provided");
    }
}
