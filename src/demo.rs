//! # Priority Demo
//!
//! The three-task workload shipped with the firmware: each task prints its
//! current priority, sleeps, then moves itself to a new priority. After its
//! last iteration it deletes itself.
//!
//! | Task | Start | Iterations | Delay | Priorities reported |
//! |------|-------|------------|-------|---------------------|
//! | Task 1 | 1 | 5 | 2000 ms | 1, 2, 3, 4, 5 |
//! | Task 2 | 2 | 5 | 2000 ms | 2, 6, 5, 4, 3 |
//! | Task 3 | 3 | 3 | 1000 ms | 3, 7, 6 |
//!
//! The firmware and the host simulator both run this table, so the report
//! sequence can be checked off-target.

use crate::config::MAX_PRIORITIES;
use crate::task::Priority;

/// Description of one demo task.
#[derive(Debug, Clone, Copy)]
pub struct DemoTask {
    pub name: &'static str,
    /// Printed on every iteration, followed by the current priority.
    pub message: &'static str,
    pub priority: Priority,
    pub iterations: u32,
    pub delay_ms: u32,
    /// Priority set after iteration `i` is `priority_base + i * priority_step`.
    pub priority_base: Priority,
    pub priority_step: i8,
}

impl DemoTask {
    /// Priority the task gives itself after iteration `i` (zero-based).
    pub const fn priority_after(&self, i: u32) -> Priority {
        let p = self.priority_base as i32 + i as i32 * self.priority_step as i32;
        if p < 0 {
            0
        } else if p >= MAX_PRIORITIES as i32 {
            (MAX_PRIORITIES - 1) as Priority
        } else {
            p as Priority
        }
    }
}

pub static DEMO_TASKS: [DemoTask; 3] = [
    DemoTask {
        name: "Task 1",
        message: "Task 1 is running",
        priority: 1,
        iterations: 5,
        delay_ms: 2000,
        priority_base: 2,
        priority_step: 1,
    },
    DemoTask {
        name: "Task 2",
        message: "Task 2 is running",
        priority: 2,
        iterations: 5,
        delay_ms: 2000,
        priority_base: 6,
        priority_step: -1,
    },
    DemoTask {
        name: "Task 3",
        message: "Task 3 is running",
        priority: 3,
        iterations: 3,
        delay_ms: 1000,
        priority_base: 7,
        priority_step: -1,
    },
];
