//! # PriOS: Priority Operating System
//!
//! A fixed-priority preemptive real-time kernel for ARM Cortex-M4
//! microcontrollers, in the FreeRTOS mould.
//!
//! ## Overview
//!
//! At every tick and at every blocking or unblocking event the kernel
//! decides which task runs on the single CPU:
//!
//! - **The highest-priority Ready task always runs.** Higher numbers are
//!   more urgent; priority 0 belongs to the idle task.
//! - **Equal priorities round-robin** on tick boundaries and on yield.
//! - **Delays are measured in ticks** and stay correct across wraparound of
//!   the 32-bit tick counter.
//! - **Failures are routed to hooks** supplied at construction, defaulting
//!   to log-and-halt.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │        rtos.rs (firmware)   ·   sim.rs (host)          │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │  create_task · start · delay · set_priority · delete   │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │  Timers · Pool     │  Sync · Hooks     │
//! │  scheduler.rs│  timers.rs pool.rs │  sync.rs hooks.rs │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │        Task Model (task.rs · list.rs · stack.rs)       │
//! ├────────────────────────────────────────────────────────┤
//! │   Port (arch/cortex_m4.rs  ·  arch/sim.rs)             │
//! │    PendSV · SysTick · Context Switch · Stack Init      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: TCBs live in a fixed arena of `MAX_TASKS` slots
//! - **Stack pool**: task stacks come from one caller-supplied block pool,
//!   or from `'static` buffers for statically created tasks
//! - **Handles, not pointers**: tasks are named by generation-checked
//!   [`task::TaskId`]s; list links are arena indices
//! - **Critical sections**: nested interrupt masking through the port
//!
//! On bare-metal targets the crate is `no_std`. Hosted builds link `std`
//! and add the [`sim`] module, which drives the same kernel on a simulated
//! port so the scheduler can be tested on the development machine.

#![cfg_attr(target_os = "none", no_std)]

pub mod config;
pub mod time;
pub mod error;
pub mod list;
pub mod stack;
pub mod pool;
pub mod task;
pub mod hooks;
pub mod sync;
pub mod arch;
pub mod scheduler;
pub mod timers;
pub mod console;
pub mod kernel;
pub mod demo;

#[cfg(not(target_os = "none"))]
pub mod sim;

#[cfg(target_os = "none")]
pub mod rtos;

pub use error::{Fault, KernelError};
pub use hooks::{Hooks, StaticMemory};
pub use kernel::Kernel;
pub use task::{Priority, TaskId, TaskParams, TaskState};
pub use time::{TickType, MAX_DELAY};
