//! # PriOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time. The only dynamic memory is the
//! block pool handed to the kernel for task stacks.

use crate::time::TickType;

/// Maximum number of tasks the system can manage simultaneously, including
/// the idle and timer tasks. This bounds the static TCB arena.
pub const MAX_TASKS: usize = 8;

/// Number of priority levels. Valid priorities are `0..MAX_PRIORITIES`;
/// higher numbers are more urgent. Must not exceed 32 (ready bitmap width).
pub const MAX_PRIORITIES: usize = 8;

/// Priority of the idle task. Always the lowest level.
pub const IDLE_PRIORITY: u8 = 0;

/// Priority of the timer (daemon) task.
pub const TIMER_TASK_PRIORITY: u8 = (MAX_PRIORITIES - 1) as u8;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (MPS2 AN385 FPGA image runs at 25 MHz).
pub const SYSTEM_CLOCK_HZ: u32 = 25_000_000;

/// When false, a newly ready higher-priority task only runs at the next
/// voluntary reschedule point.
pub const USE_PREEMPTION: bool = true;

/// Round-robin between equal-priority ready tasks on tick boundaries.
pub const USE_TIME_SLICING: bool = true;

/// Length of one round-robin quantum in ticks.
pub const TIME_SLICE_TICKS: TickType = 1;

/// The idle task gives way to other priority-0 tasks on every pass.
pub const IDLE_SHOULD_YIELD: bool = true;

/// Stack depth, in words, of the idle task and the demo tasks' unit.
pub const MINIMAL_STACK_WORDS: usize = 128;

/// Stack depth, in words, of the timer task.
pub const TIMER_TASK_STACK_WORDS: usize = 256;

/// Smallest stack accepted for any task: a full initial frame
/// (16 registers), the guard band, and some headroom.
pub const MIN_STACK_WORDS: usize = 16 + STACK_GUARD_WORDS + 12;

/// Pattern painted into every stack at creation. Used for high-water-mark
/// measurement and overflow detection.
pub const STACK_FILL_WORD: u32 = 0xA5A5_A5A5;

/// Number of words at the low end of each stack that must keep the fill
/// pattern. A modified guard word at switch-out is reported as overflow.
pub const STACK_GUARD_WORDS: usize = 4;

/// Size of one stack-pool block in words.
pub const POOL_BLOCK_WORDS: usize = 64;

/// Maximum number of blocks the stack pool can manage (bitmap width).
pub const MAX_POOL_BLOCKS: usize = 64;

/// Maximum number of software timers.
pub const MAX_TIMERS: usize = 8;

const _: () = assert!(MAX_PRIORITIES <= 32 && MAX_PRIORITIES > 1);
const _: () = assert!(MAX_TASKS <= u16::MAX as usize);
const _: () = assert!(MAX_POOL_BLOCKS <= 64);
