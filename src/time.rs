//! # Time Base
//!
//! Tick type and conversions. The tick counter itself lives in the
//! scheduler and is only advanced from the tick interrupt.

use crate::config::TICK_HZ;

/// Scheduler time, in ticks. Wraps around at `u32::MAX`.
pub type TickType = u32;

/// Passing this to `delay` blocks until the task is resumed, woken or
/// deleted.
pub const MAX_DELAY: TickType = TickType::MAX;

/// Convert a duration in milliseconds to ticks at `TICK_HZ`.
///
/// Rounds down and saturates just below `MAX_DELAY`, so a very long finite
/// delay never turns into an indefinite one.
pub const fn ms_to_ticks(ms: u32) -> TickType {
    let ticks = (ms as u64 * TICK_HZ as u64) / 1000;
    if ticks >= MAX_DELAY as u64 {
        MAX_DELAY - 1
    } else {
        ticks as TickType
    }
}

/// Ticks remaining from `now` until `deadline`, assuming the deadline is
/// less than half the counter range ahead.
#[inline]
pub const fn ticks_until(now: TickType, deadline: TickType) -> TickType {
    deadline.wrapping_sub(now)
}

/// Whether `deadline` has been reached at `now`, with wraparound.
#[inline]
pub const fn has_elapsed(now: TickType, start: TickType, period: TickType) -> bool {
    now.wrapping_sub(start) >= period
}
