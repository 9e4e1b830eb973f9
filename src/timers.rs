//! # Software Timers
//!
//! Bookkeeping for the timer (daemon) task. Timers live in fixed slots and
//! are referenced by generation-checked [`TimerId`]s. The service itself
//! never blocks or calls callbacks; the kernel's timer task asks it which
//! timers expired, runs their callbacks outside the critical section, and
//! sleeps until [`TimerService::next_expiry`].
//!
//! All arithmetic is relative (`now - started >= period`), so expiry is
//! correct across tick-counter wraparound.

use core::fmt;

use heapless::Vec;

use crate::config::MAX_TIMERS;
use crate::error::{KernelError, Resource};
use crate::time::{has_elapsed, ticks_until, TickType};

/// Called in the timer task when a timer expires.
pub type TimerCallback = fn(TimerId);

/// Opaque software-timer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    slot: u8,
    generation: u32,
}

impl TimerId {
    #[inline]
    pub const fn slot(&self) -> usize {
        self.slot as usize
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TMR{:02}", self.slot)
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    name: &'static str,
    period: TickType,
    auto_reload: bool,
    callback: TimerCallback,
    active: bool,
    /// Tick the current period started at.
    started: TickType,
}

/// Expired timers collected in one pass.
pub type Expired = Vec<(TimerId, TimerCallback), MAX_TIMERS>;

pub struct TimerService {
    slots: [Option<Timer>; MAX_TIMERS],
    generations: [u32; MAX_TIMERS],
}

impl TimerService {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_TIMERS],
            generations: [0; MAX_TIMERS],
        }
    }

    fn id(&self, slot: usize) -> TimerId {
        TimerId {
            slot: slot as u8,
            generation: self.generations[slot],
        }
    }

    fn get(&self, id: TimerId) -> Result<&Timer, KernelError> {
        let slot = id.slot();
        if self.generations.get(slot) != Some(&id.generation) {
            return Err(KernelError::InvalidTimer);
        }
        self.slots[slot].as_ref().ok_or(KernelError::InvalidTimer)
    }

    fn get_mut(&mut self, id: TimerId) -> Result<&mut Timer, KernelError> {
        let slot = id.slot();
        if self.generations.get(slot) != Some(&id.generation) {
            return Err(KernelError::InvalidTimer);
        }
        self.slots[slot].as_mut().ok_or(KernelError::InvalidTimer)
    }

    /// Create a dormant timer.
    pub fn create(
        &mut self,
        name: &'static str,
        period: TickType,
        auto_reload: bool,
        callback: TimerCallback,
    ) -> Result<TimerId, KernelError> {
        if period == 0 {
            return Err(KernelError::InvalidTimerPeriod);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ResourceExhausted(Resource::TimerSlots))?;
        self.slots[slot] = Some(Timer {
            name,
            period,
            auto_reload,
            callback,
            active: false,
            started: 0,
        });
        Ok(self.id(slot))
    }

    /// Start, or restart, a timer's period at `now`.
    pub fn start(&mut self, id: TimerId, now: TickType) -> Result<(), KernelError> {
        let timer = self.get_mut(id)?;
        timer.active = true;
        timer.started = now;
        Ok(())
    }

    pub fn stop(&mut self, id: TimerId) -> Result<(), KernelError> {
        self.get_mut(id)?.active = false;
        Ok(())
    }

    /// Set a new period and (re)start the timer at `now`.
    pub fn change_period(
        &mut self,
        id: TimerId,
        period: TickType,
        now: TickType,
    ) -> Result<(), KernelError> {
        if period == 0 {
            return Err(KernelError::InvalidTimerPeriod);
        }
        let timer = self.get_mut(id)?;
        timer.period = period;
        timer.active = true;
        timer.started = now;
        Ok(())
    }

    pub fn delete(&mut self, id: TimerId) -> Result<(), KernelError> {
        self.get_mut(id)?;
        let slot = id.slot();
        self.slots[slot] = None;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        Ok(())
    }

    pub fn is_active(&self, id: TimerId) -> Result<bool, KernelError> {
        Ok(self.get(id)?.active)
    }

    pub fn name(&self, id: TimerId) -> Result<&'static str, KernelError> {
        Ok(self.get(id)?.name)
    }

    /// Collect every active timer whose period has elapsed at `now`.
    /// Auto-reload timers start their next period on the latest period
    /// boundary; one-shot timers go dormant.
    pub fn expire(&mut self, now: TickType) -> Expired {
        let mut expired = Expired::new();
        for slot in 0..MAX_TIMERS {
            let id = self.id(slot);
            let Some(timer) = self.slots[slot].as_mut() else {
                continue;
            };
            if !timer.active || !has_elapsed(now, timer.started, timer.period) {
                continue;
            }

            if timer.auto_reload {
                let elapsed = now.wrapping_sub(timer.started);
                timer.started = timer.started.wrapping_add(elapsed - elapsed % timer.period);
            } else {
                timer.active = false;
            }
            // At most one entry per slot, so this never overflows
            let _ = expired.push((id, timer.callback));
        }
        expired
    }

    /// Ticks from `now` until the earliest active timer expires, or `None`
    /// when no timer is running.
    pub fn next_expiry(&self, now: TickType) -> Option<TickType> {
        self.slots
            .iter()
            .flatten()
            .filter(|t| t.active)
            .map(|t| {
                let deadline = t.started.wrapping_add(t.period);
                if has_elapsed(now, t.started, t.period) {
                    0
                } else {
                    ticks_until(now, deadline)
                }
            })
            .min()
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: TimerId) {}

    #[test]
    fn test_one_shot_expires_once() {
        let mut timers = TimerService::new();
        let id = timers.create("once", 5, false, noop).unwrap();
        assert_eq!(timers.next_expiry(0), None);

        timers.start(id, 10).unwrap();
        assert_eq!(timers.next_expiry(12), Some(3));
        assert!(timers.expire(14).is_empty());

        let expired = timers.expire(15);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, id);
        assert!(!timers.is_active(id).unwrap());
        assert!(timers.expire(30).is_empty());
    }

    #[test]
    fn test_auto_reload_keeps_phase() {
        let mut timers = TimerService::new();
        let id = timers.create("tick", 4, true, noop).unwrap();
        timers.start(id, 0).unwrap();

        // Serviced late: next period still ends on a multiple of 4
        assert_eq!(timers.expire(9).len(), 1);
        assert_eq!(timers.next_expiry(9), Some(3));
        assert!(timers.is_active(id).unwrap());
    }

    #[test]
    fn test_expiry_across_wraparound() {
        let mut timers = TimerService::new();
        let id = timers.create("wrap", 10, false, noop).unwrap();
        timers.start(id, u32::MAX - 3).unwrap();
        assert_eq!(timers.next_expiry(u32::MAX), Some(7));
        assert!(timers.expire(5).is_empty());
        assert_eq!(timers.expire(6).len(), 1);
    }

    #[test]
    fn test_earliest_of_several() {
        let mut timers = TimerService::new();
        let a = timers.create("a", 50, true, noop).unwrap();
        let b = timers.create("b", 20, true, noop).unwrap();
        timers.start(a, 0).unwrap();
        timers.start(b, 0).unwrap();
        assert_eq!(timers.next_expiry(5), Some(15));
        timers.stop(b).unwrap();
        assert_eq!(timers.next_expiry(5), Some(45));
        timers.change_period(a, 8, 5).unwrap();
        assert_eq!(timers.next_expiry(5), Some(8));
    }

    #[test]
    fn test_handles_and_limits() {
        let mut timers = TimerService::new();
        assert_eq!(timers.create("zero", 0, false, noop), Err(KernelError::InvalidTimerPeriod));

        let ids: Vec<TimerId, MAX_TIMERS> = (0..MAX_TIMERS)
            .map(|_| timers.create("t", 1, false, noop).unwrap())
            .collect();
        assert_eq!(
            timers.create("extra", 1, false, noop),
            Err(KernelError::ResourceExhausted(Resource::TimerSlots))
        );

        let stale = ids[3];
        timers.delete(stale).unwrap();
        assert_eq!(timers.start(stale, 0), Err(KernelError::InvalidTimer));
        let fresh = timers.create("fresh", 1, false, noop).unwrap();
        assert_eq!(fresh.slot(), stale.slot());
        assert_ne!(fresh, stale);
        assert_eq!(timers.name(fresh), Ok("fresh"));
    }
}
