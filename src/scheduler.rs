//! # Scheduler
//!
//! Portable core of PriOS: the TCB arena, the per-priority ready lists, the
//! delayed lists and every state transition between them. Nothing in here
//! touches hardware; the kernel wraps each call in a critical section and
//! turns the returned "switch needed" flags into port requests.
//!
//! ## Scheduling Algorithm
//!
//! - **Selection**: the head of the highest non-empty ready list, found
//!   through a 32-bit ready-priority bitmap.
//! - **Running task**: removed from its ready list while it runs. When it is
//!   switched out still runnable it goes back to the head of its level if a
//!   higher-priority task preempted it with slice left, otherwise to the
//!   tail.
//! - **Time slicing**: every tick is charged to the running task, preempted
//!   or not. After `TIME_SLICE_TICKS` it yields to the next Ready task of
//!   the same priority.
//! - **Delays**: blocked tasks sit in a delayed list ordered by absolute wake
//!   tick. Wake ticks that wrap past `u32::MAX` go into a second (overflow)
//!   list; the two lists swap when the tick counter wraps to zero.
//!
//! Every operation returns `Ok(true)` when a context switch should be
//! pended, and `Err(Fault)` when an internal invariant does not hold.

use crate::config::{
    IDLE_PRIORITY, MAX_PRIORITIES, MAX_TASKS, TIME_SLICE_TICKS, USE_PREEMPTION, USE_TIME_SLICING,
};
use crate::error::{ensure, Fault};
use crate::list::{ListId, TaskList};
use crate::stack::{StackRegion, StackWord};
use crate::task::{Priority, TaskControlBlock, TaskId, TaskKind, TaskState};
use crate::time::{ticks_until, TickType, MAX_DELAY};

/// A task slot freed by [`Scheduler::reclaim_one`].
#[derive(Debug)]
pub struct Reclaimed {
    /// The handle the task had. No longer valid.
    pub task: TaskId,
    pub name: &'static str,
    /// Stack to hand back to its owner.
    pub stack: Option<StackRegion>,
}

const fn ready_lists() -> [TaskList; MAX_PRIORITIES] {
    let mut lists = [const { TaskList::new(ListId::Ready(0)) }; MAX_PRIORITIES];
    let mut priority = 0;
    while priority < MAX_PRIORITIES {
        lists[priority] = TaskList::new(ListId::Ready(priority as u8));
        priority += 1;
    }
    lists
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. One instance per kernel; nothing global.
pub struct Scheduler {
    /// Fixed-size TCB arena.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    ready: [TaskList; MAX_PRIORITIES],

    /// Bit `p` set iff `ready[p]` is non-empty.
    ready_priorities: u32,

    delayed: [TaskList; 2],

    /// Index into `delayed` of the list for the current counter epoch.
    active_delayed: usize,

    /// Blocked with no deadline.
    waiting: TaskList,

    suspended: TaskList,

    /// Deleted, awaiting the idle task.
    terminating: TaskList,

    current: Option<usize>,

    tick_count: TickType,

    /// Wake tick of the head of the active delayed list, `MAX_DELAY` when
    /// it is empty. May be stale-early, never stale-late.
    next_unblock: TickType,

    /// Ticks that arrived while the scheduler was locked.
    pended_ticks: TickType,

    lock_depth: u32,

    /// A switch was wanted while locked.
    yield_pending: bool,

    /// Outgoing task goes to the head of its ready list on the next switch,
    /// provided its slice is not spent.
    requeue_front: bool,

    running: bool,

    slice_remaining: TickType,

    /// Tasks created and not yet reclaimed.
    task_count: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: [const { TaskControlBlock::empty() }; MAX_TASKS],
            ready: ready_lists(),
            ready_priorities: 0,
            delayed: [TaskList::new(ListId::Delayed(0)), TaskList::new(ListId::Delayed(1))],
            active_delayed: 0,
            waiting: TaskList::new(ListId::Waiting),
            suspended: TaskList::new(ListId::Suspended),
            terminating: TaskList::new(ListId::Terminating),
            current: None,
            tick_count: 0,
            next_unblock: MAX_DELAY,
            pended_ticks: 0,
            lock_depth: 0,
            yield_pending: false,
            requeue_front: false,
            running: false,
            slice_remaining: TIME_SLICE_TICKS,
            task_count: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    #[inline]
    pub fn tick_count(&self) -> TickType {
        self.tick_count
    }

    /// Set the tick counter. Only meaningful before the scheduler starts.
    pub fn set_tick_count(&mut self, tick: TickType) {
        if !self.running {
            self.tick_count = tick;
        }
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    #[inline]
    pub fn next_unblock_tick(&self) -> TickType {
        self.next_unblock
    }

    #[inline]
    pub fn current_index(&self) -> Option<usize> {
        self.current.filter(|_| self.running)
    }

    pub fn current_id(&self) -> Option<TaskId> {
        self.current_index().map(|idx| self.id_of(idx))
    }

    #[inline]
    pub fn id_of(&self, idx: usize) -> TaskId {
        TaskId::new(idx, self.tasks[idx].generation)
    }

    /// Arena index of a live (not deleted) task.
    pub fn index_of(&self, id: TaskId) -> Option<usize> {
        let tcb = self.tasks.get(id.slot())?;
        (tcb.is_live() && tcb.generation == id.generation()).then_some(id.slot())
    }

    pub fn free_slots(&self) -> usize {
        self.tasks.iter().filter(|t| !t.in_use).count()
    }

    pub fn highest_ready_priority(&self) -> Option<Priority> {
        if self.ready_priorities == 0 {
            None
        } else {
            Some((31 - self.ready_priorities.leading_zeros()) as Priority)
        }
    }

    /// Number of Ready tasks waiting at `priority`.
    pub fn ready_len(&self, priority: Priority) -> usize {
        self.ready.get(priority as usize).map_or(0, TaskList::len)
    }

    /// Arena indices of the Ready tasks at `priority`, in the order they
    /// will be selected.
    pub fn ready_at(&self, priority: Priority) -> impl Iterator<Item = usize> + '_ {
        self.ready[priority as usize].iter(&self.tasks)
    }

    // -----------------------------------------------------------------------
    // List plumbing
    // -----------------------------------------------------------------------

    fn list_mut(&mut self, id: ListId) -> (&mut TaskList, &mut [TaskControlBlock]) {
        let list = match id {
            ListId::Ready(p) => &mut self.ready[p as usize],
            ListId::Delayed(i) => &mut self.delayed[i as usize],
            ListId::Waiting => &mut self.waiting,
            ListId::Suspended => &mut self.suspended,
            ListId::Terminating => &mut self.terminating,
        };
        (list, &mut self.tasks)
    }

    /// Detach `idx` from whichever list holds it.
    fn unlink(&mut self, idx: usize) {
        let Some(container) = self.tasks[idx].link.container else {
            return;
        };
        let (list, tasks) = self.list_mut(container);
        list.remove(tasks, idx);
        if let ListId::Ready(p) = container {
            if self.ready[p as usize].is_empty() {
                self.ready_priorities &= !(1 << p);
            }
        }
    }

    fn make_ready(&mut self, idx: usize, front: bool) {
        let priority = self.tasks[idx].priority as usize;
        self.tasks[idx].state = TaskState::Ready;
        let list = &mut self.ready[priority];
        if front {
            list.push_front(&mut self.tasks, idx);
        } else {
            list.push_back(&mut self.tasks, idx);
        }
        self.ready_priorities |= 1 << priority;
    }

    fn running_index(&self) -> Result<usize, Fault> {
        match self.current {
            Some(idx) if self.running => Ok(idx),
            _ => Err(Fault::Assertion {
                file: file!(),
                line: line!(),
            }),
        }
    }

    /// Whether `idx` outranks the running task.
    fn preempts_current(&self, idx: usize) -> bool {
        USE_PREEMPTION
            && self
                .current_index()
                .is_some_and(|cur| self.tasks[idx].priority > self.tasks[cur].priority)
    }

    /// Ask for a context switch. Deferred while the scheduler is locked.
    fn want_switch(&mut self, front: bool) -> bool {
        if !self.running {
            return false;
        }
        if self.lock_depth > 0 {
            self.yield_pending = true;
            return false;
        }
        self.requeue_front |= front;
        true
    }

    fn add_current_to_delayed(&mut self, cur: usize, ticks: TickType) {
        self.tasks[cur].state = TaskState::Blocked;
        if ticks == MAX_DELAY {
            self.waiting.push_back(&mut self.tasks, cur);
            return;
        }

        let wake = self.tick_count.wrapping_add(ticks);
        let active = self.active_delayed;
        if wake < self.tick_count {
            // Wakes after the counter wraps
            self.delayed[1 - active].insert_ordered(&mut self.tasks, cur, wake);
        } else {
            self.delayed[active].insert_ordered(&mut self.tasks, cur, wake);
            if wake < self.next_unblock {
                self.next_unblock = wake;
            }
        }
    }

    fn select_next(&mut self) -> Result<usize, Fault> {
        let priority = self.highest_ready_priority();
        ensure!(priority.is_some());
        let priority = priority.unwrap_or(IDLE_PRIORITY) as usize;

        let next = self.ready[priority].pop_front(&mut self.tasks);
        ensure!(next.is_some());
        let next = next.unwrap_or(0);
        if self.ready[priority].is_empty() {
            self.ready_priorities &= !(1 << priority);
        }

        self.tasks[next].state = TaskState::Running;
        self.current = Some(next);
        self.slice_remaining = TIME_SLICE_TICKS;
        log::trace!("switch to {} ({})", self.tasks[next].name, self.id_of(next));
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Install a new task in a free slot and make it Ready.
    ///
    /// Callers check [`Scheduler::free_slots`] first; running out of slots
    /// here is an invariant violation.
    pub fn add_task(
        &mut self,
        name: &'static str,
        priority: Priority,
        kind: TaskKind,
        stack: StackRegion,
        stack_pointer: *mut StackWord,
    ) -> Result<(TaskId, bool), Fault> {
        ensure!((priority as usize) < MAX_PRIORITIES);
        let slot = self.tasks.iter().position(|t| !t.in_use);
        ensure!(slot.is_some());
        let idx = slot.unwrap_or(0);

        self.tasks[idx].init(name, priority, kind, stack, stack_pointer);
        self.task_count += 1;
        self.make_ready(idx, false);

        let switch = self.preempts_current(idx) && self.want_switch(true);
        Ok((self.id_of(idx), switch))
    }

    /// Select the first task. Returns its saved stack pointer.
    pub fn start(&mut self) -> Result<*mut StackWord, Fault> {
        ensure!(!self.running);
        self.running = true;
        let first = self.select_next()?;
        Ok(self.tasks[first].stack_pointer)
    }

    /// Remove a task from every list and queue it for reclamation.
    pub fn delete(&mut self, idx: usize) -> Result<bool, Fault> {
        ensure!(self.tasks[idx].is_live());
        let is_current = self.current_index() == Some(idx);
        if is_current {
            ensure!(self.lock_depth == 0);
        }

        self.unlink(idx);
        self.tasks[idx].state = TaskState::Terminated;
        self.terminating.push_back(&mut self.tasks, idx);
        Ok(is_current)
    }

    /// Free the oldest deleted task's slot. Called by the idle task.
    pub fn reclaim_one(&mut self) -> Result<Option<Reclaimed>, Fault> {
        let Some(idx) = self.terminating.head() else {
            return Ok(None);
        };
        ensure!(self.current_index() != Some(idx));

        self.terminating.remove(&mut self.tasks, idx);
        let task = self.id_of(idx);
        let name = self.tasks[idx].name;
        let stack = self.tasks[idx].release();
        self.task_count -= 1;
        Ok(Some(Reclaimed { task, name, stack }))
    }

    // -----------------------------------------------------------------------
    // Blocking
    // -----------------------------------------------------------------------

    /// Block the running task for `ticks`. `0` yields, `MAX_DELAY` blocks
    /// until resumed or aborted.
    pub fn delay_current(&mut self, ticks: TickType) -> Result<bool, Fault> {
        let cur = self.running_index()?;
        ensure!(self.lock_depth == 0);
        ensure!(self.tasks[cur].kind != TaskKind::Idle);

        if ticks == 0 {
            return Ok(self.want_switch(false));
        }
        self.add_current_to_delayed(cur, ticks);
        Ok(true)
    }

    /// Block the running task until `previous_wake + increment`, then
    /// advance `previous_wake`. Returns whether the task blocked; a deadline
    /// already in the past does not block.
    pub fn delay_current_until(
        &mut self,
        previous_wake: &mut TickType,
        increment: TickType,
    ) -> Result<bool, Fault> {
        let cur = self.running_index()?;
        ensure!(increment > 0);
        ensure!(self.lock_depth == 0);
        ensure!(self.tasks[cur].kind != TaskKind::Idle);

        let now = self.tick_count;
        let previous = *previous_wake;
        let wake = previous.wrapping_add(increment);
        let should_delay = if now < previous {
            // The counter wrapped since the previous wake
            wake < previous && wake > now
        } else {
            wake < previous || wake > now
        };
        *previous_wake = wake;

        if should_delay {
            self.add_current_to_delayed(cur, wake.wrapping_sub(now).min(MAX_DELAY - 1));
        }
        Ok(should_delay)
    }

    /// Block the running task until the absolute tick `wake`. A deadline
    /// that is already due (or lies more than half the counter range ahead,
    /// which can only mean it has passed) yields instead.
    pub fn delay_current_until_tick(&mut self, wake: TickType) -> Result<bool, Fault> {
        let cur = self.running_index()?;
        ensure!(self.lock_depth == 0);
        ensure!(self.tasks[cur].kind != TaskKind::Idle);

        let remaining = ticks_until(self.tick_count, wake);
        if remaining == 0 || remaining > MAX_DELAY / 2 {
            return Ok(self.want_switch(false));
        }
        self.add_current_to_delayed(cur, remaining);
        Ok(true)
    }

    /// Give way to the next Ready task of the same priority.
    pub fn yield_current(&mut self) -> Result<bool, Fault> {
        self.running_index()?;
        Ok(self.want_switch(false))
    }

    /// Idle-task pass: yield if another priority-0 task is Ready.
    pub fn idle_yield(&mut self) -> Result<bool, Fault> {
        let cur = self.running_index()?;
        ensure!(self.tasks[cur].kind == TaskKind::Idle);
        if self.ready[IDLE_PRIORITY as usize].is_empty() {
            return Ok(false);
        }
        Ok(self.want_switch(false))
    }

    /// Force a Blocked task back to Ready.
    pub fn abort_delay(&mut self, idx: usize) -> Result<bool, Fault> {
        ensure!(self.tasks[idx].is_live() && self.tasks[idx].state == TaskState::Blocked);
        self.unlink(idx);
        self.make_ready(idx, false);
        Ok(self.preempts_current(idx) && self.want_switch(true))
    }

    pub fn suspend(&mut self, idx: usize) -> Result<bool, Fault> {
        ensure!(self.tasks[idx].is_live());
        if self.tasks[idx].state == TaskState::Suspended {
            return Ok(false);
        }
        let is_current = self.current_index() == Some(idx);
        if is_current {
            ensure!(self.lock_depth == 0);
        }

        self.unlink(idx);
        self.tasks[idx].state = TaskState::Suspended;
        self.suspended.push_back(&mut self.tasks, idx);
        Ok(is_current)
    }

    pub fn resume(&mut self, idx: usize) -> Result<bool, Fault> {
        ensure!(self.tasks[idx].is_live());
        if self.tasks[idx].state != TaskState::Suspended {
            return Ok(false);
        }
        self.unlink(idx);
        self.make_ready(idx, false);
        Ok(self.preempts_current(idx) && self.want_switch(true))
    }

    // -----------------------------------------------------------------------
    // Priorities
    // -----------------------------------------------------------------------

    /// Move a task to effective priority `new`, keeping list membership
    /// consistent.
    fn change_effective(&mut self, idx: usize, new: Priority) -> bool {
        let old = self.tasks[idx].priority;
        if old == new {
            return false;
        }

        match self.tasks[idx].state {
            TaskState::Ready => {
                self.unlink(idx);
                self.tasks[idx].priority = new;
                self.make_ready(idx, false);
                self.preempts_current(idx) && self.want_switch(true)
            }
            TaskState::Running => {
                self.tasks[idx].priority = new;
                let outranked = self.highest_ready_priority().is_some_and(|p| p > new);
                outranked && self.want_switch(false)
            }
            // Delayed lists are keyed by wake tick; nothing to move
            _ => {
                self.tasks[idx].priority = new;
                false
            }
        }
    }

    /// Set a task's base priority. A task holding an inherited boost keeps
    /// the boost unless the new priority is higher still.
    pub fn set_priority(&mut self, idx: usize, priority: Priority) -> Result<bool, Fault> {
        ensure!(self.tasks[idx].is_live());
        ensure!((priority as usize) < MAX_PRIORITIES);

        let tcb = &mut self.tasks[idx];
        let boosted = tcb.is_boosted();
        tcb.base_priority = priority;
        if boosted && priority <= tcb.priority {
            return Ok(false);
        }
        Ok(self.change_effective(idx, priority))
    }

    /// Raise a task to at least `priority` without touching its base.
    pub fn inherit_priority(&mut self, idx: usize, priority: Priority) -> Result<bool, Fault> {
        ensure!(self.tasks[idx].is_live());
        ensure!((priority as usize) < MAX_PRIORITIES);
        if priority <= self.tasks[idx].priority {
            return Ok(false);
        }
        Ok(self.change_effective(idx, priority))
    }

    /// Drop an inherited boost, returning to the base priority.
    pub fn disinherit_priority(&mut self, idx: usize) -> Result<bool, Fault> {
        ensure!(self.tasks[idx].is_live());
        let base = self.tasks[idx].base_priority;
        Ok(self.change_effective(idx, base))
    }

    // -----------------------------------------------------------------------
    // Scheduler lock
    // -----------------------------------------------------------------------

    /// Defer context switches and tick processing.
    pub fn lock(&mut self) {
        self.lock_depth += 1;
    }

    /// Undo one [`Scheduler::lock`]. On the outermost unlock the pended
    /// ticks are replayed; returns whether a switch is now due.
    pub fn unlock(&mut self) -> Result<bool, Fault> {
        ensure!(self.lock_depth > 0);
        self.lock_depth -= 1;
        if self.lock_depth > 0 {
            return Ok(false);
        }

        while self.pended_ticks > 0 {
            if self.advance_tick()? {
                self.yield_pending = true;
            }
            self.pended_ticks -= 1;
        }
        Ok(self.running && self.yield_pending)
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Tick interrupt entry.
    pub fn increment_tick(&mut self) -> Result<bool, Fault> {
        if self.lock_depth > 0 {
            self.pended_ticks = self.pended_ticks.wrapping_add(1);
            return Ok(false);
        }
        self.advance_tick()
    }

    fn advance_tick(&mut self) -> Result<bool, Fault> {
        self.tick_count = self.tick_count.wrapping_add(1);
        if self.tick_count == 0 {
            self.switch_delayed_lists()?;
        }

        let woke = self.process_wakeups()?;
        let sliced = self.charge_time_slice();
        let mut switch = woke || sliced;
        if self.yield_pending && self.want_switch(false) {
            switch = true;
        }
        Ok(switch)
    }

    fn switch_delayed_lists(&mut self) -> Result<(), Fault> {
        // Everything in the old epoch woke at or before u32::MAX
        ensure!(self.delayed[self.active_delayed].is_empty());
        self.active_delayed = 1 - self.active_delayed;
        self.next_unblock = match self.delayed[self.active_delayed].head() {
            Some(head) => self.tasks[head].link.value,
            None => MAX_DELAY,
        };
        Ok(())
    }

    /// Move every task whose wake tick has arrived to its ready list.
    ///
    /// Separate from the counter increment and idempotent: calling it again
    /// at the same tick changes nothing.
    pub fn process_wakeups(&mut self) -> Result<bool, Fault> {
        if self.tick_count < self.next_unblock {
            return Ok(false);
        }

        let active = self.active_delayed;
        let mut preempt = false;
        loop {
            let Some(head) = self.delayed[active].head() else {
                self.next_unblock = MAX_DELAY;
                break;
            };
            let wake = self.tasks[head].link.value;
            if self.tick_count < wake {
                self.next_unblock = wake;
                break;
            }

            ensure!(self.tasks[head].state == TaskState::Blocked);
            self.delayed[active].remove(&mut self.tasks, head);
            self.make_ready(head, false);
            preempt |= self.preempts_current(head);
        }
        Ok(preempt && self.want_switch(true))
    }

    /// Charge one tick to the running task. Returns whether its slice is
    /// spent and an equal-priority task is waiting; `slice_remaining` then
    /// stays at zero until the switch is taken.
    fn charge_time_slice(&mut self) -> bool {
        if !USE_TIME_SLICING {
            return false;
        }
        let Some(cur) = self.current_index() else {
            return false;
        };
        if self.tasks[cur].state != TaskState::Running {
            return false;
        }

        self.slice_remaining = self.slice_remaining.saturating_sub(1);
        if self.slice_remaining > 0 {
            return false;
        }
        if self.ready_len(self.tasks[cur].priority) == 0 {
            self.slice_remaining = TIME_SLICE_TICKS;
            return false;
        }
        self.want_switch(false)
    }

    // -----------------------------------------------------------------------
    // Context switch
    // -----------------------------------------------------------------------

    /// Save the outgoing task's stack pointer, check its stack, requeue it
    /// if still runnable and select the next task. Returns the incoming
    /// task's saved stack pointer.
    pub fn switch_context(&mut self, sp: *mut StackWord) -> Result<*mut StackWord, Fault> {
        ensure!(self.running);
        if self.lock_depth > 0 {
            self.yield_pending = true;
            return Ok(sp);
        }

        if let Some(cur) = self.current {
            self.tasks[cur].stack_pointer = sp;
            let overflowed = self.tasks[cur].stack.as_ref().is_some_and(|s| s.overflowed(sp));
            if overflowed {
                return Err(Fault::StackOverflow {
                    task: self.id_of(cur),
                    name: self.tasks[cur].name,
                });
            }
            if self.tasks[cur].state == TaskState::Running {
                let front = self.requeue_front && self.slice_remaining > 0;
                self.make_ready(cur, front);
            }
        }

        self.requeue_front = false;
        self.yield_pending = false;
        let next = self.select_next()?;
        Ok(self.tasks[next].stack_pointer)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
