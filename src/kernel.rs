//! # Kernel
//!
//! The public face of PriOS. A [`Kernel`] owns everything: the port, the
//! scheduler, the stack pool, the hook table and the software timers. There
//! is no hidden global state; firmware binds one instance for its exception
//! handlers (see `rtos`), tests build as many as they like.
//!
//! Every operation follows the same shape: enter a [`CriticalSection`], call
//! into the scheduler, leave it, then act on the outcome. A wanted context
//! switch is pended through the port; a [`Fault`] goes to the hooks, always
//! outside the critical section.
//!
//! ## Startup Sequence
//!
//! ```text
//! Kernel::new(port, hooks, pool memory)
//!   ├─► create_task() / create_static_task()   ← Register tasks (×N)
//!   └─► start(&mut static_memory)
//!         ├─► Create idle task (priority 0)
//!         ├─► Create timer task (TIMER_TASK_PRIORITY)
//!         ├─► Select the highest-priority Ready task
//!         └─► port.start_first_task()  (never returns on hardware)
//! ```

use crate::arch::Port;
use crate::config::{
    IDLE_PRIORITY, IDLE_SHOULD_YIELD, MAX_PRIORITIES, MIN_STACK_WORDS, TIMER_TASK_PRIORITY,
};
use crate::error::{ConfigError, Fault, KernelError, Resource};
use crate::hooks::{Hooks, StaticMemory};
use crate::pool::StackPool;
use crate::scheduler::Scheduler;
use crate::stack::{StackRegion, StackWord};
use crate::sync::{CriticalNesting, CriticalSection};
use crate::task::{Priority, TaskId, TaskKind, TaskParams, TaskState};
use crate::time::{TickType, MAX_DELAY};
use crate::timers::{TimerCallback, TimerId, TimerService};

pub const IDLE_TASK_NAME: &str = "IDLE";
pub const TIMER_TASK_NAME: &str = "Tmr Svc";

pub struct Kernel<P: Port> {
    port: P,
    nesting: CriticalNesting,
    scheduler: Scheduler,
    pool: StackPool,
    hooks: Hooks,
    timers: TimerService,
    idle: Option<TaskId>,
    timer_task: Option<TaskId>,
    daemon_started: bool,
}

impl<P: Port> Kernel<P> {
    /// Create a kernel. Task stacks requested through [`Kernel::create_task`]
    /// are carved out of `pool_memory`.
    pub fn new(port: P, hooks: Hooks, pool_memory: &'static mut [StackWord]) -> Self {
        Self {
            port,
            nesting: CriticalNesting::new(),
            scheduler: Scheduler::new(),
            pool: StackPool::new(pool_memory),
            hooks,
            timers: TimerService::new(),
            idle: None,
            timer_task: None,
            daemon_started: false,
        }
    }

    /// Start the tick counter at `tick` instead of zero.
    pub fn starting_at_tick(mut self, tick: TickType) -> Self {
        self.scheduler.set_tick_count(tick);
        self
    }

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    #[inline]
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Pend a switch or route a fault to the hooks.
    fn settle(&self, outcome: Result<bool, Fault>) {
        match outcome {
            Ok(true) => self.port.request_context_switch(),
            Ok(false) => {}
            Err(fault) => self.raise(fault),
        }
    }

    /// Hand a terminal fault to its hook. Never returns.
    pub fn raise(&self, fault: Fault) -> ! {
        log::error!("kernel fault: {}", fault);
        match fault {
            Fault::StackOverflow { task, name } => (self.hooks.stack_overflow)(task, name),
            Fault::Assertion { file, line } => (self.hooks.assertion_failed)(file, line),
        }
    }

    fn clamp_priority(&self, priority: Priority) -> Priority {
        let max = (MAX_PRIORITIES - 1) as Priority;
        if priority > max {
            log::warn!("priority {} clamped to {}", priority, max);
            max
        } else {
            priority
        }
    }

    /// Arena index for a handle, or the running task for `None`.
    fn resolve(&self, task: Option<TaskId>) -> Result<usize, KernelError> {
        match task {
            Some(id) => self.scheduler.index_of(id).ok_or(KernelError::InvalidTask),
            None => self.scheduler.current_index().ok_or(KernelError::NotStarted),
        }
    }

    fn is_system_task(&self, idx: usize) -> bool {
        self.scheduler.tasks[idx].kind != TaskKind::Application
    }

    // -----------------------------------------------------------------------
    // Task creation and start
    // -----------------------------------------------------------------------

    /// Create a task with a stack from the pool.
    ///
    /// Fails with `ResourceExhausted` when no TCB slot is free or the pool
    /// cannot supply the stack; in the latter case the allocation-failure
    /// hook runs first.
    pub fn create_task(&mut self, params: TaskParams) -> Result<TaskId, KernelError> {
        if params.stack_words < MIN_STACK_WORDS {
            return Err(KernelError::InvalidStackSize);
        }
        if self.scheduler.free_slots() == 0 {
            return Err(KernelError::ResourceExhausted(Resource::TaskSlots));
        }

        let region = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.pool.alloc(params.stack_words)
        };
        let Some(region) = region else {
            log::warn!("no pool memory for {} ({} words)", params.name, params.stack_words);
            (self.hooks.allocation_failed)(params.stack_words);
            return Err(KernelError::ResourceExhausted(Resource::StackPool));
        };
        Ok(self.install(params, region, TaskKind::Application))
    }

    /// Create a task on application-provided stack memory.
    pub fn create_static_task(
        &mut self,
        params: TaskParams,
        stack: &'static mut [StackWord],
    ) -> Result<TaskId, KernelError> {
        if stack.len() < MIN_STACK_WORDS {
            return Err(KernelError::InvalidStackSize);
        }
        if self.scheduler.free_slots() == 0 {
            return Err(KernelError::ResourceExhausted(Resource::TaskSlots));
        }
        Ok(self.install(params, StackRegion::from_static(stack), TaskKind::Application))
    }

    fn install(&mut self, params: TaskParams, mut region: StackRegion, kind: TaskKind) -> TaskId {
        let priority = self.clamp_priority(params.priority);
        region.paint();
        // SAFETY: the region was just allocated for this task alone and is
        // at least MIN_STACK_WORDS long.
        let sp = unsafe { self.port.init_stack(&region, params.entry, params.argument) };

        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.add_task(params.name, priority, kind, region, sp)
        };
        match outcome {
            Ok((id, switch)) => {
                log::debug!("created {} ({}) at priority {}", params.name, id, priority);
                if switch {
                    self.port.request_context_switch();
                }
                id
            }
            Err(fault) => self.raise(fault),
        }
    }

    /// Create the idle and timer tasks from `memory` and enter the
    /// highest-priority Ready task.
    ///
    /// On hardware ports this does not return on success. Configuration
    /// errors are reported before anything has been started.
    pub fn start(&mut self, memory: &mut impl StaticMemory) -> Result<(), KernelError> {
        if self.scheduler.is_running() {
            return Err(KernelError::AlreadyStarted);
        }

        // Checked before the provider hands out its take-once buffers
        if self.scheduler.free_slots() < 2 {
            return Err(ConfigError::NoSlotForSystemTask.into());
        }
        let idle_stack = memory.idle_task_stack().ok_or(ConfigError::MissingIdleStack)?;
        let timer_stack = memory.timer_task_stack().ok_or(ConfigError::MissingTimerStack)?;
        if idle_stack.len() < MIN_STACK_WORDS || timer_stack.len() < MIN_STACK_WORDS {
            return Err(ConfigError::SystemStackTooSmall.into());
        }

        let idle = TaskParams::new(
            IDLE_TASK_NAME,
            self.port.system_entry(TaskKind::Idle),
            IDLE_PRIORITY,
        );
        self.idle = Some(self.install(idle, StackRegion::from_static(idle_stack), TaskKind::Idle));
        let timer = TaskParams::new(
            TIMER_TASK_NAME,
            self.port.system_entry(TaskKind::TimerService),
            TIMER_TASK_PRIORITY,
        );
        let timer_region = StackRegion::from_static(timer_stack);
        self.timer_task = Some(self.install(timer, timer_region, TaskKind::TimerService));

        let first = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.start()
        };
        let sp = match first {
            Ok(sp) => sp,
            Err(fault) => self.raise(fault),
        };
        log::info!(
            "scheduler started: {} tasks, tick {}",
            self.scheduler.task_count(),
            self.scheduler.tick_count()
        );

        // SAFETY: `sp` was built by `init_stack` and the kernel is fully set
        // up; anything the port's handlers need is reachable from here on.
        unsafe { self.port.start_first_task(sp) };
        Ok(())
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.scheduler.is_running()
    }

    // -----------------------------------------------------------------------
    // Task operations
    // -----------------------------------------------------------------------

    /// Block the calling task for `ticks`. `0` yields; `MAX_DELAY` blocks
    /// until resumed or aborted.
    pub fn delay(&mut self, ticks: TickType) {
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.delay_current(ticks)
        };
        self.settle(outcome);
    }

    /// Periodic delay: block until `*previous_wake + increment`, then store
    /// that tick in `previous_wake`. Returns false without blocking when the
    /// deadline has already passed.
    pub fn delay_until(&mut self, previous_wake: &mut TickType, increment: TickType) -> bool {
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.delay_current_until(previous_wake, increment)
        };
        match outcome {
            Ok(blocked) => {
                if blocked {
                    self.port.request_context_switch();
                }
                blocked
            }
            Err(fault) => self.raise(fault),
        }
    }

    /// Let the next Ready task of the same priority run.
    pub fn yield_now(&mut self) {
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.yield_current()
        };
        self.settle(outcome);
    }

    /// Change a task's priority (`None` for the caller).
    pub fn set_priority(
        &mut self,
        task: Option<TaskId>,
        priority: Priority,
    ) -> Result<(), KernelError> {
        let idx = self.resolve(task)?;
        let priority = self.clamp_priority(priority);
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.set_priority(idx, priority)
        };
        self.settle(outcome);
        Ok(())
    }

    /// Current (effective) priority of a task (`None` for the caller).
    pub fn priority(&self, task: Option<TaskId>) -> Result<Priority, KernelError> {
        let idx = self.resolve(task)?;
        Ok(self.scheduler.tasks[idx].priority)
    }

    /// Priority assigned by the application, ignoring inherited boosts.
    pub fn base_priority(&self, task: Option<TaskId>) -> Result<Priority, KernelError> {
        let idx = self.resolve(task)?;
        Ok(self.scheduler.tasks[idx].base_priority)
    }

    /// Delete a task (`None` for the caller). Its slot and stack are
    /// reclaimed later by the idle task.
    pub fn delete(&mut self, task: Option<TaskId>) -> Result<(), KernelError> {
        let idx = self.resolve(task)?;
        if self.is_system_task(idx) {
            return Err(KernelError::SystemTask);
        }
        let name = self.scheduler.tasks[idx].name;
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.delete(idx)
        };
        log::debug!("deleted {}", name);
        self.settle(outcome);
        Ok(())
    }

    /// Take a task out of scheduling until [`Kernel::resume`].
    pub fn suspend(&mut self, task: Option<TaskId>) -> Result<(), KernelError> {
        let idx = self.resolve(task)?;
        if self.is_system_task(idx) {
            return Err(KernelError::SystemTask);
        }
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.suspend(idx)
        };
        self.settle(outcome);
        Ok(())
    }

    /// Make a Suspended task Ready again. No effect on other states.
    pub fn resume(&mut self, task: TaskId) -> Result<(), KernelError> {
        let idx = self.resolve(Some(task))?;
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.resume(idx)
        };
        self.settle(outcome);
        Ok(())
    }

    /// Wake a Blocked task early. Returns whether it was blocked.
    pub fn abort_delay(&mut self, task: TaskId) -> Result<bool, KernelError> {
        let idx = self.resolve(Some(task))?;
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            if self.scheduler.tasks[idx].state != TaskState::Blocked {
                return Ok(false);
            }
            self.scheduler.abort_delay(idx)
        };
        self.settle(outcome);
        Ok(true)
    }

    /// Lock the scheduler: no context switches until the matching
    /// [`Kernel::resume_all`]. Interrupts stay enabled; ticks are pended.
    pub fn suspend_all(&mut self) {
        let _cs = CriticalSection::enter(&self.nesting, &self.port);
        self.scheduler.lock();
    }

    /// Undo one [`Kernel::suspend_all`]. Returns whether a switch was
    /// pended as a result.
    pub fn resume_all(&mut self) -> bool {
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.unlock()
        };
        match outcome {
            Ok(switch) => {
                if switch {
                    self.port.request_context_switch();
                }
                switch
            }
            Err(fault) => self.raise(fault),
        }
    }

    /// Raise `holder` to at least `priority` (priority inheritance).
    pub fn inherit_priority(
        &mut self,
        holder: TaskId,
        priority: Priority,
    ) -> Result<(), KernelError> {
        let idx = self.resolve(Some(holder))?;
        let priority = self.clamp_priority(priority);
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.inherit_priority(idx, priority)
        };
        self.settle(outcome);
        Ok(())
    }

    /// Return `holder` to its base priority.
    pub fn disinherit_priority(&mut self, holder: TaskId) -> Result<(), KernelError> {
        let idx = self.resolve(Some(holder))?;
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.disinherit_priority(idx)
        };
        self.settle(outcome);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Interrupt and system-task entry points
    // -----------------------------------------------------------------------

    /// Tick interrupt body. Runs the tick hook, then advances time.
    pub fn tick(&mut self) {
        (self.hooks.tick)(self.scheduler.tick_count());
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.increment_tick()
        };
        self.settle(outcome);
    }

    /// Context-switch body: record the outgoing task's stack pointer and
    /// return the incoming one's.
    pub fn switch_context(&mut self, sp: *mut StackWord) -> *mut StackWord {
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.scheduler.switch_context(sp)
        };
        match outcome {
            Ok(next) => next,
            Err(fault) => self.raise(fault),
        }
    }

    /// One pass of the idle task: reclaim deleted tasks, run the idle hook,
    /// give way to other priority-0 tasks.
    pub fn idle_step(&mut self) {
        loop {
            let reclaimed = {
                let _cs = CriticalSection::enter(&self.nesting, &self.port);
                self.scheduler.reclaim_one()
            };
            match reclaimed {
                Ok(Some(task)) => {
                    if let Some(stack) = task.stack {
                        let _cs = CriticalSection::enter(&self.nesting, &self.port);
                        self.pool.free(stack);
                    }
                    log::debug!("reclaimed {} ({})", task.name, task.task);
                }
                Ok(None) => break,
                Err(fault) => self.raise(fault),
            }
        }

        (self.hooks.idle)();

        if IDLE_SHOULD_YIELD {
            let outcome = {
                let _cs = CriticalSection::enter(&self.nesting, &self.port);
                self.scheduler.idle_yield()
            };
            self.settle(outcome);
        }
    }

    /// One pass of the timer task: run expired callbacks, then block until
    /// the next expiry (indefinitely when no timer is active).
    pub fn run_timer_service(&mut self) {
        if !self.daemon_started {
            self.daemon_started = true;
            (self.hooks.daemon_startup)();
        }

        let expired = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.timers.expire(self.scheduler.tick_count())
        };
        for (id, callback) in expired {
            callback(id);
        }

        // Deadline and block share one section so a tick in between cannot
        // push the wake past the expiry
        let outcome = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            let now = self.scheduler.tick_count();
            match self.timers.next_expiry(now) {
                Some(wait) => self.scheduler.delay_current_until_tick(now.wrapping_add(wait)),
                None => self.scheduler.delay_current(MAX_DELAY),
            }
        };
        self.settle(outcome);
    }

    /// A task's entry point returned without deleting the task. Always
    /// fatal.
    pub fn task_returned(&self, task: Option<TaskId>) -> ! {
        let name = self
            .resolve(task)
            .map_or("<unknown>", |idx| self.scheduler.tasks[idx].name);
        log::error!("task {} returned from its entry point", name);
        self.raise(Fault::Assertion {
            file: file!(),
            line: line!(),
        })
    }

    // -----------------------------------------------------------------------
    // Software timers
    // -----------------------------------------------------------------------

    pub fn create_timer(
        &mut self,
        name: &'static str,
        period: TickType,
        auto_reload: bool,
        callback: TimerCallback,
    ) -> Result<TimerId, KernelError> {
        let _cs = CriticalSection::enter(&self.nesting, &self.port);
        self.timers.create(name, period, auto_reload, callback)
    }

    /// Start (or restart) a timer from the current tick.
    pub fn start_timer(&mut self, timer: TimerId) -> Result<(), KernelError> {
        let started = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.timers.start(timer, self.scheduler.tick_count())
        };
        started?;
        self.wake_timer_service();
        Ok(())
    }

    /// Restart a timer's period from the current tick.
    pub fn reset_timer(&mut self, timer: TimerId) -> Result<(), KernelError> {
        self.start_timer(timer)
    }

    pub fn stop_timer(&mut self, timer: TimerId) -> Result<(), KernelError> {
        let _cs = CriticalSection::enter(&self.nesting, &self.port);
        self.timers.stop(timer)
    }

    /// Change a timer's period; the timer (re)starts from the current tick.
    pub fn change_timer_period(
        &mut self,
        timer: TimerId,
        period: TickType,
    ) -> Result<(), KernelError> {
        let changed = {
            let _cs = CriticalSection::enter(&self.nesting, &self.port);
            self.timers.change_period(timer, period, self.scheduler.tick_count())
        };
        changed?;
        self.wake_timer_service();
        Ok(())
    }

    pub fn delete_timer(&mut self, timer: TimerId) -> Result<(), KernelError> {
        let _cs = CriticalSection::enter(&self.nesting, &self.port);
        self.timers.delete(timer)
    }

    pub fn timer_is_active(&self, timer: TimerId) -> Result<bool, KernelError> {
        let _cs = CriticalSection::enter(&self.nesting, &self.port);
        self.timers.is_active(timer)
    }

    pub fn timer_name(&self, timer: TimerId) -> Result<&'static str, KernelError> {
        self.timers.name(timer)
    }

    /// Get a sleeping timer task to recompute its wait.
    fn wake_timer_service(&mut self) {
        if let Some(timer_task) = self.timer_task {
            // Not blocked means it will look at the timers anyway
            let _ = self.abort_delay(timer_task);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn task_state(&self, task: TaskId) -> Result<TaskState, KernelError> {
        let tcb = self.scheduler.tasks.get(task.slot()).ok_or(KernelError::InvalidTask)?;
        if !tcb.in_use || tcb.generation != task.generation() {
            return Err(KernelError::InvalidTask);
        }
        Ok(tcb.state)
    }

    pub fn task_name(&self, task: Option<TaskId>) -> Result<&'static str, KernelError> {
        let idx = self.resolve(task)?;
        Ok(self.scheduler.tasks[idx].name)
    }

    pub fn task_kind(&self, task: TaskId) -> Result<TaskKind, KernelError> {
        let idx = self.resolve(Some(task))?;
        Ok(self.scheduler.tasks[idx].kind)
    }

    /// The running task, once the scheduler has started.
    pub fn current_task(&self) -> Option<TaskId> {
        self.scheduler.current_id()
    }

    #[inline]
    pub fn tick_count(&self) -> TickType {
        self.scheduler.tick_count()
    }

    /// Tasks created and not yet reclaimed, system tasks included.
    #[inline]
    pub fn number_of_tasks(&self) -> usize {
        self.scheduler.task_count()
    }

    /// Smallest amount of stack, in words, the task has ever had free.
    pub fn stack_high_water_mark(&self, task: Option<TaskId>) -> Result<usize, KernelError> {
        let idx = self.resolve(task)?;
        Ok(self.scheduler.tasks[idx].high_water_mark())
    }

    #[inline]
    pub fn pool_free_words(&self) -> usize {
        self.pool.free_words()
    }

    #[inline]
    pub fn pool_minimum_ever_free_words(&self) -> usize {
        self.pool.minimum_ever_free_words()
    }

    pub fn idle_task(&self) -> Option<TaskId> {
        self.idle
    }

    pub fn timer_task(&self) -> Option<TaskId> {
        self.timer_task
    }

    /// Read-only view of the scheduler core.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // -----------------------------------------------------------------------
    // Critical sections
    // -----------------------------------------------------------------------

    /// Enter a critical section; pair with [`Kernel::exit_critical`].
    pub fn enter_critical(&self) {
        self.nesting.enter(&self.port);
    }

    /// Leave a critical section. Unbalanced exits are fatal.
    pub fn exit_critical(&self) {
        if let Err(fault) = self.nesting.exit(&self.port) {
            self.raise(fault);
        }
    }

    /// Scoped critical section, released when the guard drops.
    pub fn critical(&self) -> CriticalSection<'_, P> {
        CriticalSection::enter(&self.nesting, &self.port)
    }

    pub fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
        let _cs = CriticalSection::enter(&self.nesting, &self.port);
        f()
    }

    #[inline]
    pub fn critical_nesting(&self) -> u32 {
        self.nesting.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::{unreachable_entry, SimPort};
    use crate::sim::{leak_stack, panicking_hooks, SimMemory};

    fn kernel() -> Kernel<SimPort> {
        Kernel::new(SimPort::new(), panicking_hooks(), leak_stack(1024))
    }

    #[test]
    fn test_critical_sections_nest() {
        let kernel = kernel();
        kernel.enter_critical();
        {
            let _inner = kernel.critical();
            assert_eq!(kernel.critical_nesting(), 2);
        }
        assert!(kernel.port().interrupts_masked());
        kernel.exit_critical();
        assert!(!kernel.port().interrupts_masked());
        assert_eq!(kernel.critical_section(|| kernel.critical_nesting()), 1);
        assert_eq!(kernel.critical_nesting(), 0);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_unbalanced_exit_is_fatal() {
        kernel().exit_critical();
    }

    #[test]
    fn test_operations_before_start() {
        let mut kernel = kernel();
        assert_eq!(kernel.priority(None), Err(KernelError::NotStarted));
        assert_eq!(kernel.current_task(), None);

        let id = kernel
            .create_task(TaskParams::new("early", unreachable_entry, 9))
            .unwrap();
        assert_eq!(kernel.priority(Some(id)), Ok((MAX_PRIORITIES - 1) as Priority));
        assert_eq!(kernel.task_state(id), Ok(TaskState::Ready));
        assert!(!kernel.port().switch_pending());

        kernel.start(&mut SimMemory::new()).unwrap();
        assert!(kernel.port().started());
        assert_eq!(kernel.number_of_tasks(), 3);
        // Created first, so it wins the tie with the timer task
        assert_eq!(kernel.current_task(), Some(id));
        assert_eq!(kernel.port().psp(), kernel.scheduler().tasks[id.slot()].stack_pointer);
    }
}
