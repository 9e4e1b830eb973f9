//! # Host Simulator
//!
//! Runs a [`Kernel`] on the [`SimPort`] without a CPU to switch between.
//! Each task body is a [`SimTask`] that is stepped once per call while its
//! task is Running; every step performs one kernel call at most. After each
//! step the simulator takes any pended context switch the way PendSV would,
//! and when the idle task runs (or a task burns CPU) the tick advances.
//!
//! ```text
//!   step()
//!     ├─► service pended switch
//!     ├─► current task?
//!     │     ├─ IDLE     → idle_step(); tick unless a switch is pending
//!     │     ├─ Tmr Svc  → run_timer_service()
//!     │     └─ app task → body.step(ctx)
//!     └─► service pended switch
//! ```

use crate::arch::sim::{unreachable_entry, SimPort};
use crate::config::{
    MAX_POOL_BLOCKS, MAX_TASKS, MINIMAL_STACK_WORDS, POOL_BLOCK_WORDS, TIMER_TASK_STACK_WORDS,
};
use crate::demo::DemoTask;
use crate::error::KernelError;
use crate::hooks::{Hooks, StaticMemory};
use crate::kernel::Kernel;
use crate::stack::StackWord;
use crate::task::{Priority, TaskId, TaskKind, TaskParams};
use crate::time::TickType;

/// Steps a task may take without blocking before the simulated timer
/// interrupt fires anyway.
const STEPS_PER_TICK: u32 = 64;

/// Leak a zeroed stack buffer for the lifetime of the process.
pub fn leak_stack(words: usize) -> &'static mut [StackWord] {
    Box::leak(vec![0; words].into_boxed_slice())
}

/// Outcome of one [`SimTask::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The task did some work and may keep running.
    Continue,
    /// The task spun for the rest of the tick without calling the kernel.
    Busy,
    /// The body's entry point returned.
    Returned,
}

/// A line printed by a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub tick: TickType,
    pub task: &'static str,
    pub message: &'static str,
    pub priority: Priority,
}

/// What a task body sees while it runs.
pub struct SimContext<'a> {
    pub kernel: &'a mut Kernel<SimPort>,
    task: TaskId,
    reports: &'a mut Vec<Report>,
}

impl SimContext<'_> {
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Print `message` with the task's current priority, inside a critical
    /// section like the firmware does.
    pub fn report(&mut self, message: &'static str) {
        let kernel = &*self.kernel;
        let task = kernel.task_name(Some(self.task)).unwrap_or("<unknown>");
        let priority = kernel.priority(Some(self.task)).unwrap_or(0);
        let tick = kernel.tick_count();
        kernel.critical_section(|| log::info!("{} with priority {}", message, priority));
        self.reports.push(Report {
            tick,
            task,
            message,
            priority,
        });
    }
}

/// A simulated task body.
pub trait SimTask {
    fn step(&mut self, ctx: &mut SimContext<'_>) -> Step;
}

impl<F> SimTask for F
where
    F: FnMut(&mut SimContext<'_>) -> Step,
{
    fn step(&mut self, ctx: &mut SimContext<'_>) -> Step {
        self(ctx)
    }
}

/// One instruction of a [`ScriptedTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Report(&'static str),
    Delay(TickType),
    SetOwnPriority(Priority),
    DeleteSelf,
    /// Burn the rest of the current tick.
    Busy,
    Yield,
}

/// A task body that runs a fixed list of actions, one per step.
#[derive(Debug, Clone)]
pub struct ScriptedTask {
    actions: Vec<Action>,
    next: usize,
}

impl ScriptedTask {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            next: 0,
        }
    }

    /// The demo loop for `demo`, with one tick standing for `ms_per_tick`
    /// milliseconds.
    pub fn from_demo(demo: &DemoTask, ms_per_tick: u32) -> Self {
        let delay = demo.delay_ms / ms_per_tick.max(1);
        let mut actions = Vec::new();
        for i in 0..demo.iterations {
            actions.push(Action::Report(demo.message));
            actions.push(Action::Delay(delay));
            actions.push(Action::SetOwnPriority(demo.priority_after(i)));
        }
        actions.push(Action::DeleteSelf);
        Self::new(actions)
    }

    /// Whether every action has run.
    pub fn finished(&self) -> bool {
        self.next >= self.actions.len()
    }
}

impl SimTask for ScriptedTask {
    fn step(&mut self, ctx: &mut SimContext<'_>) -> Step {
        let Some(&action) = self.actions.get(self.next) else {
            return Step::Returned;
        };
        self.next += 1;

        match action {
            Action::Report(message) => ctx.report(message),
            Action::Delay(ticks) => ctx.kernel.delay(ticks),
            Action::SetOwnPriority(priority) => {
                if let Err(err) = ctx.kernel.set_priority(None, priority) {
                    log::warn!("set_priority failed: {}", err);
                }
            }
            Action::DeleteSelf => {
                if let Err(err) = ctx.kernel.delete(None) {
                    log::warn!("delete failed: {}", err);
                }
            }
            Action::Busy => return Step::Busy,
            Action::Yield => ctx.kernel.yield_now(),
        }
        Step::Continue
    }
}

/// Stacks for the idle and timer tasks, leaked on construction.
pub struct SimMemory {
    idle: Option<&'static mut [StackWord]>,
    timer: Option<&'static mut [StackWord]>,
}

impl SimMemory {
    pub fn new() -> Self {
        Self::with_stacks(
            Some(leak_stack(MINIMAL_STACK_WORDS)),
            Some(leak_stack(TIMER_TASK_STACK_WORDS)),
        )
    }

    pub fn with_stacks(
        idle: Option<&'static mut [StackWord]>,
        timer: Option<&'static mut [StackWord]>,
    ) -> Self {
        Self { idle, timer }
    }
}

impl Default for SimMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticMemory for SimMemory {
    fn idle_task_stack(&mut self) -> Option<&'static mut [StackWord]> {
        self.idle.take()
    }

    fn timer_task_stack(&mut self) -> Option<&'static mut [StackWord]> {
        self.timer.take()
    }
}

fn panic_on_stack_overflow(task: TaskId, name: &'static str) -> ! {
    panic!("stack overflow in {} ({})", name, task)
}

fn panic_on_assertion(file: &'static str, line: u32) -> ! {
    panic!("assertion failed at {}:{}", file, line)
}

fn report_allocation_failure(words: usize) {
    log::warn!("stack pool exhausted ({} words requested)", words);
}

/// Hooks for hosted runs: faults panic so a test can observe them,
/// allocation failures are only logged.
pub const fn panicking_hooks() -> Hooks {
    Hooks {
        allocation_failed: report_allocation_failure,
        stack_overflow: panic_on_stack_overflow,
        assertion_failed: panic_on_assertion,
        ..Hooks::new()
    }
}

type Body = (TaskId, Box<dyn SimTask>);

pub struct Simulator {
    kernel: Kernel<SimPort>,
    bodies: Vec<Option<Body>>,
    reports: Vec<Report>,
    /// Steps since the last tick.
    steps: u32,
}

impl Simulator {
    /// A simulator with a full-size stack pool and [`panicking_hooks`].
    pub fn new() -> Self {
        Self::with_hooks(panicking_hooks())
    }

    pub fn with_hooks(hooks: Hooks) -> Self {
        let pool = leak_stack(POOL_BLOCK_WORDS * MAX_POOL_BLOCKS);
        Self::with_kernel(Kernel::new(SimPort::new(), hooks, pool))
    }

    pub fn with_kernel(kernel: Kernel<SimPort>) -> Self {
        let mut bodies = Vec::with_capacity(MAX_TASKS);
        bodies.resize_with(MAX_TASKS, || None);
        Self {
            kernel,
            bodies,
            reports: Vec::new(),
            steps: 0,
        }
    }

    /// Create a task running `body`.
    pub fn spawn(
        &mut self,
        name: &'static str,
        priority: Priority,
        body: impl SimTask + 'static,
    ) -> Result<TaskId, KernelError> {
        let id = self
            .kernel
            .create_task(TaskParams::new(name, unreachable_entry, priority))?;
        self.bodies[id.slot()] = Some((id, Box::new(body)));
        self.service_switch();
        Ok(id)
    }

    /// Start with freshly leaked system-task stacks.
    pub fn start(&mut self) -> Result<(), KernelError> {
        self.start_with(&mut SimMemory::new())
    }

    pub fn start_with(&mut self, memory: &mut impl StaticMemory) -> Result<(), KernelError> {
        self.kernel.start(memory)
    }

    /// Take a pended context switch, if any.
    pub fn service_switch(&mut self) {
        let port = self.kernel.port();
        if !port.started() || !port.take_switch_request() {
            return;
        }
        let psp = port.psp();
        let sp = self.kernel.switch_context(psp);
        self.kernel.port().set_psp(sp);
    }

    fn tick(&mut self) -> bool {
        self.steps = 0;
        self.kernel.tick();
        true
    }

    /// Run the current task for one step. Returns whether the tick advanced.
    pub fn step(&mut self) -> bool {
        self.service_switch();
        let Some(current) = self.kernel.current_task() else {
            return false;
        };

        let ticked = match self.kernel.task_kind(current) {
            Ok(TaskKind::Idle) => {
                self.kernel.idle_step();
                !self.kernel.port().switch_pending() && self.tick()
            }
            Ok(TaskKind::TimerService) => {
                self.kernel.run_timer_service();
                false
            }
            Ok(TaskKind::Application) => self.step_application(current),
            Err(err) => {
                log::error!("current task not found: {}", err);
                false
            }
        };

        self.service_switch();
        if !ticked {
            self.steps += 1;
            if self.steps >= STEPS_PER_TICK {
                return self.tick();
            }
        }
        ticked
    }

    fn step_application(&mut self, current: TaskId) -> bool {
        let slot = current.slot();
        let Some((id, mut body)) = self.bodies[slot].take().filter(|(id, _)| *id == current) else {
            // No body: the task just spins
            return self.tick();
        };

        let mut ctx = SimContext {
            kernel: &mut self.kernel,
            task: current,
            reports: &mut self.reports,
        };
        let outcome = body.step(&mut ctx);
        self.bodies[slot] = Some((id, body));

        match outcome {
            Step::Continue => false,
            Step::Busy => self.tick(),
            Step::Returned => self.kernel.task_returned(Some(current)),
        }
    }

    /// Step until `ticks` more ticks have elapsed.
    pub fn run_ticks(&mut self, ticks: u32) {
        let mut elapsed = 0;
        while elapsed < ticks {
            if self.step() {
                elapsed += 1;
            }
        }
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn kernel(&self) -> &Kernel<SimPort> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel<SimPort> {
        &mut self.kernel
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
