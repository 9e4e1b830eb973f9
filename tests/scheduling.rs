//! End-to-end scheduling behaviour through the simulator.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use prios::arch::sim::{unreachable_entry, SimPort};
use prios::config::{MAX_TASKS, POOL_BLOCK_WORDS};
use prios::error::{ConfigError, Resource};
use prios::sim::{
    leak_stack, panicking_hooks, Action, ScriptedTask, SimContext, SimMemory, Simulator, Step,
};
use prios::timers::TimerId;
use prios::{Hooks, Kernel, KernelError, StaticMemory, TaskParams, TaskState, MAX_DELAY};

fn reporter(message: &'static str) -> impl FnMut(&mut SimContext<'_>) -> Step {
    move |ctx: &mut SimContext<'_>| {
        ctx.report(message);
        Step::Busy
    }
}

fn trace(sim: &Simulator) -> Vec<(u32, &'static str)> {
    sim.reports().iter().map(|r| (r.tick, r.message)).collect()
}

fn kernel_with_pool(words: usize, hooks: Hooks) -> Kernel<SimPort> {
    Kernel::new(SimPort::new(), hooks, leak_stack(words))
}

// ---------------------------------------------------------------------------
// Priorities
// ---------------------------------------------------------------------------

#[test]
fn test_woken_high_priority_task_preempts() {
    let mut sim = Simulator::new();
    sim.spawn("low", 1, reporter("low")).unwrap();
    sim.spawn(
        "high",
        2,
        ScriptedTask::new([
            Action::Report("high"),
            Action::Delay(3),
            Action::Report("high"),
            Action::DeleteSelf,
        ]),
    )
    .unwrap();
    sim.start().unwrap();
    sim.run_ticks(4);

    assert_eq!(
        trace(&sim),
        [
            (0, "high"),
            (0, "low"),
            (1, "low"),
            (2, "low"),
            (3, "high"),
            (3, "low"),
        ]
    );
}

#[test]
fn test_priority_changes() {
    let mut sim = Simulator::new();
    sim.spawn(
        "a",
        3,
        ScriptedTask::new([
            Action::SetOwnPriority(5),
            Action::Report("a"),
            // Below the ready task b: switches immediately
            Action::SetOwnPriority(1),
            Action::Report("a"),
            Action::DeleteSelf,
        ]),
    )
    .unwrap();
    sim.spawn("b", 2, ScriptedTask::new([Action::Report("b"), Action::DeleteSelf]))
        .unwrap();
    sim.start().unwrap();
    sim.run_ticks(1);

    let seen: Vec<(&str, u8)> = sim.reports().iter().map(|r| (r.message, r.priority)).collect();
    assert_eq!(seen, [("a", 5), ("b", 2), ("a", 1)]);
    assert!(sim.reports().iter().all(|r| r.tick == 0));
}

#[test]
fn test_priority_inheritance() {
    let mut sim = Simulator::new();
    let holder = sim.spawn("holder", 1, reporter("holder")).unwrap();
    sim.start().unwrap();
    let kernel = sim.kernel_mut();

    kernel.inherit_priority(holder, 4).unwrap();
    assert_eq!(kernel.priority(Some(holder)), Ok(4));
    assert_eq!(kernel.base_priority(Some(holder)), Ok(1));

    // Below the boost: only the base moves
    kernel.set_priority(Some(holder), 2).unwrap();
    assert_eq!(kernel.priority(Some(holder)), Ok(4));
    kernel.disinherit_priority(holder).unwrap();
    assert_eq!(kernel.priority(Some(holder)), Ok(2));

    kernel.set_priority(Some(holder), 200).unwrap();
    assert_eq!(kernel.priority(Some(holder)), Ok(7));
}

// ---------------------------------------------------------------------------
// Round robin
// ---------------------------------------------------------------------------

#[test]
fn test_equal_priorities_share_ticks() {
    let mut sim = Simulator::new();
    sim.spawn("a", 2, reporter("a")).unwrap();
    sim.spawn("b", 2, reporter("b")).unwrap();
    sim.spawn("c", 2, reporter("c")).unwrap();
    sim.start().unwrap();
    sim.run_ticks(6);

    assert_eq!(
        trace(&sim),
        [(0, "a"), (1, "b"), (2, "c"), (3, "a"), (4, "b"), (5, "c")]
    );
}

#[test]
fn test_yield_passes_to_next_equal_task() {
    let mut sim = Simulator::new();
    for (name, first, second) in [("a", "a1", "a2"), ("b", "b1", "b2")] {
        let script = [
            Action::Report(first),
            Action::Yield,
            Action::Report(second),
            Action::DeleteSelf,
        ];
        sim.spawn(name, 1, ScriptedTask::new(script)).unwrap();
    }
    sim.start().unwrap();
    sim.run_ticks(1);

    assert_eq!(trace(&sim), [(0, "a1"), (0, "b1"), (0, "a2"), (0, "b2")]);
}

#[test]
fn test_round_robin_survives_preemption_every_tick() {
    let mut sim = Simulator::new();
    sim.spawn("a", 1, reporter("a")).unwrap();
    sim.spawn("b", 1, reporter("b")).unwrap();
    let mut wakeups = Vec::new();
    for _ in 0..40 {
        wakeups.extend([Action::Report("h"), Action::Delay(1)]);
    }
    sim.spawn("h", 2, ScriptedTask::new(wakeups)).unwrap();
    sim.start().unwrap();

    sim.run_ticks(4);
    assert_eq!(
        trace(&sim),
        [
            (0, "h"),
            (0, "a"),
            (1, "h"),
            (1, "b"),
            (2, "h"),
            (2, "a"),
            (3, "h"),
            (3, "b"),
        ]
    );

    sim.run_ticks(16);
    let equals: Vec<&str> = sim
        .reports()
        .iter()
        .map(|r| r.message)
        .filter(|&m| m != "h")
        .collect();
    assert_eq!(equals.len(), 20);
    assert!(equals.chunks(2).all(|pair| pair == ["a", "b"]));
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

#[test]
fn test_delay_wakes_on_the_exact_tick() {
    let mut sim = Simulator::new();
    let id = sim
        .spawn(
            "sleeper",
            1,
            ScriptedTask::new([
                Action::Report("before"),
                Action::Delay(5),
                Action::Report("after"),
                Action::DeleteSelf,
            ]),
        )
        .unwrap();
    sim.start().unwrap();

    sim.run_ticks(4);
    assert_eq!(sim.kernel().task_state(id), Ok(TaskState::Blocked));
    sim.run_ticks(2);
    assert_eq!(trace(&sim), [(0, "before"), (5, "after")]);
}

#[test]
fn test_delay_until_keeps_period() {
    let mut sim = Simulator::new();
    let mut last_wake = 0;
    sim.spawn("periodic", 1, move |ctx: &mut SimContext<'_>| {
        ctx.report("tick");
        ctx.kernel.delay_until(&mut last_wake, 3);
        Step::Continue
    })
    .unwrap();
    sim.start().unwrap();
    sim.run_ticks(10);

    let ticks: Vec<u32> = sim.reports().iter().map(|r| r.tick).collect();
    assert_eq!(ticks, [0, 3, 6, 9]);
}

#[test]
fn test_wake_order_across_tick_wraparound() {
    let kernel =
        kernel_with_pool(POOL_BLOCK_WORDS * 16, panicking_hooks()).starting_at_tick(u32::MAX - 2);
    let mut sim = Simulator::with_kernel(kernel);
    let sleeper = |ticks, message| {
        ScriptedTask::new([Action::Delay(ticks), Action::Report(message), Action::DeleteSelf])
    };
    sim.spawn("late", 1, sleeper(5, "late")).unwrap();
    sim.spawn("early", 2, sleeper(1, "early")).unwrap();
    sim.spawn("wrapped", 3, sleeper(3, "wrapped")).unwrap();
    sim.start().unwrap();
    sim.run_ticks(6);

    assert_eq!(trace(&sim), [(u32::MAX - 1, "early"), (0, "wrapped"), (2, "late")]);
}

#[test]
fn test_abort_delay() {
    let mut sim = Simulator::new();
    let waiter = sim
        .spawn(
            "waiter",
            2,
            ScriptedTask::new([
                Action::Delay(MAX_DELAY),
                Action::Report("woken"),
                Action::Delay(MAX_DELAY),
            ]),
        )
        .unwrap();
    sim.start().unwrap();
    sim.run_ticks(3);
    assert!(sim.reports().is_empty());

    assert_eq!(sim.kernel_mut().abort_delay(waiter), Ok(true));
    sim.step();
    assert_eq!(trace(&sim), [(3, "woken")]);

    sim.kernel_mut().resume(waiter).unwrap();
    sim.step();
    assert_eq!(sim.kernel().task_state(waiter), Ok(TaskState::Blocked));
    let idle = sim.kernel().idle_task().unwrap();
    assert_eq!(sim.kernel_mut().abort_delay(idle), Ok(false));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_deleted_task_is_reclaimed_by_idle() {
    let mut sim = Simulator::new();
    let victim = sim
        .spawn("victim", 1, ScriptedTask::new([Action::Delay(MAX_DELAY)]))
        .unwrap();
    sim.start().unwrap();
    sim.run_ticks(1);
    let free_before = sim.kernel().pool_free_words();

    sim.kernel_mut().delete(Some(victim)).unwrap();
    assert_eq!(sim.kernel().task_state(victim), Ok(TaskState::Terminated));
    assert_eq!(sim.kernel().number_of_tasks(), 3);

    sim.run_ticks(1);
    assert_eq!(sim.kernel().task_state(victim), Err(KernelError::InvalidTask));
    assert_eq!(sim.kernel_mut().resume(victim), Err(KernelError::InvalidTask));
    assert_eq!(sim.kernel().number_of_tasks(), 2);
    assert_eq!(sim.kernel().pool_free_words(), free_before + 128);

    // The slot comes back with a new generation
    let successor = sim.spawn("successor", 1, reporter("successor")).unwrap();
    assert_eq!(successor.slot(), victim.slot());
    assert_ne!(successor, victim);
}

#[test]
fn test_suspend_and_resume() {
    let mut sim = Simulator::new();
    let task = sim.spawn("worker", 2, reporter("worker")).unwrap();
    sim.start().unwrap();
    sim.run_ticks(2);

    sim.kernel_mut().suspend(Some(task)).unwrap();
    sim.run_ticks(3);
    assert_eq!(sim.kernel().task_state(task), Ok(TaskState::Suspended));

    sim.kernel_mut().resume(task).unwrap();
    sim.run_ticks(1);
    let ticks: Vec<u32> = sim.reports().iter().map(|r| r.tick).collect();
    assert_eq!(ticks, [0, 1, 5]);
}

#[test]
fn test_system_tasks_are_protected() {
    let mut sim = Simulator::new();
    sim.start().unwrap();
    let kernel = sim.kernel_mut();
    let idle = kernel.idle_task().unwrap();
    let timer = kernel.timer_task().unwrap();

    assert_eq!(kernel.delete(Some(idle)), Err(KernelError::SystemTask));
    assert_eq!(kernel.suspend(Some(timer)), Err(KernelError::SystemTask));
    assert_eq!(kernel.task_name(Some(idle)), Ok("IDLE"));
    assert_eq!(kernel.task_name(Some(timer)), Ok("Tmr Svc"));
    assert_eq!(kernel.priority(Some(timer)), Ok(7));
}

#[test]
fn test_scheduler_lock_defers_ticks_and_switches() {
    let mut sim = Simulator::new();
    sim.spawn("low", 1, reporter("low")).unwrap();
    sim.spawn(
        "high",
        2,
        ScriptedTask::new([Action::Delay(2), Action::Report("high"), Action::DeleteSelf]),
    )
    .unwrap();
    sim.start().unwrap();
    sim.run_ticks(1);

    sim.kernel_mut().suspend_all();
    sim.run_ticks(2);
    assert_eq!(sim.kernel().tick_count(), 1);
    assert!(sim.reports().iter().all(|r| r.message == "low"));

    assert!(sim.kernel_mut().resume_all());
    assert_eq!(sim.kernel().tick_count(), 3);
    sim.step();
    assert_eq!(sim.reports().last().map(|r| (r.tick, r.message)), Some((3, "high")));
}

// ---------------------------------------------------------------------------
// Start-up and creation errors
// ---------------------------------------------------------------------------

#[test]
fn test_start_configuration_errors() {
    let mut sim = Simulator::new();
    let missing_idle = &mut SimMemory::with_stacks(None, Some(leak_stack(256)));
    assert_eq!(
        sim.start_with(missing_idle),
        Err(KernelError::Configuration(ConfigError::MissingIdleStack))
    );
    let missing_timer = &mut SimMemory::with_stacks(Some(leak_stack(128)), None);
    assert_eq!(
        sim.start_with(missing_timer),
        Err(KernelError::Configuration(ConfigError::MissingTimerStack))
    );
    let tiny = &mut SimMemory::with_stacks(Some(leak_stack(8)), Some(leak_stack(256)));
    assert_eq!(
        sim.start_with(tiny),
        Err(KernelError::Configuration(ConfigError::SystemStackTooSmall))
    );
    assert!(!sim.kernel().is_started());

    for _ in 0..MAX_TASKS - 1 {
        sim.spawn("filler", 1, reporter("filler")).unwrap();
    }
    let memory = &mut SimMemory::new();
    assert_eq!(
        sim.start_with(memory),
        Err(KernelError::Configuration(ConfigError::NoSlotForSystemTask))
    );
    // The provider's take-once stacks are still there for a retry
    assert!(memory.idle_task_stack().is_some());
    assert!(memory.timer_task_stack().is_some());
}

#[test]
fn test_start_twice() {
    let mut sim = Simulator::new();
    sim.start().unwrap();
    assert_eq!(sim.start(), Err(KernelError::AlreadyStarted));
}

static ALLOCATION_FAILURES: AtomicUsize = AtomicUsize::new(0);

fn count_allocation_failure(_words: usize) {
    ALLOCATION_FAILURES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_creation_errors() {
    let hooks = Hooks {
        allocation_failed: count_allocation_failure,
        ..panicking_hooks()
    };
    let mut kernel = kernel_with_pool(POOL_BLOCK_WORDS * 3, hooks);
    let params = TaskParams::new("t", unreachable_entry, 1);

    assert_eq!(
        kernel.create_task(params.with_stack_words(8)),
        Err(KernelError::InvalidStackSize)
    );
    kernel.create_task(params).unwrap();
    assert_eq!(
        kernel.create_task(params),
        Err(KernelError::ResourceExhausted(Resource::StackPool))
    );
    assert_eq!(ALLOCATION_FAILURES.load(Ordering::SeqCst), 1);
    assert_eq!(kernel.pool_free_words(), POOL_BLOCK_WORDS);

    for _ in 1..MAX_TASKS {
        kernel.create_static_task(params, leak_stack(64)).unwrap();
    }
    assert_eq!(
        kernel.create_static_task(params, leak_stack(64)),
        Err(KernelError::ResourceExhausted(Resource::TaskSlots))
    );
    assert_eq!(kernel.number_of_tasks(), MAX_TASKS);
}

#[test]
fn test_stack_high_water_mark() {
    let mut sim = Simulator::new();
    let id = sim.spawn("t", 1, reporter("t")).unwrap();
    let words = sim.kernel().stack_high_water_mark(Some(id)).unwrap();
    // Everything but the initial frame is untouched
    assert!((110..=112).contains(&words), "high water mark {words}");
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[test]
#[should_panic(expected = "assertion failed")]
fn test_returning_task_is_fatal() {
    let mut sim = Simulator::new();
    sim.spawn("short", 1, ScriptedTask::new([Action::Report("once")]))
        .unwrap();
    sim.start().unwrap();
    sim.run_ticks(1);
}

#[test]
#[should_panic(expected = "assertion failed")]
fn test_delay_while_locked_is_fatal() {
    let mut sim = Simulator::new();
    sim.spawn("sleeper", 1, ScriptedTask::new([Action::Delay(1)]))
        .unwrap();
    sim.start().unwrap();
    // The timer task runs first and blocks
    sim.step();
    sim.kernel_mut().suspend_all();
    sim.step();
}

#[test]
#[should_panic(expected = "stack overflow in smasher")]
fn test_guard_band_overwrite_is_detected() {
    let mut sim = Simulator::new();
    let id = sim.spawn("smasher", 1, reporter("smasher")).unwrap();
    sim.start().unwrap();
    sim.step();
    assert_eq!(sim.kernel().current_task(), Some(id));

    let base = sim.kernel().scheduler().tasks[id.slot()]
        .stack
        .as_ref()
        .map(|stack| stack.base())
        .unwrap();
    unsafe { base.write(0) };
    sim.kernel_mut().yield_now();
    sim.service_switch();
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

static PERIODIC_FIRED: AtomicU32 = AtomicU32::new(0);
static ONE_SHOT_FIRED: AtomicU32 = AtomicU32::new(0);
static DAEMON_STARTS: AtomicU32 = AtomicU32::new(0);

fn periodic(_: TimerId) {
    PERIODIC_FIRED.fetch_add(1, Ordering::SeqCst);
}

fn one_shot(_: TimerId) {
    ONE_SHOT_FIRED.fetch_add(1, Ordering::SeqCst);
}

fn daemon_started() {
    DAEMON_STARTS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_timer_callbacks_run_in_timer_task() {
    let hooks = Hooks {
        daemon_startup: daemon_started,
        ..panicking_hooks()
    };
    let mut sim = Simulator::with_hooks(hooks);
    sim.start().unwrap();
    sim.step();
    assert_eq!(DAEMON_STARTS.load(Ordering::SeqCst), 1);
    let timer_task = sim.kernel().timer_task().unwrap();
    assert_eq!(sim.kernel().task_state(timer_task), Ok(TaskState::Blocked));

    let kernel = sim.kernel_mut();
    let every_three = kernel.create_timer("every3", 3, true, periodic).unwrap();
    let once = kernel.create_timer("once", 4, false, one_shot).unwrap();
    assert_eq!(kernel.timer_is_active(every_three), Ok(false));
    assert_eq!(kernel.timer_name(once), Ok("once"));
    kernel.start_timer(every_three).unwrap();
    kernel.start_timer(once).unwrap();
    assert_eq!(
        kernel.create_timer("zero", 0, false, one_shot),
        Err(KernelError::InvalidTimerPeriod)
    );

    sim.run_ticks(10);
    assert_eq!(PERIODIC_FIRED.load(Ordering::SeqCst), 3);
    assert_eq!(ONE_SHOT_FIRED.load(Ordering::SeqCst), 1);

    let kernel = sim.kernel_mut();
    assert_eq!(kernel.timer_is_active(once), Ok(false));
    kernel.stop_timer(every_three).unwrap();
    kernel.delete_timer(once).unwrap();
    assert_eq!(kernel.start_timer(once), Err(KernelError::InvalidTimer));
    assert_eq!(kernel.timer_name(once), Err(KernelError::InvalidTimer));

    sim.run_ticks(6);
    assert_eq!(PERIODIC_FIRED.load(Ordering::SeqCst), 3);
    assert_eq!(DAEMON_STARTS.load(Ordering::SeqCst), 1);
}

static RESTARTED_FIRED: AtomicU32 = AtomicU32::new(0);

fn restarted(_: TimerId) {
    RESTARTED_FIRED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_timer_reset_and_period_change_restart_the_period() {
    let mut sim = Simulator::new();
    sim.start().unwrap();
    let timer = sim.kernel_mut().create_timer("restart", 5, true, restarted).unwrap();
    sim.kernel_mut().start_timer(timer).unwrap();

    // Would expire at 5; the reset at 3 moves that to 8
    sim.run_ticks(3);
    sim.kernel_mut().reset_timer(timer).unwrap();
    sim.run_ticks(4);
    assert_eq!(sim.kernel().tick_count(), 7);
    assert_eq!(RESTARTED_FIRED.load(Ordering::SeqCst), 0);

    // Period 2 from tick 7: fires at 9 and 11
    sim.kernel_mut().change_timer_period(timer, 2).unwrap();
    assert_eq!(
        sim.kernel_mut().change_timer_period(timer, 0),
        Err(KernelError::InvalidTimerPeriod)
    );
    // The timer task goes back to sleep until exactly the new expiry
    sim.step();
    let timer_task = sim.kernel().timer_task().unwrap();
    assert_eq!(sim.kernel().task_state(timer_task), Ok(TaskState::Blocked));
    assert_eq!(sim.kernel().scheduler().tasks[timer_task.slot()].link.value, 9);
    sim.run_ticks(5);
    assert_eq!(RESTARTED_FIRED.load(Ordering::SeqCst), 2);
    assert_eq!(sim.kernel().timer_is_active(timer), Ok(true));
}
