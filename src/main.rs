//! # PriOS Demo Firmware
//!
//! Three tasks print their priority, sleep, then move themselves to a new
//! priority; see [`prios::demo`] for the schedule. Expected output on the
//! MPS2 AN385 UART:
//!
//! ```text
//! [INFO] Task 3 is running with priority 3
//! [INFO] Task 2 is running with priority 2
//! [INFO] Task 1 is running with priority 1
//! [INFO] Task 3 is running with priority 7
//! [INFO] Task 3 is running with priority 6
//! [INFO] Task 2 is running with priority 6
//! [INFO] Task 1 is running with priority 2
//! ...
//! ```
//!
//! Run with:
//!
//! ```text
//! qemu-system-arm -machine mps2-an385 -cpu cortex-m4 -nographic \
//!     -serial stdio -kernel target/thumbv7em-none-eabi/release/prios
//! ```
//!
//! Built for a host target, the binary runs the same schedule on the
//! simulator, one tick standing for one second.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod firmware {
    use cortex_m_rt::entry;
    use log::LevelFilter;
    use panic_halt as _;

    use prios::arch::cmsdk_uart::{CmsdkUart, UART0_BASE};
    use prios::arch::cortex_m4::CortexM4;
    use prios::arch;
    use prios::config::{MINIMAL_STACK_WORDS, POOL_BLOCK_WORDS, TIMER_TASK_STACK_WORDS};
    use prios::console::{self, ConsoleLogger};
    use prios::demo::{DemoTask, DEMO_TASKS};
    use prios::rtos;
    use prios::stack::{Stack, StackWord};
    use prios::task::{TaskArg, TaskParams};
    use prios::time::ms_to_ticks;
    use prios::{Hooks, Kernel, StaticMemory};

    const DEMO_STACK_WORDS: usize = MINIMAL_STACK_WORDS * 2;

    // SAFETY: UART0 is always mapped on MPS2 AN385.
    static LOGGER: ConsoleLogger<CmsdkUart> =
        ConsoleLogger::new(unsafe { CmsdkUart::new(UART0_BASE) }, LevelFilter::Info);

    static POOL: Stack<{ POOL_BLOCK_WORDS * 16 }> = Stack::new();
    static IDLE_STACK: Stack<MINIMAL_STACK_WORDS> = Stack::new();
    static TIMER_STACK: Stack<TIMER_TASK_STACK_WORDS> = Stack::new();

    struct SystemStacks;

    impl StaticMemory for SystemStacks {
        fn idle_task_stack(&mut self) -> Option<&'static mut [StackWord]> {
            IDLE_STACK.take()
        }

        fn timer_task_stack(&mut self) -> Option<&'static mut [StackWord]> {
            TIMER_STACK.take()
        }
    }

    extern "C" fn demo_task(arg: TaskArg) -> ! {
        // SAFETY: created below with a pointer into `DEMO_TASKS`.
        let demo = unsafe { &*(arg as *const DemoTask) };

        for i in 0..demo.iterations {
            let priority = rtos::priority(None).unwrap_or(0);
            rtos::critical_section(|| log::info!("{} with priority {}", demo.message, priority));

            rtos::delay(ms_to_ticks(demo.delay_ms));

            if let Err(err) = rtos::set_priority(None, demo.priority_after(i)) {
                log::warn!("{}: {}", demo.name, err);
            }
        }

        rtos::delete_self()
    }

    #[entry]
    fn main() -> ! {
        LOGGER.sink().init();
        console::init(&LOGGER);

        let Some(cp) = cortex_m::Peripherals::take() else {
            arch::halt()
        };
        let Some(pool) = POOL.take() else {
            arch::halt()
        };
        let Some(kernel) = cortex_m::singleton!(
            : Kernel<CortexM4> = Kernel::new(CortexM4::new(cp.SYST), Hooks::new(), pool)
        ) else {
            arch::halt()
        };
        rtos::install(kernel);

        for demo in DEMO_TASKS.iter() {
            let params = TaskParams::new(demo.name, demo_task, demo.priority)
                .with_argument(demo as *const DemoTask as TaskArg)
                .with_stack_words(DEMO_STACK_WORDS);
            if let Err(err) = rtos::create_task(params) {
                log::error!("failed to create {}: {}", demo.name, err);
                arch::halt();
            }
        }

        let err = rtos::start(&mut SystemStacks);
        log::error!("scheduler failed to start: {}", err);
        arch::halt()
    }
}

#[cfg(not(target_os = "none"))]
fn main() -> Result<(), prios::KernelError> {
    use std::io::Write;

    use log::LevelFilter;
    use prios::console::{self, ByteSink, ConsoleLogger};
    use prios::demo::DEMO_TASKS;
    use prios::sim::{ScriptedTask, Simulator};

    /// Milliseconds of demo time per simulated tick.
    const MS_PER_TICK: u32 = 1000;
    const RUN_TICKS: u32 = 12;

    struct Stdout;

    impl ByteSink for Stdout {
        fn write_bytes(&self, bytes: &[u8]) -> usize {
            std::io::stdout().write_all(bytes).map_or(0, |()| bytes.len())
        }
    }

    static LOGGER: ConsoleLogger<Stdout> = ConsoleLogger::new(Stdout, LevelFilter::Info);
    console::init(&LOGGER);

    let mut sim = Simulator::new();
    for demo in DEMO_TASKS.iter() {
        sim.spawn(demo.name, demo.priority, ScriptedTask::from_demo(demo, MS_PER_TICK))?;
    }
    sim.start()?;
    sim.run_ticks(RUN_TICKS);

    log::info!(
        "demo finished at tick {}: {} reports, {} tasks left",
        sim.kernel().tick_count(),
        sim.reports().len(),
        sim.kernel().number_of_tasks()
    );
    Ok(())
}
