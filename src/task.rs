//! # Task Control Block
//!
//! Defines the task model for PriOS: handles, the lifecycle state machine,
//! creation parameters and the TCB the scheduler keeps for every task.

use core::fmt;

use crate::config::MINIMAL_STACK_WORDS;
use crate::list::{Link, Linked};
use crate::stack::{StackRegion, StackWord};

// ---------------------------------------------------------------------------
// Handles and entry points
// ---------------------------------------------------------------------------

/// Task priority. Higher numbers are more urgent.
pub type Priority = u8;

/// Opaque argument handed to a task's entry point.
pub type TaskArg = *mut ();

/// Task entry point. Tasks never return; they delete themselves instead.
pub type TaskEntry = extern "C" fn(TaskArg) -> !;

/// Opaque task handle.
///
/// `slot` indexes the TCB arena; `generation` is bumped each time the slot
/// is reclaimed, so a handle to a deleted task does not alias its successor
/// until the same slot has been reused 2^32 times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    slot: u16,
    generation: u32,
}

impl TaskId {
    pub(crate) const fn new(slot: usize, generation: u32) -> Self {
        Self {
            slot: slot as u16,
            generation,
        }
    }

    /// Arena slot of this task.
    #[inline]
    pub const fn slot(&self) -> usize {
        self.slot as usize
    }

    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:03}", self.slot)
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///   ┌──────────┐     selected        ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘                     └─────────┘
///     ▲  ▲  ▲     preempt / yield      │  │  │
///     │  │  └──────────────────────────┘  │  │
///     │  │   wake / abort   ┌─────────┐   │  │ delay()
///     │  └──────────────────│ Blocked │◄──┘  │
///     │      resume()       └─────────┘      │ suspend()
///     │                    ┌───────────┐     │
///     └────────────────────│ Suspended │◄────┘
///                          └───────────┘
///   any state ── delete() ──► Terminated ── idle task ──► slot free
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is ready to run and waiting in a ready list.
    Ready,
    /// Task is currently executing on the CPU.
    Running,
    /// Task is waiting for a tick deadline or an explicit wake.
    Blocked,
    /// Task is suspended (not schedulable, no wake condition).
    Suspended,
    /// Task has been deleted; its slot awaits reclamation.
    Terminated,
}

/// Distinguishes application tasks from the two system tasks the kernel
/// creates at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Application,
    Idle,
    TimerService,
}

// ---------------------------------------------------------------------------
// Creation parameters
// ---------------------------------------------------------------------------

/// Everything needed to create a task.
#[derive(Debug, Clone, Copy)]
pub struct TaskParams {
    /// Debug name. Never used for scheduling decisions.
    pub name: &'static str,
    pub entry: TaskEntry,
    pub argument: TaskArg,
    /// Initial priority. Values above `MAX_PRIORITIES - 1` are clamped.
    pub priority: Priority,
    /// Stack depth in words. Ignored for statically provided stacks.
    pub stack_words: usize,
}

impl TaskParams {
    /// Parameters with a null argument and a `MINIMAL_STACK_WORDS` stack.
    pub const fn new(name: &'static str, entry: TaskEntry, priority: Priority) -> Self {
        Self {
            name,
            entry,
            argument: core::ptr::null_mut(),
            priority,
            stack_words: MINIMAL_STACK_WORDS,
        }
    }

    pub const fn with_argument(mut self, argument: TaskArg) -> Self {
        self.argument = argument;
        self
    }

    pub const fn with_stack_words(mut self, words: usize) -> Self {
        self.stack_words = words;
        self
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB): scheduling metadata and saved context for one
/// task. TCBs live in a fixed arena inside the scheduler; list membership is
/// expressed through the embedded [`Link`].
pub struct TaskControlBlock {
    pub name: &'static str,

    /// Bumped on reclamation. Part of every [`TaskId`] handed out.
    pub generation: u32,

    /// Whether this slot holds a task (including a Terminated one not yet
    /// reclaimed).
    pub in_use: bool,

    pub kind: TaskKind,

    pub state: TaskState,

    /// Effective priority, possibly boosted by inheritance.
    pub priority: Priority,

    /// Priority assigned by the application; restored on disinherit.
    pub base_priority: Priority,

    /// Owned stack memory. `None` only for free slots.
    pub stack: Option<StackRegion>,

    /// Saved stack pointer. Updated on every switch-out.
    pub stack_pointer: *mut StackWord,

    pub link: Link,
}

impl TaskControlBlock {
    /// Create an empty (unallocated) TCB.
    pub const fn empty() -> Self {
        Self {
            name: "",
            generation: 0,
            in_use: false,
            kind: TaskKind::Application,
            state: TaskState::Suspended,
            priority: 0,
            base_priority: 0,
            stack: None,
            stack_pointer: core::ptr::null_mut(),
            link: Link::new(),
        }
    }

    /// Fill a free slot. The task is left detached from every list; the
    /// scheduler makes it Ready.
    pub fn init(
        &mut self,
        name: &'static str,
        priority: Priority,
        kind: TaskKind,
        stack: StackRegion,
        stack_pointer: *mut StackWord,
    ) {
        self.name = name;
        self.in_use = true;
        self.kind = kind;
        self.state = TaskState::Ready;
        self.priority = priority;
        self.base_priority = priority;
        self.stack = Some(stack);
        self.stack_pointer = stack_pointer;
        self.link = Link::new();
    }

    /// Return the slot to the free pool, invalidating outstanding handles.
    /// Hands back the stack so the owner can free it.
    pub fn release(&mut self) -> Option<StackRegion> {
        let stack = self.stack.take();
        let generation = self.generation.wrapping_add(1);
        *self = Self::empty();
        self.generation = generation;
        stack
    }

    /// Whether a live, not yet deleted task occupies this slot.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.in_use && self.state != TaskState::Terminated
    }

    /// Whether the effective priority is an inherited boost.
    #[inline]
    pub fn is_boosted(&self) -> bool {
        self.priority != self.base_priority
    }

    /// Minimum free stack observed so far, in words.
    pub fn high_water_mark(&self) -> usize {
        self.stack.as_ref().map_or(0, StackRegion::high_water_mark)
    }
}

impl Linked for TaskControlBlock {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::ListId;

    extern "C" fn never(_: TaskArg) -> ! {
        loop {}
    }

    fn region(words: usize) -> StackRegion {
        let mut region = StackRegion::from_static(Box::leak(vec![0; words].into_boxed_slice()));
        region.paint();
        region
    }

    #[test]
    fn test_tcb_initialization() {
        let mut tcb = TaskControlBlock::empty();
        assert!(!tcb.in_use);
        assert!(!tcb.is_live());

        let stack = region(64);
        let top = stack.top();
        tcb.init("worker", 3, TaskKind::Application, stack, top);

        assert!(tcb.is_live());
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.priority, 3);
        assert_eq!(tcb.base_priority, 3);
        assert!(!tcb.is_boosted());
        assert_eq!(tcb.high_water_mark(), 64);
        assert_eq!(tcb.link.container, None);
    }

    #[test]
    fn test_release_bumps_generation() {
        let mut tcb = TaskControlBlock::empty();
        let stack = region(32);
        let top = stack.top();
        tcb.init("short", 1, TaskKind::Application, stack, top);
        tcb.link.container = Some(ListId::Terminating);
        tcb.state = TaskState::Terminated;

        let stack = tcb.release();
        assert_eq!(stack.map(|s| s.words()), Some(32));
        assert_eq!(tcb.generation, 1);
        assert!(!tcb.in_use);
        assert_eq!(tcb.link.container, None);
        assert!(tcb.stack.is_none());
    }

    #[test]
    fn test_generation_survives_many_reuses() {
        let mut tcb = TaskControlBlock::empty();
        tcb.generation = u16::MAX as u32;
        let stack = region(32);
        let top = stack.top();
        tcb.init("busy slot", 1, TaskKind::Application, stack, top);
        let stale = TaskId::new(5, tcb.generation);

        tcb.state = TaskState::Terminated;
        tcb.release();
        assert_eq!(tcb.generation, u16::MAX as u32 + 1);
        assert_ne!(TaskId::new(5, tcb.generation), stale);
        assert_ne!(TaskId::new(5, tcb.generation), TaskId::new(5, 0));
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(format!("{}", TaskId::new(3, 9)), "T003");
        assert_eq!(TaskId::new(3, 9).slot(), 3);
        assert_ne!(TaskId::new(3, 9), TaskId::new(3, 10));
    }

    #[test]
    fn test_params_builder() {
        let mut value = 7u32;
        let params = TaskParams::new("p", never, 2)
            .with_argument(&mut value as *mut u32 as TaskArg)
            .with_stack_words(256);
        assert_eq!(params.stack_words, 256);
        assert_eq!(params.priority, 2);
        assert!(!params.argument.is_null());
        assert_eq!(TaskParams::new("q", never, 1).stack_words, MINIMAL_STACK_WORDS);
    }
}
