//! # Task Stacks
//!
//! Statically declared stacks, the [`StackRegion`] view the kernel keeps in
//! each TCB, and the helpers for building an initial context frame and
//! checking a stack for overflow.

use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{STACK_FILL_WORD, STACK_GUARD_WORDS};

/// One stack slot. Stack sizes are always given in words.
pub type StackWord = u32;

/// A task stack of `WORDS` words, suitable for a `static`.
///
/// We align stacks on 8-byte boundaries, as required by AAPCS.
#[repr(align(8))]
pub struct Stack<const WORDS: usize> {
    /// The memory reserved for the task stack
    contents: UnsafeCell<[StackWord; WORDS]>,
    /// Set once the memory has been handed out
    taken: AtomicBool,
}

impl<const WORDS: usize> Stack<WORDS> {
    /// Create a new stack
    pub const fn new() -> Self {
        Self {
            contents: UnsafeCell::new([0; WORDS]),
            taken: AtomicBool::new(false),
        }
    }

    /// Hand out the stack memory. Returns `None` on every call after the
    /// first, so the memory can only ever have one owner.
    pub fn take(&'static self) -> Option<&'static mut [StackWord]> {
        if self.taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        // SAFETY: the swap above guarantees this is the only reference ever
        // created to the contents.
        Some(unsafe { &mut *self.contents.get() })
    }
}

/// SAFETY: the contents are only reachable through `take`, which hands out
/// a single exclusive reference.
unsafe impl<const WORDS: usize> Sync for Stack<WORDS> {}

impl<const WORDS: usize> Default for Stack<WORDS> {
    fn default() -> Self {
        Stack::new()
    }
}

/// Where a task's stack memory came from, and therefore who frees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOrigin {
    /// Supplied by the application; never freed.
    Static,
    /// Carved out of the kernel's stack pool.
    Pool { first_block: usize, blocks: usize },
}

/// A task's stack memory: `words` words growing down from `top()` towards
/// `base`.
#[derive(Debug)]
pub struct StackRegion {
    base: NonNull<StackWord>,
    words: usize,
    origin: StackOrigin,
}

impl StackRegion {
    /// Take ownership of application-provided stack memory.
    pub fn from_static(memory: &'static mut [StackWord]) -> Self {
        let words = memory.len();
        Self {
            base: NonNull::from(memory).cast(),
            words,
            origin: StackOrigin::Static,
        }
    }

    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `words` words for as long
    /// as the region exists, and no other reference to that memory may be
    /// used in the meantime.
    pub(crate) unsafe fn from_raw(
        base: NonNull<StackWord>,
        words: usize,
        origin: StackOrigin,
    ) -> Self {
        Self { base, words, origin }
    }

    #[inline]
    pub fn words(&self) -> usize {
        self.words
    }

    #[inline]
    pub fn origin(&self) -> StackOrigin {
        self.origin
    }

    /// Lowest address of the region.
    #[inline]
    pub fn base(&self) -> *mut StackWord {
        self.base.as_ptr()
    }

    /// One past the highest word. Full-descending stacks start here.
    #[inline]
    pub fn top(&self) -> *mut StackWord {
        // SAFETY: one-past-the-end of the region is a valid pointer value.
        unsafe { self.base.as_ptr().add(self.words) }
    }

    /// Fill the whole region with `STACK_FILL_WORD`.
    pub fn paint(&mut self) {
        for i in 0..self.words {
            // SAFETY: `i < words`, inside the region.
            unsafe { self.base.as_ptr().add(i).write_volatile(STACK_FILL_WORD) };
        }
    }

    fn word(&self, i: usize) -> StackWord {
        // SAFETY: callers only pass `i < words`.
        unsafe { self.base.as_ptr().add(i).read_volatile() }
    }

    /// Whether the guard band at the low end still holds the fill pattern.
    pub fn guard_intact(&self) -> bool {
        (0..STACK_GUARD_WORDS.min(self.words)).all(|i| self.word(i) == STACK_FILL_WORD)
    }

    /// Whether a saved stack pointer lies below the region.
    pub fn pointer_out_of_bounds(&self, sp: *const StackWord) -> bool {
        let sp = sp as usize;
        sp != 0 && (sp < self.base() as usize || sp > self.top() as usize)
    }

    /// Both overflow checks: saved pointer past the bound, or guard band
    /// overwritten.
    pub fn overflowed(&self, sp: *const StackWord) -> bool {
        self.pointer_out_of_bounds(sp) || !self.guard_intact()
    }

    /// Number of words, counted from the base, that have never been written
    /// since the region was painted.
    pub fn high_water_mark(&self) -> usize {
        (0..self.words).take_while(|&i| self.word(i) == STACK_FILL_WORD).count()
    }
}

/// A helper for pushing things into a full-descending stack
pub struct StackPusher(*mut StackWord);

impl StackPusher {
    /// Make a new full-descending stack from the given pointer
    ///
    /// It will not write to the given pointer, but it will write immediately
    /// below it - because this is a Full Descending stack.
    ///
    /// # Safety
    ///
    /// There must be enough free space below the given pointer to accept all
    /// the items you are going to push.
    pub unsafe fn new(stack_top: *mut StackWord) -> StackPusher {
        StackPusher(stack_top)
    }

    /// Push something onto the stack, decrementing the pointer
    pub fn push(&mut self, value: StackWord) {
        // SAFETY: guaranteed by the contract of `new`.
        unsafe {
            self.0 = self.0.offset(-1);
            self.0.write_volatile(value);
        }
    }

    /// Get the current stack value
    pub fn current(&self) -> *mut StackWord {
        self.0
    }
}

/// Thumb bit. The only bit we need set in xPSR when a task starts.
pub const INITIAL_XPSR: StackWord = 1 << 24;

/// Build the initial context frame a task is first switched in from.
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (return trampoline)
///   R12, R3, R2, R1
///   R0    (task argument)
/// [Software saved context]
///   R11 .. R4                 <- returned stack pointer
/// ```
///
/// # Safety
///
/// `region` must have room for sixteen words.
pub unsafe fn push_initial_frame(
    region: &StackRegion,
    entry: StackWord,
    argument: StackWord,
    exit: StackWord,
) -> *mut StackWord {
    // Align to 8 bytes (AAPCS requirement)
    let top = (region.top() as usize & !0x07) as *mut StackWord;
    // SAFETY: forwarded to the caller.
    let mut pusher = unsafe { StackPusher::new(top) };

    pusher.push(INITIAL_XPSR);
    pusher.push(entry);
    pusher.push(exit);
    // R12, R3, R2, R1
    for _ in 0..4 {
        pusher.push(0);
    }
    pusher.push(argument);
    // R11 - R4
    for _ in 0..8 {
        pusher.push(0);
    }
    pusher.current()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaked(words: usize) -> StackRegion {
        StackRegion::from_static(Box::leak(vec![0; words].into_boxed_slice()))
    }

    #[test]
    fn test_static_stack_taken_once() {
        static STACK: Stack<32> = Stack::new();
        let first = STACK.take();
        assert!(first.is_some());
        assert_eq!(first.map(|s| s.len()), Some(32));
        assert!(STACK.take().is_none());
    }

    #[test]
    fn test_paint_and_high_water_mark() {
        let mut region = leaked(64);
        region.paint();
        assert_eq!(region.high_water_mark(), 64);
        assert!(region.guard_intact());

        let sp = unsafe { push_initial_frame(&region, 0x0800_0101, 0x2000_0000, 0x0800_0201) };
        assert_eq!(region.top() as usize - sp as usize, 16 * 4);
        assert_eq!(region.high_water_mark(), 48);
        assert!(!region.overflowed(sp));
    }

    #[test]
    fn test_initial_frame_layout() {
        let mut region = leaked(32);
        region.paint();
        let sp = unsafe { push_initial_frame(&region, 0xAAAA, 0xBBBB, 0xCCCC) };
        let frame = unsafe { core::slice::from_raw_parts(sp, 16) };
        // R4-R11
        assert!(frame[..8].iter().all(|&w| w == 0));
        assert_eq!(frame[8], 0xBBBB); // R0
        assert_eq!(frame[13], 0xCCCC); // LR
        assert_eq!(frame[14], 0xAAAA); // PC
        assert_eq!(frame[15], INITIAL_XPSR);
    }

    #[test]
    fn test_overflow_detection() {
        let mut region = leaked(32);
        region.paint();
        let below = region.base().wrapping_sub(1);
        assert!(region.pointer_out_of_bounds(below));
        assert!(region.overflowed(below));
        assert!(!region.overflowed(core::ptr::null()));

        // Scribble on the guard band
        unsafe { region.base().add(1).write(0) };
        assert!(!region.guard_intact());
        assert!(region.overflowed(region.top()));
    }

    #[test]
    fn test_pusher() {
        let region = leaked(4);
        let mut pusher = unsafe { StackPusher::new(region.top()) };
        pusher.push(7);
        pusher.push(9);
        assert_eq!(region.top() as usize - pusher.current() as usize, 8);
        assert_eq!(unsafe { *pusher.current() }, 9);
    }
}
