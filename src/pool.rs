//! # Stack Pool
//!
//! The only dynamic memory in the kernel. A caller-supplied `'static` region
//! is cut into `POOL_BLOCK_WORDS` blocks tracked in a bitmap; task stacks are
//! served first-fit from contiguous runs of free blocks and returned when the
//! idle task reclaims a deleted task.

use core::ptr::NonNull;

use crate::config::{MAX_POOL_BLOCKS, POOL_BLOCK_WORDS};
use crate::stack::{StackOrigin, StackRegion, StackWord};

pub struct StackPool {
    base: NonNull<StackWord>,
    blocks: usize,
    /// Bit `i` set means block `i` is allocated.
    used: u64,
    free_words: usize,
    minimum_ever_free: usize,
}

impl StackPool {
    /// Build a pool over `memory`. Words beyond `MAX_POOL_BLOCKS` whole
    /// blocks are left unused.
    pub fn new(memory: &'static mut [StackWord]) -> Self {
        let blocks = (memory.len() / POOL_BLOCK_WORDS).min(MAX_POOL_BLOCKS);
        let free_words = blocks * POOL_BLOCK_WORDS;
        Self {
            base: NonNull::from(memory).cast(),
            blocks,
            used: 0,
            free_words,
            minimum_ever_free: free_words,
        }
    }

    /// A pool with no memory. Every allocation fails.
    pub const fn empty() -> Self {
        Self {
            base: NonNull::dangling(),
            blocks: 0,
            used: 0,
            free_words: 0,
            minimum_ever_free: 0,
        }
    }

    #[inline]
    pub fn capacity_words(&self) -> usize {
        self.blocks * POOL_BLOCK_WORDS
    }

    #[inline]
    pub fn free_words(&self) -> usize {
        self.free_words
    }

    /// Lowest `free_words` seen since the pool was built.
    #[inline]
    pub fn minimum_ever_free_words(&self) -> usize {
        self.minimum_ever_free
    }

    fn run_mask(first: usize, count: usize) -> u64 {
        let run = if count >= 64 { u64::MAX } else { (1u64 << count) - 1 };
        run << first
    }

    /// Allocate a stack of `words` words from the first free run that fits.
    pub fn alloc(&mut self, words: usize) -> Option<StackRegion> {
        if words == 0 {
            return None;
        }
        let count = words.div_ceil(POOL_BLOCK_WORDS);
        if count > self.blocks {
            return None;
        }

        let first = (0..=self.blocks - count)
            .find(|&first| self.used & Self::run_mask(first, count) == 0)?;
        self.used |= Self::run_mask(first, count);
        self.free_words -= count * POOL_BLOCK_WORDS;
        self.minimum_ever_free = self.minimum_ever_free.min(self.free_words);

        // SAFETY: blocks `first..first + count` lie inside the region handed
        // to `new` and were free, so nothing else references them.
        let region = unsafe {
            let base = NonNull::new_unchecked(self.base.as_ptr().add(first * POOL_BLOCK_WORDS));
            StackRegion::from_raw(
                base,
                words,
                StackOrigin::Pool {
                    first_block: first,
                    blocks: count,
                },
            )
        };
        Some(region)
    }

    /// Return a stack to the pool. Regions that did not come from a pool are
    /// ignored.
    pub fn free(&mut self, region: StackRegion) {
        if let StackOrigin::Pool { first_block, blocks } = region.origin() {
            let mask = Self::run_mask(first_block, blocks);
            debug_assert_eq!(self.used & mask, mask);
            self.used &= !mask;
            self.free_words += blocks * POOL_BLOCK_WORDS;
        }
    }
}
