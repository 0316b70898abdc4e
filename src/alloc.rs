//! Arena allocation capability.
//!
//! A model asks its [`Allocator`] for exactly one block, the arena, when it
//! is constructed, and hands it back when it is dropped. Everything inside
//! the arena is managed by the model's own sub-allocator; no further heap
//! calls happen while coding.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Provides the arena block for a model.
pub trait Allocator: Send + Sync {
    /// Returns a zeroed block of exactly `size` bytes, or `None` if the
    /// request cannot be met.
    fn alloc(&self, size: usize) -> Option<Box<[u8]>>;

    /// Takes back a block obtained from [`alloc`](Allocator::alloc).
    /// `None` is a no-op.
    fn free(&self, block: Option<Box<[u8]>>) {
        drop(block);
    }
}

/// Allocates from the process heap without aborting on failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl Allocator for HeapAllocator {
    fn alloc(&self, size: usize) -> Option<Box<[u8]>> {
        let mut block = Vec::new();
        block.try_reserve_exact(size).ok()?;
        block.resize(size, 0);
        Some(block.into_boxed_slice())
    }
}

/// Heap allocator that refuses to hand out more than a fixed number of bytes
/// in total.
pub struct BudgetAllocator {
    budget: usize,
    in_use: AtomicUsize,
}

impl BudgetAllocator {
    /// Creates an allocator limited to `budget` bytes.
    pub const fn new(budget: usize) -> Self {
        Self {
            budget,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

impl fmt::Debug for BudgetAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetAllocator")
            .field("budget", &self.budget)
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl Allocator for BudgetAllocator {
    fn alloc(&self, size: usize) -> Option<Box<[u8]>> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&total| total <= self.budget)
            })
            .ok()?;
        let block = HeapAllocator.alloc(size);
        if block.is_none() {
            self.in_use.fetch_sub(size, Ordering::AcqRel);
        }
        block
    }

    fn free(&self, block: Option<Box<[u8]>>) {
        if let Some(block) = block {
            self.in_use.fetch_sub(block.len(), Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocator_zeroed() {
        let block = HeapAllocator.alloc(4096).unwrap();
        assert_eq!(block.len(), 4096);
        assert!(block.iter().all(|&b| b == 0));
        HeapAllocator.free(Some(block));
        HeapAllocator.free(None);
    }

    #[test]
    fn test_budget_allocator() {
        let alloc = BudgetAllocator::new(10_000);
        let a = alloc.alloc(6_000).unwrap();
        assert!(alloc.alloc(6_000).is_none());
        assert_eq!(alloc.in_use(), 6_000);
        alloc.free(Some(a));
        assert_eq!(alloc.in_use(), 0);
        assert!(alloc.alloc(10_000).is_some());
    }
}
