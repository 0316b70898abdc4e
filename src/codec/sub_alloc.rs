//! Sub-allocator for PPMd model memory.
//!
//! The arena is one byte block obtained from an [`Allocator`]. Every model
//! structure lives inside it and is referenced by a `u32` byte offset, with
//! `0` meaning null. The block is split in two:
//!
//! ```text
//! 0            text ──►      units_start   lo_unit ──►   ◄── hi_unit      size
//! ├──────────────────────────────┼─────────────┼──────────────┼─────────────┤
//! │ text area (raw symbol history)│ stats/units │  free gap    │  contexts   │
//! ```
//!
//! Units are 12 bytes. Blocks of 1..=128 units are served from 38 size-class
//! free lists; on a miss the allocator bumps `lo_unit`, then splits a larger
//! free block, glues adjacent free blocks, or finally takes units from the
//! top of the text area. A `None` from any allocation means the arena is
//! exhausted and the model must restart or restore itself.
//!
//! Free blocks use one of two node layouts. Variant H keeps a 16-bit stamp
//! and unit count and only materializes them while gluing; variant I keeps a
//! full 32-bit stamp/next/count node at all times and counts free blocks per
//! size class, which it needs to measure memory in use.

use std::sync::Arc;

use crate::alloc::Allocator;
use crate::error::{PpmdError, Result};

/// Size of one allocation unit in bytes.
pub(crate) const UNIT_SIZE: u32 = 12;

/// Size of one symbol state in bytes.
pub(crate) const STATE_SIZE: u32 = 6;

/// Number of free-list size classes.
pub(crate) const NUM_INDEXES: usize = 38;

/// Stamp of a variant I free node.
const EMPTY_NODE: u32 = 0xFFFF_FFFF;

/// Glue countdown after a variant H glue pass.
const GLUE_COUNT_H: u32 = 255;

/// Glue countdown after a variant I glue pass.
const GLUE_COUNT_I: u32 = 1 << 13;

const fn build_index2units() -> [u8; NUM_INDEXES] {
    let mut table = [0u8; NUM_INDEXES];
    let mut units = 0usize;
    let mut i = 0;
    while i < NUM_INDEXES {
        units += if i >= 12 { 4 } else { (i >> 2) + 1 };
        table[i] = units as u8;
        i += 1;
    }
    table
}

const fn build_units2index() -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut i = 0usize;
    let mut k = 0usize;
    while k < 128 {
        if (INDEX2UNITS[i] as usize) < k + 1 {
            i += 1;
        }
        table[k] = i as u8;
        k += 1;
    }
    table
}

/// Units per size class: 1, 2, 3, 4, 6, 8, ... 124, 128.
pub(crate) const INDEX2UNITS: [u8; NUM_INDEXES] = build_index2units();

/// Smallest size class holding `n + 1` units.
pub(crate) const UNITS2INDEX: [u8; 128] = build_units2index();

/// Units of size class `indx`.
#[inline(always)]
pub(crate) fn i2u(indx: usize) -> u32 {
    INDEX2UNITS[indx] as u32
}

/// Size class for `nu` units (`1..=128`).
#[inline(always)]
pub(crate) fn u2i(nu: u32) -> usize {
    UNITS2INDEX[nu as usize - 1] as usize
}

/// Byte size of `nu` units.
#[inline(always)]
pub(crate) const fn u2b(nu: u32) -> u32 {
    nu * UNIT_SIZE
}

/// Free-node layout used by the model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeLayout {
    /// Variant H (Ppmd7).
    H,
    /// Variant I (Ppmd8).
    I,
}

/// Snapshot of the arena boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaUsage {
    /// Arena capacity in bytes.
    pub size: u32,
    /// End of the text area (next history byte is written here).
    pub text: u32,
    /// Start of the unit area.
    pub units_start: u32,
    /// Low end of the never-used gap between the unit areas.
    pub lo_unit: u32,
    /// High end of the gap; contexts are carved downwards from here.
    pub hi_unit: u32,
}

impl ArenaUsage {
    /// Whether the boundaries are ordered and inside the arena.
    pub fn is_consistent(&self) -> bool {
        self.text <= self.units_start
            && self.units_start <= self.lo_unit
            && self.lo_unit <= self.hi_unit
            && self.hi_unit <= self.size
    }
}

/// Arena and its free lists.
pub(crate) struct SubAllocator {
    heap: Box<[u8]>,
    allocator: Arc<dyn Allocator>,
    layout: NodeLayout,
    size: u32,
    /// Next free byte of the text area.
    pub(crate) text: u32,
    /// Start of the unit area; moves down when units are taken from text.
    pub(crate) units_start: u32,
    pub(crate) lo_unit: u32,
    pub(crate) hi_unit: u32,
    glue_count: u32,
    free_list: [u32; NUM_INDEXES],
    /// Free blocks per size class (variant I).
    stamps: [u32; NUM_INDEXES],
}

impl SubAllocator {
    /// Obtains a `size` byte arena from `allocator`.
    pub(crate) fn new(layout: NodeLayout, size: u32, allocator: Arc<dyn Allocator>) -> Result<Self> {
        let heap = allocator
            .alloc(size as usize)
            .filter(|block| block.len() == size as usize)
            .ok_or(PpmdError::OutOfMemory {
                requested: size as usize,
            })?;
        let mut sa = Self {
            heap,
            allocator,
            layout,
            size,
            text: 0,
            units_start: 0,
            lo_unit: 0,
            hi_unit: 0,
            glue_count: 0,
            free_list: [0; NUM_INDEXES],
            stamps: [0; NUM_INDEXES],
        };
        sa.reset();
        Ok(sa)
    }

    /// Empties the arena. Every outstanding offset becomes invalid.
    pub(crate) fn reset(&mut self) {
        self.free_list = [0; NUM_INDEXES];
        self.stamps = [0; NUM_INDEXES];
        self.text = 0;
        self.hi_unit = self.size;
        self.units_start = self.hi_unit - self.size / 8 / UNIT_SIZE * 7 * UNIT_SIZE;
        self.lo_unit = self.units_start;
        self.glue_count = 0;
    }

    pub(crate) const fn size(&self) -> u32 {
        self.size
    }

    pub(crate) const fn usage(&self) -> ArenaUsage {
        ArenaUsage {
            size: self.size,
            text: self.text,
            units_start: self.units_start,
            lo_unit: self.lo_unit,
            hi_unit: self.hi_unit,
        }
    }

    pub(crate) fn set_glue_count(&mut self, count: u32) {
        self.glue_count = count;
    }

    // ── raw access ──────────────────────────────────────────────────────

    #[inline(always)]
    pub(crate) fn read_u8(&self, offset: u32) -> u8 {
        self.heap[offset as usize]
    }

    #[inline(always)]
    pub(crate) fn write_u8(&mut self, offset: u32, val: u8) {
        self.heap[offset as usize] = val;
    }

    #[inline(always)]
    pub(crate) fn read_u16(&self, offset: u32) -> u16 {
        let o = offset as usize;
        u16::from_le_bytes([self.heap[o], self.heap[o + 1]])
    }

    #[inline(always)]
    pub(crate) fn write_u16(&mut self, offset: u32, val: u16) {
        let o = offset as usize;
        self.heap[o..o + 2].copy_from_slice(&val.to_le_bytes());
    }

    #[inline(always)]
    pub(crate) fn read_u32(&self, offset: u32) -> u32 {
        let o = offset as usize;
        u32::from_le_bytes([
            self.heap[o],
            self.heap[o + 1],
            self.heap[o + 2],
            self.heap[o + 3],
        ])
    }

    #[inline(always)]
    pub(crate) fn write_u32(&mut self, offset: u32, val: u32) {
        let o = offset as usize;
        self.heap[o..o + 4].copy_from_slice(&val.to_le_bytes());
    }

    /// Copies `len` bytes from `src` to `dst`; the ranges may overlap.
    #[inline]
    pub(crate) fn copy_bytes(&mut self, dst: u32, src: u32, len: u32) {
        let s = src as usize;
        self.heap.copy_within(s..s + len as usize, dst as usize);
    }

    #[inline]
    pub(crate) fn copy_units(&mut self, dst: u32, src: u32, nu: u32) {
        self.copy_bytes(dst, src, u2b(nu));
    }

    /// Swaps two `len` byte records.
    pub(crate) fn swap_bytes(&mut self, a: u32, b: u32, len: u32) {
        for i in 0..len {
            self.heap.swap((a + i) as usize, (b + i) as usize);
        }
    }

    // ── model records ───────────────────────────────────────────────────
    //
    // State (6 bytes): symbol u8 @0, freq u8 @1, successor u32 @2.
    // Context (12 bytes): variant specific header @0..2, summ_freq u16 @2
    // or the inline one-state @2..8, stats u32 @4, suffix u32 @8.

    #[inline(always)]
    pub(crate) fn state_symbol(&self, s: u32) -> u8 {
        self.read_u8(s)
    }

    #[inline(always)]
    pub(crate) fn state_freq(&self, s: u32) -> u32 {
        u32::from(self.read_u8(s + 1))
    }

    /// Stores a frequency, truncated to a byte.
    #[inline(always)]
    pub(crate) fn set_state_freq(&mut self, s: u32, freq: u32) {
        self.write_u8(s + 1, freq as u8);
    }

    #[inline(always)]
    pub(crate) fn state_successor(&self, s: u32) -> u32 {
        self.read_u32(s + 2)
    }

    #[inline(always)]
    pub(crate) fn set_state_successor(&mut self, s: u32, successor: u32) {
        self.write_u32(s + 2, successor);
    }

    #[inline]
    pub(crate) fn write_state(&mut self, s: u32, symbol: u8, freq: u32, successor: u32) {
        self.write_u8(s, symbol);
        self.set_state_freq(s, freq);
        self.set_state_successor(s, successor);
    }

    #[inline]
    pub(crate) fn copy_state(&mut self, dst: u32, src: u32) {
        self.copy_bytes(dst, src, STATE_SIZE);
    }

    #[inline]
    pub(crate) fn swap_states(&mut self, a: u32, b: u32) {
        self.swap_bytes(a, b, STATE_SIZE);
    }

    /// Finds the state for `symbol` in a stats array. The caller guarantees
    /// it is present.
    #[inline]
    pub(crate) fn find_state(&self, stats: u32, symbol: u8) -> u32 {
        let mut s = stats;
        while self.state_symbol(s) != symbol {
            s += STATE_SIZE;
        }
        s
    }

    #[inline(always)]
    pub(crate) fn summ_freq(&self, ctx: u32) -> u32 {
        u32::from(self.read_u16(ctx + 2))
    }

    /// Stores a frequency total, truncated to 16 bits.
    #[inline(always)]
    pub(crate) fn set_summ_freq(&mut self, ctx: u32, summ: u32) {
        self.write_u16(ctx + 2, summ as u16);
    }

    #[inline(always)]
    pub(crate) fn stats(&self, ctx: u32) -> u32 {
        self.read_u32(ctx + 4)
    }

    #[inline(always)]
    pub(crate) fn set_stats(&mut self, ctx: u32, stats: u32) {
        self.write_u32(ctx + 4, stats);
    }

    #[inline(always)]
    pub(crate) fn suffix(&self, ctx: u32) -> u32 {
        self.read_u32(ctx + 8)
    }

    #[inline(always)]
    pub(crate) fn set_suffix(&mut self, ctx: u32, suffix: u32) {
        self.write_u32(ctx + 8, suffix);
    }

    // ── free lists ──────────────────────────────────────────────────────

    fn insert_node(&mut self, node: u32, indx: usize) {
        match self.layout {
            NodeLayout::H => {
                self.write_u32(node, self.free_list[indx]);
            }
            NodeLayout::I => {
                self.write_u32(node, EMPTY_NODE);
                self.write_u32(node + 4, self.free_list[indx]);
                self.write_u32(node + 8, i2u(indx));
                self.stamps[indx] += 1;
            }
        }
        self.free_list[indx] = node;
    }

    fn remove_node(&mut self, indx: usize) -> u32 {
        let node = self.free_list[indx];
        self.free_list[indx] = match self.layout {
            NodeLayout::H => self.read_u32(node),
            NodeLayout::I => {
                self.stamps[indx] -= 1;
                self.read_u32(node + 4)
            }
        };
        node
    }

    /// Returns the tail of a class `old_indx` block beyond class `new_indx`
    /// to the free lists.
    fn split_block(&mut self, ptr: u32, old_indx: usize, new_indx: usize) {
        let nu = i2u(old_indx) - i2u(new_indx);
        let ptr = ptr + u2b(i2u(new_indx));
        self.insert_run(ptr, nu);
    }

    /// Files a run of at most 128 units under the best fitting classes.
    fn insert_run(&mut self, ptr: u32, nu: u32) {
        let mut i = u2i(nu);
        if i2u(i) != nu {
            i -= 1;
            let k = i2u(i);
            self.insert_node(ptr + u2b(k), (nu - k - 1) as usize);
        }
        self.insert_node(ptr, i);
    }

    /// Files a glued run of any length.
    fn refill_run(&mut self, mut node: u32, mut nu: u32) {
        while nu > 128 {
            self.insert_node(node, NUM_INDEXES - 1);
            nu -= 128;
            node += u2b(128);
        }
        self.insert_run(node, nu);
    }

    fn glue_free_blocks(&mut self) {
        tracing::trace!(layout = ?self.layout, "gluing free blocks");
        match self.layout {
            NodeLayout::H => self.glue_free_blocks_h(),
            NodeLayout::I => self.glue_free_blocks_i(),
        }
    }

    /// Variant H node: `stamp: u16 @0`, `nu: u16 @2`, `next: u32 @4`.
    fn glue_free_blocks_h(&mut self) {
        self.glue_count = GLUE_COUNT_H;
        if self.lo_unit != self.hi_unit {
            self.write_u16(self.lo_unit, 1);
        }

        let mut n = 0u32;
        for i in 0..NUM_INDEXES {
            let nu = i2u(i) as u16;
            let mut next = self.free_list[i];
            self.free_list[i] = 0;
            while next != 0 {
                let node = next;
                next = self.read_u32(node);
                self.write_u16(node, 0);
                self.write_u16(node + 2, nu);
                self.write_u32(node + 4, n);
                n = node;
            }
        }

        // Glue and refill walk the list in the same order, so a block that
        // was absorbed after it was visited is seen with nu == 0 before its
        // new owner overwrites it.
        let mut head = n;
        let mut prev: Option<u32> = None;
        while n != 0 {
            let node = n;
            let mut nu = self.read_u16(node + 2) as u32;
            n = self.read_u32(node + 4);
            if nu == 0 {
                match prev {
                    Some(p) => self.write_u32(p + 4, n),
                    None => head = n,
                }
                continue;
            }
            prev = Some(node);
            loop {
                let node2 = node + u2b(nu);
                nu += self.read_u16(node2 + 2) as u32;
                if self.read_u16(node2) != 0 || nu >= 0x10000 {
                    break;
                }
                self.write_u16(node + 2, nu as u16);
                self.write_u16(node2 + 2, 0);
            }
        }

        let mut n = head;
        while n != 0 {
            let node = n;
            let nu = self.read_u16(node + 2) as u32;
            n = self.read_u32(node + 4);
            if nu != 0 {
                self.refill_run(node, nu);
            }
        }
    }

    /// Variant I node: `stamp: u32 @0`, `next: u32 @4`, `nu: u32 @8`.
    fn glue_free_blocks_i(&mut self) {
        self.glue_count = GLUE_COUNT_I;
        self.stamps = [0; NUM_INDEXES];
        if self.lo_unit != self.hi_unit {
            self.write_u32(self.lo_unit, 0);
        }

        let mut head = 0u32;
        let mut prev: Option<u32> = None;
        for i in 0..NUM_INDEXES {
            let mut next = self.free_list[i];
            self.free_list[i] = 0;
            while next != 0 {
                let node = next;
                let mut nu = self.read_u32(node + 8);
                match prev {
                    Some(p) => self.write_u32(p + 4, node),
                    None => head = node,
                }
                next = self.read_u32(node + 4);
                if nu != 0 {
                    prev = Some(node);
                    loop {
                        let node2 = node + u2b(nu);
                        if self.read_u32(node2) != EMPTY_NODE {
                            break;
                        }
                        nu += self.read_u32(node2 + 8);
                        self.write_u32(node2 + 8, 0);
                        self.write_u32(node + 8, nu);
                    }
                }
            }
        }
        match prev {
            Some(p) => self.write_u32(p + 4, 0),
            None => head = 0,
        }

        let mut n = head;
        while n != 0 {
            let node = n;
            let nu = self.read_u32(node + 8);
            n = self.read_u32(node + 4);
            if nu != 0 {
                self.refill_run(node, nu);
            }
        }
    }

    // ── allocation ──────────────────────────────────────────────────────

    fn alloc_units_rare(&mut self, indx: usize) -> Option<u32> {
        if self.glue_count == 0 {
            self.glue_free_blocks();
            if self.free_list[indx] != 0 {
                return Some(self.remove_node(indx));
            }
        }
        let Some(i) = (indx + 1..NUM_INDEXES).find(|&i| self.free_list[i] != 0) else {
            let num_bytes = u2b(i2u(indx));
            self.glue_count = self.glue_count.wrapping_sub(1);
            return if self.units_start - self.text > num_bytes {
                self.units_start -= num_bytes;
                Some(self.units_start)
            } else {
                None
            };
        };
        let block = self.remove_node(i);
        self.split_block(block, i, indx);
        Some(block)
    }

    /// Reserves a block of size class `indx`.
    pub(crate) fn alloc_units(&mut self, indx: usize) -> Option<u32> {
        if self.free_list[indx] != 0 {
            return Some(self.remove_node(indx));
        }
        let num_bytes = u2b(i2u(indx));
        let lo = self.lo_unit;
        if self.hi_unit - lo >= num_bytes {
            self.lo_unit = lo + num_bytes;
            return Some(lo);
        }
        self.alloc_units_rare(indx)
    }

    /// Reserves one unit for a context, preferring the top of the gap.
    pub(crate) fn alloc_context(&mut self) -> Option<u32> {
        if self.hi_unit != self.lo_unit {
            self.hi_unit -= UNIT_SIZE;
            Some(self.hi_unit)
        } else if self.free_list[0] != 0 {
            Some(self.remove_node(0))
        } else {
            self.alloc_units_rare(0)
        }
    }

    /// Carves the initial block of `nu` units off `lo_unit`. Only valid
    /// right after [`reset`](Self::reset).
    pub(crate) fn alloc_initial(&mut self, nu: u32) -> u32 {
        let ptr = self.lo_unit;
        self.lo_unit += u2b(nu);
        ptr
    }

    /// Carves one unit off `hi_unit`. Only valid right after
    /// [`reset`](Self::reset).
    pub(crate) fn alloc_initial_context(&mut self) -> u32 {
        self.hi_unit -= UNIT_SIZE;
        self.hi_unit
    }

    /// Grows a block of `old_nu` units by one unit, moving it when the size
    /// class changes.
    pub(crate) fn expand_units(&mut self, old: u32, old_nu: u32) -> Option<u32> {
        let i0 = u2i(old_nu);
        let i1 = u2i(old_nu + 1);
        if i0 == i1 {
            return Some(old);
        }
        let ptr = self.alloc_units(i1)?;
        self.copy_units(ptr, old, old_nu);
        self.insert_node(old, i0);
        Some(ptr)
    }

    /// Shrinks a block of `old_nu` units to `new_nu` units.
    pub(crate) fn shrink_units(&mut self, old: u32, old_nu: u32, new_nu: u32) -> u32 {
        let i0 = u2i(old_nu);
        let i1 = u2i(new_nu);
        if i0 == i1 {
            return old;
        }
        if self.free_list[i1] != 0 {
            let ptr = self.remove_node(i1);
            self.copy_units(ptr, old, new_nu);
            self.insert_node(old, i0);
            return ptr;
        }
        self.split_block(old, i0, i1);
        old
    }

    /// Releases a block of `nu` units.
    pub(crate) fn free_units(&mut self, ptr: u32, nu: u32) {
        self.insert_node(ptr, u2i(nu));
    }

    /// Releases a single unit; a unit at `units_start` is handed back to
    /// the text area instead.
    pub(crate) fn special_free_unit(&mut self, ptr: u32) {
        if ptr != self.units_start {
            self.insert_node(ptr, 0);
        } else {
            self.units_start += UNIT_SIZE;
        }
    }

    /// Moves a block of `nu` units sitting just above `units_start` into a
    /// free block of the same class at a higher offset, so the space can
    /// go back to the text area. Returns where the block now lives.
    pub(crate) fn move_units_up(&mut self, old: u32, nu: u32) -> u32 {
        let indx = u2i(nu);
        if old.wrapping_sub(self.units_start) > 1 << 14 || old > self.free_list[indx] {
            return old;
        }
        let ptr = self.remove_node(indx);
        self.copy_units(ptr, old, nu);
        if old != self.units_start {
            self.insert_node(old, indx);
        } else {
            self.units_start += u2b(i2u(indx));
        }
        ptr
    }

    /// Returns free blocks sitting at `units_start` to the text area
    /// (variant I).
    pub(crate) fn expand_text_area(&mut self) {
        let mut count = [0u32; NUM_INDEXES];
        if self.lo_unit != self.hi_unit {
            self.write_u32(self.lo_unit, 0);
        }
        let mut node = self.units_start;
        while self.read_u32(node) == EMPTY_NODE {
            let nu = self.read_u32(node + 8);
            self.write_u32(node, 0);
            count[u2i(nu)] += 1;
            node += u2b(nu);
        }
        self.units_start = node;

        for i in 0..NUM_INDEXES {
            let mut cnt = count[i];
            if cnt == 0 {
                continue;
            }
            self.stamps[i] -= cnt;
            let mut prev: Option<u32> = None;
            let mut n = self.free_list[i];
            loop {
                let node = n;
                n = self.read_u32(node + 4);
                if self.read_u32(node) != 0 {
                    prev = Some(node);
                    continue;
                }
                match prev {
                    Some(p) => self.write_u32(p + 4, n),
                    None => self.free_list[i] = n,
                }
                cnt -= 1;
                if cnt == 0 {
                    break;
                }
            }
        }
    }

    /// Bytes held by live model data (variant I bookkeeping).
    pub(crate) fn used_memory(&self) -> u32 {
        let free_units: u32 = (0..NUM_INDEXES).map(|i| self.stamps[i] * i2u(i)).sum();
        self.size
            - (self.hi_unit - self.lo_unit)
            - (self.units_start - self.text)
            - u2b(free_units)
    }
}

impl Drop for SubAllocator {
    fn drop(&mut self) {
        let heap = std::mem::take(&mut self.heap);
        self.allocator.free(Some(heap));
    }
}
