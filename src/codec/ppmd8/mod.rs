//! Variant I revision 1 model (Ppmd8), the flavour used by ZIP method 98.
//!
//! Contexts are 12-byte records in the arena:
//!
//! | Offset | Field | Notes |
//! |--------|-------|-------|
//! | 0 | `num_stats: u8` | symbol count minus one, 0 for binary contexts |
//! | 1 | `flags: u8` | high-bit and rescale markers used by SEE |
//! | 2 | `summ_freq: u16` | or the inline one-state when binary |
//! | 4 | `stats: u32` | offset of the state array |
//! | 8 | `suffix: u32` | shorter context, 0 for the root |
//!
//! On arena exhaustion the model either restarts or prunes its tree,
//! depending on the [`RestoreMethod`].

mod model;
pub mod range_coder;

use std::sync::Arc;

use tracing::debug;

use super::sub_alloc::{ArenaUsage, NodeLayout, SubAllocator, STATE_SIZE};
use super::{
    build_ns2bs_index, build_ns2index, update_prob_0, update_prob_1, CharMask, Codec,
    RestoreMethod, See, Symbol, Variant, EXP_ESCAPE, MAX_MEMORY_SIZE, MIN_MEMORY_SIZE,
};
use crate::alloc::{Allocator, HeapAllocator};
use crate::error::{CorruptKind, PpmdError, Result};
use crate::io::{ByteSink, ByteSource};
use range_coder::{RangeDecoder, RangeEncoder};

/// Lowest supported model order.
pub const MIN_ORDER: u32 = 2;

/// Highest supported model order.
pub const MAX_ORDER: u32 = 16;

/// Variant I context model.
pub struct Ppmd8 {
    sa: SubAllocator,
    min_context: u32,
    max_context: u32,
    found_state: u32,
    order_fall: u32,
    init_esc: u32,
    prev_success: u32,
    max_order: u32,
    restore_method: RestoreMethod,
    run_length: i32,
    init_rl: i32,
    restarts: u64,
    cut_offs: u64,
    ns2index: [u8; 260],
    ns2bs_index: [u8; 256],
    see: [[See; 32]; 24],
    dummy_see: See,
    bin_summ: [[u16; 64]; 25],
    char_mask: CharMask,
}

impl Ppmd8 {
    /// Builds a model of order `max_order` (2..=16) over a `memory_size`
    /// byte arena taken from the heap.
    pub fn new(max_order: u32, memory_size: u32, restore_method: RestoreMethod) -> Result<Self> {
        Self::with_allocator(max_order, memory_size, restore_method, Arc::new(HeapAllocator))
    }

    /// Like [`new`](Self::new), with the arena obtained from `allocator`.
    pub fn with_allocator(
        max_order: u32,
        memory_size: u32,
        restore_method: RestoreMethod,
        allocator: Arc<dyn Allocator>,
    ) -> Result<Self> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&max_order) {
            return Err(PpmdError::InvalidOrder {
                order: max_order,
                min: MIN_ORDER,
                max: MAX_ORDER,
            });
        }
        if !(MIN_MEMORY_SIZE..=MAX_MEMORY_SIZE).contains(&memory_size) {
            return Err(PpmdError::InvalidMemorySize {
                size: memory_size,
                min: MIN_MEMORY_SIZE,
                max: MAX_MEMORY_SIZE,
            });
        }
        let sa = SubAllocator::new(NodeLayout::I, memory_size, allocator)?;
        let mut model = Self {
            sa,
            min_context: 0,
            max_context: 0,
            found_state: 0,
            order_fall: 0,
            init_esc: 0,
            prev_success: 0,
            max_order,
            restore_method,
            run_length: 0,
            init_rl: 0,
            restarts: 0,
            cut_offs: 0,
            ns2index: build_ns2index(5),
            ns2bs_index: build_ns2bs_index(),
            see: [[See::default(); 32]; 24],
            dummy_see: See::dummy(),
            bin_summ: [[0; 64]; 25],
            char_mask: CharMask::new(),
        };
        model.restart_model();
        debug!(
            order = max_order,
            memory_size,
            restore = ?restore_method,
            "variant I model ready"
        );
        Ok(model)
    }

    /// Number of times the model restarted because the arena was full.
    pub const fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Number of times the tree was pruned instead of restarted.
    pub const fn cut_offs(&self) -> u64 {
        self.cut_offs
    }

    /// What happens when the arena fills up.
    pub const fn restore_method(&self) -> RestoreMethod {
        self.restore_method
    }

    /// Snapshot of the arena pointers.
    pub const fn arena_usage(&self) -> ArenaUsage {
        self.sa.usage()
    }

    #[inline(always)]
    fn num_stats(&self, ctx: u32) -> u32 {
        u32::from(self.sa.read_u8(ctx))
    }

    #[inline(always)]
    fn set_num_stats(&mut self, ctx: u32, n: u32) {
        self.sa.write_u8(ctx, n as u8);
    }

    #[inline(always)]
    fn flags(&self, ctx: u32) -> u8 {
        self.sa.read_u8(ctx + 1)
    }

    #[inline(always)]
    fn set_flags(&mut self, ctx: u32, flags: u8) {
        self.sa.write_u8(ctx + 1, flags);
    }

    fn mask_context(&mut self, ctx: u32) {
        let stats = self.sa.stats(ctx);
        for i in 0..=self.num_stats(ctx) {
            self.char_mask.mask(self.sa.state_symbol(stats + i * STATE_SIZE));
        }
    }

    fn unmasked_freq(&self, ctx: u32) -> u32 {
        let stats = self.sa.stats(ctx);
        (0..=self.num_stats(ctx))
            .map(|i| stats + i * STATE_SIZE)
            .filter(|&s| self.char_mask.is_open(self.sa.state_symbol(s)))
            .map(|s| self.sa.state_freq(s))
            .sum()
    }

    fn escape_to_suffix(&mut self) -> Option<u32> {
        let mut mc = self.min_context;
        let num_masked = self.num_stats(mc);
        loop {
            self.order_fall += 1;
            mc = self.sa.suffix(mc);
            if mc == 0 {
                return None;
            }
            if self.num_stats(mc) != num_masked {
                break;
            }
        }
        self.min_context = mc;
        Some(num_masked)
    }

    fn encode<W: ByteSink>(&mut self, rc: &mut RangeEncoder<W>, symbol: Option<u8>) {
        let mc = self.min_context;
        let ns = self.num_stats(mc);
        if ns != 0 {
            let summ = self.sa.summ_freq(mc);
            let mut s = self.sa.stats(mc);
            if symbol == Some(self.sa.state_symbol(s)) {
                rc.encode(0, self.sa.state_freq(s), summ);
                self.found_state = s;
                self.update1_0();
                return;
            }
            self.prev_success = 0;
            let mut sum = self.sa.state_freq(s);
            for _ in 0..ns {
                s += STATE_SIZE;
                let freq = self.sa.state_freq(s);
                if symbol == Some(self.sa.state_symbol(s)) {
                    rc.encode(sum, freq, summ);
                    self.found_state = s;
                    self.update1();
                    return;
                }
                sum += freq;
            }
            rc.encode(sum, summ - sum, summ);
            self.char_mask.reset();
            self.mask_context(mc);
        } else {
            let (row, col) = self.bin_summ_index();
            let prob = self.bin_summ[row][col];
            let s = mc + 2;
            if symbol == Some(self.sa.state_symbol(s)) {
                self.bin_summ[row][col] = update_prob_0(prob);
                rc.encode_bit_0(u32::from(prob));
                self.update_bin(s);
                return;
            }
            let updated = update_prob_1(prob);
            self.bin_summ[row][col] = updated;
            self.init_esc = u32::from(EXP_ESCAPE[usize::from(updated >> 10)]);
            rc.encode_bit_1(u32::from(prob));
            self.char_mask.reset();
            self.char_mask.mask(self.sa.state_symbol(s));
            self.prev_success = 0;
        }

        loop {
            let Some(num_masked) = self.escape_to_suffix() else {
                return;
            };
            let mc = self.min_context;
            let (see, esc_freq) = self.make_esc_freq(num_masked);
            let stats = self.sa.stats(mc);
            let mut hi_cnt = 0;
            let mut hit = None;
            for i in 0..=self.num_stats(mc) {
                let s = stats + i * STATE_SIZE;
                let sym = self.sa.state_symbol(s);
                if !self.char_mask.is_open(sym) {
                    continue;
                }
                if symbol == Some(sym) {
                    hit = Some((s, hi_cnt));
                }
                hi_cnt += self.sa.state_freq(s);
            }
            let total = hi_cnt + esc_freq;
            if let Some((s, low)) = hit {
                self.see_mut(see).update();
                self.found_state = s;
                rc.encode(low, self.sa.state_freq(s), total);
                self.update2();
                return;
            }
            rc.encode(hi_cnt, esc_freq, total);
            let cell = self.see_mut(see);
            cell.summ = cell.summ.wrapping_add(total as u16);
            self.mask_context(mc);
        }
    }

    fn decode<R: ByteSource>(&mut self, rc: &mut RangeDecoder<R>) -> Symbol {
        let mc = self.min_context;
        let ns = self.num_stats(mc);
        if ns != 0 {
            let summ = self.sa.summ_freq(mc);
            let count = rc.threshold(summ);
            let mut s = self.sa.stats(mc);
            let mut hi_cnt = self.sa.state_freq(s);
            if count < hi_cnt {
                rc.decode(0, hi_cnt);
                self.found_state = s;
                let sym = self.sa.state_symbol(s);
                self.update1_0();
                return Symbol::Byte(sym);
            }
            self.prev_success = 0;
            for _ in 0..ns {
                s += STATE_SIZE;
                let freq = self.sa.state_freq(s);
                if count < hi_cnt + freq {
                    rc.decode(hi_cnt, freq);
                    self.found_state = s;
                    let sym = self.sa.state_symbol(s);
                    self.update1();
                    return Symbol::Byte(sym);
                }
                hi_cnt += freq;
            }
            if count >= summ {
                return Symbol::Error;
            }
            rc.decode(hi_cnt, summ - hi_cnt);
            self.char_mask.reset();
            self.mask_context(mc);
        } else {
            let (row, col) = self.bin_summ_index();
            let prob = self.bin_summ[row][col];
            let s = mc + 2;
            let bound = rc.bound(u32::from(prob));
            if rc.below(bound) {
                self.bin_summ[row][col] = update_prob_0(prob);
                rc.decode_bit_0(bound);
                let sym = self.sa.state_symbol(s);
                self.update_bin(s);
                return Symbol::Byte(sym);
            }
            let updated = update_prob_1(prob);
            self.bin_summ[row][col] = updated;
            self.init_esc = u32::from(EXP_ESCAPE[usize::from(updated >> 10)]);
            rc.decode_bit_1(bound);
            self.char_mask.reset();
            self.char_mask.mask(self.sa.state_symbol(s));
            self.prev_success = 0;
        }

        loop {
            let Some(num_masked) = self.escape_to_suffix() else {
                return Symbol::EndOfStream;
            };
            let mc = self.min_context;
            let hi_cnt = self.unmasked_freq(mc);
            let (see, esc_freq) = self.make_esc_freq(num_masked);
            let freq_sum = esc_freq + hi_cnt;
            let count = rc.threshold(freq_sum);

            if count < hi_cnt {
                let mut s = self.sa.stats(mc);
                let mut low = 0;
                loop {
                    if self.char_mask.is_open(self.sa.state_symbol(s)) {
                        let freq = self.sa.state_freq(s);
                        if count < low + freq {
                            break;
                        }
                        low += freq;
                    }
                    s += STATE_SIZE;
                }
                rc.decode(low, self.sa.state_freq(s));
                self.see_mut(see).update();
                self.found_state = s;
                let sym = self.sa.state_symbol(s);
                self.update2();
                return Symbol::Byte(sym);
            }
            if count >= freq_sum {
                return Symbol::Error;
            }
            rc.decode(hi_cnt, esc_freq);
            let cell = self.see_mut(see);
            cell.summ = cell.summ.wrapping_add(freq_sum as u16);
            self.mask_context(mc);
        }
    }

    fn bin_summ_index(&self) -> (usize, usize) {
        let mc = self.min_context;
        let freq = self.sa.state_freq(mc + 2) as usize;
        let suffix_ns = self.num_stats(self.sa.suffix(mc)) as usize;
        let row = usize::from(self.ns2index[freq - 1]);
        let col = self.prev_success as usize
            + ((self.run_length >> 26) & 0x20) as usize
            + usize::from(self.ns2bs_index[suffix_ns])
            + usize::from(self.flags(mc));
        (row, col)
    }
}

impl Codec for Ppmd8 {
    type Encoder<W: ByteSink> = RangeEncoder<W>;
    type Decoder<R: ByteSource> = RangeDecoder<R>;

    const VARIANT: Variant = Variant::I;

    fn encoder<W: ByteSink>(&self, sink: W) -> RangeEncoder<W> {
        RangeEncoder::new(sink)
    }

    fn decoder<R: ByteSource>(&self, source: R) -> Result<RangeDecoder<R>> {
        RangeDecoder::new(source).ok_or(PpmdError::corrupt(0, CorruptKind::BadPriming))
    }

    fn encode_symbol<W: ByteSink>(&mut self, rc: &mut RangeEncoder<W>, symbol: u8) {
        self.encode(rc, Some(symbol));
    }

    fn encode_end_mark<W: ByteSink>(&mut self, rc: &mut RangeEncoder<W>) {
        self.encode(rc, None);
    }

    fn decode_symbol<R: ByteSource>(&mut self, rc: &mut RangeDecoder<R>) -> Symbol {
        self.decode(rc)
    }

    fn restart(&mut self) {
        self.restart_model();
    }

    fn max_order(&self) -> u32 {
        self.max_order
    }

    fn memory_size(&self) -> u32 {
        self.sa.size()
    }
}
