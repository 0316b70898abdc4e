//! Variant H model (Ppmd7), the flavour used by the 7z format.
//!
//! Contexts are 12-byte records in the arena:
//!
//! | Offset | Field | Notes |
//! |--------|-------|-------|
//! | 0 | `num_stats: u16` | 1..=256 symbols |
//! | 2 | `summ_freq: u16` | or the inline one-state when `num_stats == 1` |
//! | 4 | `stats: u32` | offset of the state array |
//! | 8 | `suffix: u32` | shorter context, 0 for the root |
//!
//! When the arena runs out the model is thrown away and rebuilt from
//! scratch; encoder and decoder do this at the same symbol.

mod model;
pub mod range_coder;

use std::sync::Arc;

use tracing::debug;

use super::sub_alloc::{ArenaUsage, NodeLayout, SubAllocator, STATE_SIZE};
use super::{
    build_ns2bs_index, build_ns2index, hi_bits_flag3, hi_bits_flag4, update_prob_0,
    update_prob_1, CharMask, Codec, See, Symbol, Variant, EXP_ESCAPE, MAX_MEMORY_SIZE,
    MIN_MEMORY_SIZE,
};
use crate::alloc::{Allocator, HeapAllocator};
use crate::error::{CorruptKind, PpmdError, Result};
use crate::io::{ByteSink, ByteSource};
use range_coder::{RangeDecoder, RangeEncoder};

/// Lowest supported model order.
pub const MIN_ORDER: u32 = 2;

/// Highest supported model order.
pub const MAX_ORDER: u32 = 64;

/// Variant H context model.
pub struct Ppmd7 {
    /// Arena holding contexts, states and the text area.
    sa: SubAllocator,
    /// Context the next symbol is coded in.
    min_context: u32,
    /// Highest order context reached so far.
    max_context: u32,
    /// State of the last coded symbol.
    found_state: u32,
    /// Orders between `max_context` and the full model order.
    order_fall: u32,
    init_esc: u32,
    prev_success: u32,
    max_order: u32,
    hi_bits_flag: u32,
    run_length: i32,
    init_rl: i32,
    /// Restarts caused by arena exhaustion.
    restarts: u64,
    ns2index: [u8; 256],
    ns2bs_index: [u8; 256],
    see: [[See; 16]; 25],
    dummy_see: See,
    bin_summ: [[u16; 64]; 128],
    char_mask: CharMask,
}

impl Ppmd7 {
    /// Builds a model of order `max_order` (2..=64) over a `memory_size`
    /// byte arena taken from the heap.
    pub fn new(max_order: u32, memory_size: u32) -> Result<Self> {
        Self::with_allocator(max_order, memory_size, Arc::new(HeapAllocator))
    }

    /// Like [`new`](Self::new), with the arena obtained from `allocator`.
    pub fn with_allocator(
        max_order: u32,
        memory_size: u32,
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
        let sa = SubAllocator::new(NodeLayout::H, memory_size, allocator)?;
        let mut model = Self {
            sa,
            min_context: 0,
            max_context: 0,
            found_state: 0,
            order_fall: 0,
            init_esc: 0,
            prev_success: 0,
            max_order,
            hi_bits_flag: 0,
            run_length: 0,
            init_rl: 0,
            restarts: 0,
            ns2index: build_ns2index(3),
            ns2bs_index: build_ns2bs_index(),
            see: [[See::default(); 16]; 25],
            dummy_see: See::dummy(),
            bin_summ: [[0; 64]; 128],
            char_mask: CharMask::new(),
        };
        model.restart_model();
        debug!(order = max_order, memory_size, "variant H model ready");
        Ok(model)
    }

    /// Number of times the model restarted because the arena was full.
    pub const fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Snapshot of the arena pointers.
    pub const fn arena_usage(&self) -> ArenaUsage {
        self.sa.usage()
    }

    #[inline(always)]
    fn num_stats(&self, ctx: u32) -> u32 {
        u32::from(self.sa.read_u16(ctx))
    }

    #[inline(always)]
    fn set_num_stats(&mut self, ctx: u32, n: u32) {
        self.sa.write_u16(ctx, n as u16);
    }

    /// Masks every symbol of `ctx`.
    fn mask_context(&mut self, ctx: u32) {
        let stats = self.sa.stats(ctx);
        for i in 0..self.num_stats(ctx) {
            self.char_mask.mask(self.sa.state_symbol(stats + i * STATE_SIZE));
        }
    }

    /// Sum of the frequencies of the unmasked symbols of `ctx`.
    fn unmasked_freq(&self, ctx: u32) -> u32 {
        let stats = self.sa.stats(ctx);
        (0..self.num_stats(ctx))
            .map(|i| stats + i * STATE_SIZE)
            .filter(|&s| self.char_mask.is_open(self.sa.state_symbol(s)))
            .map(|s| self.sa.state_freq(s))
            .sum()
    }

    /// Walks to the first suffix with more symbols than the current context
    /// and returns how many symbols are masked. `None` once past the root.
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
        if ns != 1 {
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
            for _ in 1..ns {
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
            self.hi_bits_flag = u32::from(hi_bits_flag3(self.sa.state_symbol(self.found_state)));
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
            for i in 0..self.num_stats(mc) {
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
        if ns != 1 {
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
            for _ in 1..ns {
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
            self.hi_bits_flag = u32::from(hi_bits_flag3(self.sa.state_symbol(self.found_state)));
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

    /// Cell of `bin_summ` for the current binary context. Also latches the
    /// high-bits flag of the previous symbol.
    fn bin_summ_index(&mut self) -> (usize, usize) {
        let mc = self.min_context;
        let one = mc + 2;
        self.hi_bits_flag = u32::from(hi_bits_flag3(self.sa.state_symbol(self.found_state)));
        let suffix_ns = self.num_stats(self.sa.suffix(mc)) as usize;
        let row = self.sa.state_freq(one) as usize - 1;
        let col = self.prev_success as usize
            + ((self.run_length >> 26) & 0x20) as usize
            + usize::from(self.ns2bs_index[suffix_ns - 1])
            + usize::from(hi_bits_flag4(self.sa.state_symbol(one)))
            + self.hi_bits_flag as usize;
        (row, col)
    }
}

impl Codec for Ppmd7 {
    type Encoder<W: ByteSink> = RangeEncoder<W>;
    type Decoder<R: ByteSource> = RangeDecoder<R>;

    const VARIANT: Variant = Variant::H;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RangeDecode, RangeEncode};
    use crate::io::SliceSource;

    #[test]
    fn test_parameter_validation() {
        assert!(matches!(
            Ppmd7::new(1, 1 << 20),
            Err(PpmdError::InvalidOrder { order: 1, .. })
        ));
        assert!(matches!(
            Ppmd7::new(65, 1 << 20),
            Err(PpmdError::InvalidOrder { order: 65, .. })
        ));
        assert!(matches!(
            Ppmd7::new(6, 1024),
            Err(PpmdError::InvalidMemorySize { size: 1024, .. })
        ));
        assert!(Ppmd7::new(2, MIN_MEMORY_SIZE).is_ok());
        assert!(Ppmd7::new(64, 1 << 16).is_ok());
    }

    #[test]
    fn test_fresh_model_layout() {
        let model = Ppmd7::new(6, 1 << 16).unwrap();
        let root = model.min_context;
        assert_eq!(model.num_stats(root), 256);
        assert_eq!(model.sa.summ_freq(root), 257);
        assert_eq!(model.sa.suffix(root), 0);
        assert_eq!(model.found_state, model.sa.stats(root));
        assert_eq!(model.order_fall, 6);
        assert_eq!(model.run_length, -7);
        assert_eq!(Ppmd7::new(16, 1 << 16).unwrap().init_rl, -13);
        assert!(model.arena_usage().is_consistent());
    }

    #[test]
    fn test_bad_priming() {
        let model = Ppmd7::new(6, 1 << 16).unwrap();
        let err = model.decoder(SliceSource::new(&[7, 0, 0, 0, 0])).err();
        assert!(matches!(
            err,
            Some(PpmdError::StreamCorrupt {
                reason: CorruptKind::BadPriming,
                ..
            })
        ));
    }

    #[test]
    fn test_first_symbol_is_uniform() {
        let mut model = Ppmd7::new(6, 1 << 16).unwrap();
        let mut rc = model.encoder(Vec::new());
        model.encode_symbol(&mut rc, b'x');
        rc.flush();
        let packed = rc.into_inner();

        let mut model = Ppmd7::new(6, 1 << 16).unwrap();
        let mut rc = model.decoder(SliceSource::new(&packed)).unwrap();
        assert_eq!(model.decode_symbol(&mut rc), Symbol::Byte(b'x'));
        assert!(rc.is_finished_ok());
    }

    #[test]
    fn test_end_mark_on_fresh_model() {
        let mut model = Ppmd7::new(3, 1 << 16).unwrap();
        let mut rc = model.encoder(Vec::new());
        model.encode_end_mark(&mut rc);
        rc.flush();
        let packed = rc.into_inner();

        let mut model = Ppmd7::new(3, 1 << 16).unwrap();
        let mut rc = model.decoder(SliceSource::new(&packed)).unwrap();
        assert_eq!(model.decode_symbol(&mut rc), Symbol::EndOfStream);
    }
}
