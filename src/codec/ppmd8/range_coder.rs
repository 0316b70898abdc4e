//! Carryless range coder used by variant I.
//!
//! Based on Dmitry Subbotin's coder: instead of propagating carries, the
//! range is clipped whenever it gets too small for the top byte of `low` to
//! settle. The stream starts directly with the 4 bytes of the initial code.

use crate::codec::{RangeDecode, RangeEncode};
use crate::io::{ByteSink, ByteSource};

const TOP: u32 = 1 << 24;
const BOT: u32 = 1 << 15;

/// Range encoder writing to a [`ByteSink`].
pub struct RangeEncoder<W> {
    low: u32,
    range: u32,
    sink: W,
}

impl<W: ByteSink> RangeEncoder<W> {
    /// Starts a stream on `sink`.
    pub fn new(sink: W) -> Self {
        Self {
            low: 0,
            range: 0xFFFF_FFFF,
            sink,
        }
    }

    /// Current interval width.
    pub const fn range(&self) -> u32 {
        self.range
    }

    #[inline]
    fn normalize(&mut self) {
        while (self.low ^ self.low.wrapping_add(self.range)) < TOP
            || self.range < BOT && {
                self.range = 0u32.wrapping_sub(self.low) & (BOT - 1);
                true
            }
        {
            self.sink.write_byte((self.low >> 24) as u8);
            self.range <<= 8;
            self.low <<= 8;
        }
    }

    /// Narrows to `[start, start + size)` out of `total`.
    #[inline]
    pub fn encode(&mut self, start: u32, size: u32, total: u32) {
        self.range /= total;
        self.low = self.low.wrapping_add(start * self.range);
        self.range *= size;
        self.normalize();
    }

    /// Codes the more probable branch of a binary context.
    #[inline]
    pub fn encode_bit_0(&mut self, size0: u32) {
        self.range = (self.range >> 14) * size0;
        self.normalize();
    }

    /// Codes the escape branch of a binary context.
    #[inline]
    pub fn encode_bit_1(&mut self, size0: u32) {
        let bound = (self.range >> 14) * size0;
        self.low = self.low.wrapping_add(bound);
        self.range = (self.range & !(BIN_MASK)) - bound;
        self.normalize();
    }
}

/// Low bits dropped from the range when coding a binary escape.
const BIN_MASK: u32 = (1 << 14) - 1;

impl<W: ByteSink> RangeEncode<W> for RangeEncoder<W> {
    fn flush(&mut self) {
        for _ in 0..4 {
            self.sink.write_byte((self.low >> 24) as u8);
            self.low <<= 8;
        }
    }

    fn get_ref(&self) -> &W {
        &self.sink
    }

    fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    fn into_inner(self) -> W {
        self.sink
    }
}

/// Range decoder reading from a [`ByteSource`].
///
/// `code` is kept relative to `low`, so a cleanly finished stream leaves it
/// at zero.
pub struct RangeDecoder<R> {
    low: u32,
    range: u32,
    code: u32,
    source: R,
}

impl<R: ByteSource> RangeDecoder<R> {
    /// Primes the decoder. Returns `None` if the initial code is out of
    /// range.
    pub fn new(mut source: R) -> Option<Self> {
        let mut code = 0u32;
        for _ in 0..4 {
            code = (code << 8) | u32::from(source.read_byte().unwrap_or(0));
        }
        (code != 0xFFFF_FFFF).then_some(Self {
            low: 0,
            range: 0xFFFF_FFFF,
            code,
            source,
        })
    }

    /// Current interval width.
    pub const fn range(&self) -> u32 {
        self.range
    }

    #[inline]
    fn normalize(&mut self) {
        while (self.low ^ self.low.wrapping_add(self.range)) < TOP
            || self.range < BOT && {
                self.range = 0u32.wrapping_sub(self.low) & (BOT - 1);
                true
            }
        {
            self.code = (self.code << 8) | u32::from(self.source.read_byte().unwrap_or(0));
            self.range <<= 8;
            self.low <<= 8;
        }
    }

    /// Scales the interval to `total` and returns the cumulative count the
    /// code points at. May exceed `total - 1` on corrupt input.
    #[inline]
    pub fn threshold(&mut self, total: u32) -> u32 {
        self.range /= total;
        self.code / self.range
    }

    /// Consumes `[start, start + size)` after [`threshold`](Self::threshold).
    #[inline]
    pub fn decode(&mut self, start: u32, size: u32) {
        let start = start.wrapping_mul(self.range);
        self.low = self.low.wrapping_add(start);
        self.code = self.code.wrapping_sub(start);
        self.range = self.range.wrapping_mul(size);
        self.normalize();
    }

    /// Splits off the binary probability `size0` (out of `2^14`).
    #[inline]
    pub fn bound(&self, size0: u32) -> u32 {
        (self.range >> 14) * size0
    }

    /// Whether the code falls below `bound`.
    #[inline]
    pub const fn below(&self, bound: u32) -> bool {
        self.code < bound
    }

    /// Consumes the more probable branch.
    #[inline]
    pub fn decode_bit_0(&mut self, bound: u32) {
        self.range = bound;
        self.normalize();
    }

    /// Consumes the escape branch.
    #[inline]
    pub fn decode_bit_1(&mut self, bound: u32) {
        self.low = self.low.wrapping_add(bound);
        self.code = self.code.wrapping_sub(bound);
        self.range = (self.range & !BIN_MASK) - bound;
        self.normalize();
    }
}

impl<R: ByteSource> RangeDecode<R> for RangeDecoder<R> {
    fn is_finished_ok(&self) -> bool {
        self.code == 0
    }

    fn get_ref(&self) -> &R {
        &self.source
    }

    fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    fn into_inner(self) -> R {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SliceSource;

    #[test]
    fn test_empty_stream_is_four_zero_bytes() {
        let mut enc = RangeEncoder::new(Vec::new());
        enc.flush();
        assert_eq!(enc.into_inner(), vec![0; 4]);
    }

    #[test]
    fn test_priming() {
        assert!(RangeDecoder::new(SliceSource::new(&[0xFF; 4])).is_none());
        assert!(RangeDecoder::new(SliceSource::new(&[0x12, 0, 0, 0])).is_some());
    }

    #[test]
    fn test_mixed_intervals_roundtrip() {
        // (start, size, total) triples with awkward totals to hit the range
        // clipping branch.
        let ops: Vec<(u32, u32, u32)> = (0..8000u32)
            .map(|i| {
                let total = 3 + (i * 37) % 9000;
                let start = (i * 101) % total;
                let size = 1 + (i % (total - start));
                (start, size.min(total - start), total)
            })
            .collect();
        let mut enc = RangeEncoder::new(Vec::new());
        for &(start, size, total) in &ops {
            enc.encode(start, size, total);
            assert!(enc.range() >= BOT);
        }
        enc.flush();
        let bytes = enc.into_inner();

        let mut dec = RangeDecoder::new(SliceSource::new(&bytes)).unwrap();
        for &(start, size, total) in &ops {
            let count = dec.threshold(total);
            assert!((start..start + size).contains(&count));
            dec.decode(start, size);
            assert!(dec.range() >= BOT);
        }
        assert!(dec.is_finished_ok());
        assert!(dec.get_ref().remaining().is_empty());
    }

    #[test]
    fn test_bits_roundtrip() {
        let bits: Vec<bool> = (0..20_000u32).map(|i| i % 89 == 0 || i % 7 == 3).collect();
        let mut enc = RangeEncoder::new(Vec::new());
        for &b in &bits {
            if b {
                enc.encode_bit_1(0x3A00);
            } else {
                enc.encode_bit_0(0x3A00);
            }
        }
        enc.flush();
        let bytes = enc.into_inner();

        let mut dec = RangeDecoder::new(SliceSource::new(&bytes)).unwrap();
        for &b in &bits {
            let bound = dec.bound(0x3A00);
            let got = !dec.below(bound);
            if got {
                dec.decode_bit_1(bound);
            } else {
                dec.decode_bit_0(bound);
            }
            assert_eq!(got, b);
        }
        assert!(dec.is_finished_ok());
    }
}
