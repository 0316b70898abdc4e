//! 7z range coder used by variant H.
//!
//! The encoder keeps a 33-bit `low` and propagates carries through a cached
//! byte plus a run of pending `0xFF` bytes. The stream starts with a zero
//! byte followed by the 4 bytes of the initial `code`.

use crate::codec::{RangeDecode, RangeEncode};
use crate::io::{ByteSink, ByteSource};

const TOP: u32 = 1 << 24;

/// Range encoder writing to a [`ByteSink`].
pub struct RangeEncoder<W> {
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u64,
    sink: W,
}

impl<W: ByteSink> RangeEncoder<W> {
    /// Starts a stream on `sink`. Nothing is written until the first
    /// normalization or [`flush`](RangeEncode::flush).
    pub fn new(sink: W) -> Self {
        Self {
            low: 0,
            range: 0xFFFF_FFFF,
            cache: 0,
            cache_size: 1,
            sink,
        }
    }

    /// Current interval width.
    pub const fn range(&self) -> u32 {
        self.range
    }

    fn shift_low(&mut self) {
        if (self.low as u32) < 0xFF00_0000 || (self.low >> 32) != 0 {
            let carry = (self.low >> 32) as u8;
            let mut temp = self.cache;
            loop {
                self.sink.write_byte(temp.wrapping_add(carry));
                temp = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = ((self.low as u32) >> 24) as u8;
        }
        self.cache_size += 1;
        self.low = u64::from((self.low as u32) << 8);
    }

    #[inline]
    fn normalize(&mut self) {
        while self.range < TOP {
            self.range <<= 8;
            self.shift_low();
        }
    }

    /// Narrows to `[start, start + size)` out of `total`.
    #[inline]
    pub fn encode(&mut self, start: u32, size: u32, total: u32) {
        self.range /= total;
        self.low += u64::from(start) * u64::from(self.range);
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
        self.low += u64::from(bound);
        self.range -= bound;
        self.normalize();
    }
}

impl<W: ByteSink> RangeEncode<W> for RangeEncoder<W> {
    fn flush(&mut self) {
        for _ in 0..5 {
            self.shift_low();
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
pub struct RangeDecoder<R> {
    range: u32,
    code: u32,
    source: R,
}

impl<R: ByteSource> RangeDecoder<R> {
    /// Primes the decoder. Returns `None` if the first byte is not zero or
    /// the initial code is out of range.
    pub fn new(mut source: R) -> Option<Self> {
        if source.read_byte().unwrap_or(0) != 0 {
            return None;
        }
        let mut code = 0u32;
        for _ in 0..4 {
            code = (code << 8) | u32::from(source.read_byte().unwrap_or(0));
        }
        (code != 0xFFFF_FFFF).then_some(Self {
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
        while self.range < TOP {
            self.code = (self.code << 8) | u32::from(self.source.read_byte().unwrap_or(0));
            self.range <<= 8;
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
        self.code = self.code.wrapping_sub(start.wrapping_mul(self.range));
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
        self.code -= bound;
        self.range -= bound;
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
    fn test_empty_stream_is_five_zero_bytes() {
        let mut enc = RangeEncoder::new(Vec::new());
        enc.flush();
        assert_eq!(enc.into_inner(), vec![0; 5]);
    }

    #[test]
    fn test_priming_rejects_nonzero_lead() {
        assert!(RangeDecoder::new(SliceSource::new(&[1, 0, 0, 0, 0])).is_none());
        assert!(RangeDecoder::new(SliceSource::new(&[0, 0xFF, 0xFF, 0xFF, 0xFF])).is_none());
        assert!(RangeDecoder::new(SliceSource::new(&[0, 0, 0, 0, 0])).is_some());
    }

    #[test]
    fn test_uniform_symbols_roundtrip() {
        let symbols: Vec<u32> = (0..5000u32).map(|i| (i * 7 + i / 13) % 256).collect();
        let mut enc = RangeEncoder::new(Vec::new());
        for &s in &symbols {
            enc.encode(s, 1, 256);
            assert!(enc.range() >= TOP);
        }
        enc.flush();
        let bytes = enc.into_inner();

        let mut dec = RangeDecoder::new(SliceSource::new(&bytes)).unwrap();
        for &s in &symbols {
            let count = dec.threshold(256);
            assert_eq!(count, s);
            dec.decode(count, 1);
            assert!(dec.range() >= TOP);
        }
        assert!(dec.is_finished_ok());
        assert!(dec.get_ref().remaining().is_empty());
    }

    #[test]
    fn test_skewed_bits_roundtrip_with_carries() {
        let bits: Vec<bool> = (0..20_000u32).map(|i| i % 97 == 0 || i % 5 == 1).collect();
        let mut enc = RangeEncoder::new(Vec::new());
        for &b in &bits {
            if b {
                enc.encode_bit_1(0x3F00);
            } else {
                enc.encode_bit_0(0x3F00);
            }
        }
        enc.flush();
        let bytes = enc.into_inner();

        let mut dec = RangeDecoder::new(SliceSource::new(&bytes)).unwrap();
        for &b in &bits {
            let bound = dec.bound(0x3F00);
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
