//! PPMd context models and range coders.
//!
//! Two variants are provided, both bit-compatible with 7-Zip:
//!
//! | Variant | Type | Range coder | Orders | On arena exhaustion |
//! |---------|------|-------------|--------|---------------------|
//! | H | [`Ppmd7`] | 7z coder with carry propagation | 2..=64 | restart |
//! | I (rev.1) | [`Ppmd8`] | carryless (Subbotin) | 2..=16 | restart or cut off ([`RestoreMethod`]) |
//!
//! ## Coding a symbol
//!
//! ```text
//!              ┌──────────────┐  found   ┌────────────┐
//! symbol ─────►│ min_context  │─────────►│ update1/2  │──► next_context
//!              └──────┬───────┘          └────────────┘    (descend or
//!                     │ escape (SEE / bin_summ)              update_model)
//!                     ▼
//!              ┌──────────────┐  no suffix
//!              │ suffix ctx   │────────────► end mark
//!              └──────────────┘
//! ```
//!
//! Both models implement [`Codec`]. The model owns all statistics; the
//! range coder owned by the caller only carries the coder registers and the
//! byte source or sink, so one model can be driven through any transport.
//!
//! ```rust
//! use ppmd_stream::codec::{Codec, Ppmd7, RangeEncode, Symbol};
//! use ppmd_stream::io::SliceSource;
//!
//! let mut model = Ppmd7::new(6, 1 << 20)?;
//! let mut rc = model.encoder(Vec::new());
//! for &b in b"abracadabra" {
//!     model.encode_symbol(&mut rc, b);
//! }
//! model.encode_end_mark(&mut rc);
//! rc.flush();
//! let packed = rc.into_inner();
//!
//! let mut model = Ppmd7::new(6, 1 << 20)?;
//! let mut rc = model.decoder(SliceSource::new(&packed))?;
//! let mut out = Vec::new();
//! while let Symbol::Byte(b) = model.decode_symbol(&mut rc) {
//!     out.push(b);
//! }
//! assert_eq!(out, b"abracadabra");
//! # Ok::<(), ppmd_stream::PpmdError>(())
//! ```

pub mod ppmd7;
pub mod ppmd8;
pub(crate) mod sub_alloc;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::io::{ByteSink, ByteSource};

pub use ppmd7::Ppmd7;
pub use ppmd8::Ppmd8;
pub use sub_alloc::ArenaUsage;

/// Smallest arena accepted by both variants.
pub const MIN_MEMORY_SIZE: u32 = 1 << 11;

/// Largest arena accepted by both variants.
pub const MAX_MEMORY_SIZE: u32 = 0xFFFF_FFFF - 12 * 3;

/// Frequency ceiling before a context is rescaled.
pub(crate) const MAX_FREQ: u32 = 124;

pub(crate) const INT_BITS: u32 = 7;
pub(crate) const PERIOD_BITS: u32 = 7;
pub(crate) const BIN_SCALE: u32 = 1 << (INT_BITS + PERIOD_BITS);

/// Initial escape estimates of binary contexts.
pub(crate) const INIT_BIN_ESC: [u16; 8] = [
    0x3CDD, 0x1F3F, 0x59BF, 0x48F3, 0x64A1, 0x5ABC, 0x6632, 0x6051,
];

/// Initial escape frequency after a binary escape, by probability bucket.
pub(crate) const EXP_ESCAPE: [u8; 16] = [25, 14, 9, 7, 5, 5, 4, 4, 4, 3, 3, 3, 2, 2, 2, 2];

/// Suffix richness bucket of binary contexts.
pub(crate) const fn build_ns2bs_index() -> [u8; 256] {
    let mut table = [0u8; 256];
    table[1] = 2;
    let mut i = 2;
    while i < 256 {
        table[i] = if i < 11 { 4 } else { 6 };
        i += 1;
    }
    table
}

/// Maps symbol counts to SEE rows: the first `linear` counts map to
/// themselves, then each row covers one more count than the previous.
pub(crate) const fn build_ns2index<const N: usize>(linear: usize) -> [u8; N] {
    let mut table = [0u8; N];
    let mut i = 0;
    while i < linear {
        table[i] = i as u8;
        i += 1;
    }
    let mut m = linear;
    let mut k = 1;
    while i < N {
        table[i] = m as u8;
        k -= 1;
        if k == 0 {
            m += 1;
            k = m + 1 - linear;
        }
        i += 1;
    }
    table
}

#[inline(always)]
pub(crate) const fn get_mean(prob: u16) -> u16 {
    (prob + (1 << (PERIOD_BITS - 2))) >> PERIOD_BITS
}

/// Binary probability after the predicted symbol was coded.
#[inline(always)]
pub(crate) const fn update_prob_0(prob: u16) -> u16 {
    prob + (1 << INT_BITS) - get_mean(prob)
}

/// Binary probability after an escape.
#[inline(always)]
pub(crate) const fn update_prob_1(prob: u16) -> u16 {
    prob - get_mean(prob)
}

/// Secondary escape estimation cell.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct See {
    pub(crate) summ: u16,
    pub(crate) shift: u8,
    pub(crate) count: u8,
}

impl See {
    pub(crate) const fn new(summ: u16, count: u8) -> Self {
        Self {
            summ,
            shift: (PERIOD_BITS - 4) as u8,
            count,
        }
    }

    pub(crate) const fn dummy() -> Self {
        Self {
            summ: 0,
            shift: PERIOD_BITS as u8,
            count: 64,
        }
    }

    /// Takes the current escape estimate out of the cell.
    #[inline]
    pub(crate) fn take_mean(&mut self) -> u32 {
        let r = self.summ >> self.shift;
        self.summ = self.summ.wrapping_sub(r);
        u32::from(r) + u32::from(r == 0)
    }

    #[inline]
    pub(crate) fn update(&mut self) {
        if u32::from(self.shift) < PERIOD_BITS {
            self.count = self.count.wrapping_sub(1);
            if self.count == 0 {
                self.summ = self.summ.wrapping_shl(1);
                self.count = (3u32 << self.shift) as u8;
                self.shift += 1;
            }
        }
    }
}

/// Which SEE cell an escape used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeeRef {
    Dummy,
    Cell(usize, usize),
}

/// `0x08` when the symbol is in the upper 192 byte values.
#[inline(always)]
pub(crate) const fn hi_bits_flag3(symbol: u8) -> u8 {
    (((symbol as u32 + 0xC0) >> 5) & 8) as u8
}

/// `0x10` when the symbol is in the upper 192 byte values.
#[inline(always)]
pub(crate) const fn hi_bits_flag4(symbol: u8) -> u8 {
    (((symbol as u32 + 0xC0) >> 4) & 16) as u8
}

/// Bitmask of symbols excluded while escaping to shorter contexts.
pub(crate) struct CharMask([u8; 256]);

impl CharMask {
    pub(crate) const fn new() -> Self {
        Self([0xFF; 256])
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.0 = [0xFF; 256];
    }

    #[inline(always)]
    pub(crate) fn mask(&mut self, symbol: u8) {
        self.0[symbol as usize] = 0;
    }

    #[inline(always)]
    pub(crate) fn is_open(&self, symbol: u8) -> bool {
        self.0[symbol as usize] != 0
    }
}

/// PPMd variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    /// Variant H (Ppmd7), the 7z flavour.
    H,
    /// Variant I revision 1 (Ppmd8).
    #[default]
    I,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::H => "H",
            Self::I => "I",
        })
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "h" | "H" | "7" | "ppmd7" => Ok(Self::H),
            "i" | "I" | "8" | "ppmd8" => Ok(Self::I),
            _ => Err(format!("unknown PPMd variant '{s}' (expected H or I)")),
        }
    }
}

/// What variant I does when its arena is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RestoreMethod {
    /// Throw the model away and start over.
    #[default]
    Restart,
    /// Prune the context tree and keep going; restart only when less than
    /// half of the arena is in use.
    CutOff,
}

impl RestoreMethod {
    /// Wire value used by PPMd headers (`0` restart, `1` cut off).
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Restart => 0,
            Self::CutOff => 1,
        }
    }

    /// Parses the wire value. Unknown values yield `None`.
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Restart),
            1 => Some(Self::CutOff),
            _ => None,
        }
    }
}

/// Result of decoding one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// A decoded byte.
    Byte(u8),
    /// The end mark was decoded. Not an error.
    EndOfStream,
    /// The input does not belong to any interval; the stream is corrupt.
    Error,
}

/// Range encoder half of a [`Codec`].
pub trait RangeEncode<W> {
    /// Writes out every pending byte so the last symbol is decodable.
    fn flush(&mut self);
    /// The sink.
    fn get_ref(&self) -> &W;
    /// The sink, mutably.
    fn get_mut(&mut self) -> &mut W;
    /// Gives the sink back. Call [`flush`](Self::flush) first.
    fn into_inner(self) -> W;
}

/// Range decoder half of a [`Codec`].
pub trait RangeDecode<R> {
    /// Whether the decoder ended exactly where the encoder flushed.
    fn is_finished_ok(&self) -> bool;
    /// The source.
    fn get_ref(&self) -> &R;
    /// The source, mutably. Reading from it desynchronizes the decoder.
    fn get_mut(&mut self) -> &mut R;
    /// Gives the source back.
    fn into_inner(self) -> R;
}

/// Common interface of the PPMd variants.
///
/// A model is paired with one range coder for the whole stream; both sides
/// must use models built with identical parameters.
pub trait Codec: Send {
    /// Range encoder of this variant.
    type Encoder<W: ByteSink>: RangeEncode<W>;
    /// Range decoder of this variant.
    type Decoder<R: ByteSource>: RangeDecode<R>;

    /// Variant tag.
    const VARIANT: Variant;

    /// Starts an encoded stream on `sink`.
    fn encoder<W: ByteSink>(&self, sink: W) -> Self::Encoder<W>;

    /// Primes a decoder from `source`.
    ///
    /// Fails with [`PpmdError::StreamCorrupt`](crate::PpmdError::StreamCorrupt)
    /// if the priming bytes are invalid.
    fn decoder<R: ByteSource>(&self, source: R) -> Result<Self::Decoder<R>>;

    /// Encodes one byte.
    fn encode_symbol<W: ByteSink>(&mut self, rc: &mut Self::Encoder<W>, symbol: u8);

    /// Encodes the end mark.
    fn encode_end_mark<W: ByteSink>(&mut self, rc: &mut Self::Encoder<W>);

    /// Decodes one symbol.
    fn decode_symbol<R: ByteSource>(&mut self, rc: &mut Self::Decoder<R>) -> Symbol;

    /// Resets the model to its initial state, keeping the arena.
    fn restart(&mut self);

    /// Model order.
    fn max_order(&self) -> u32;

    /// Arena size in bytes.
    fn memory_size(&self) -> u32;
}
