//! Streaming encoder and decoder on top of a [`Codec`].
//!
//! ```rust
//! use ppmd_stream::stream::{Decoder, Encoder, EndMark};
//! use ppmd_stream::io::SliceSource;
//! use ppmd_stream::{Ppmd8, RestoreMethod};
//!
//! let mut enc = Encoder::new(Ppmd8::new(6, 1 << 20, RestoreMethod::Restart)?, Vec::new());
//! enc.encode(b"hello ");
//! enc.encode(b"world");
//! let packed = enc.finish(EndMark::Write);
//!
//! let model = Ppmd8::new(6, 1 << 20, RestoreMethod::Restart)?;
//! let mut dec = Decoder::new(model, SliceSource::new(&packed))?;
//! let mut out = [0u8; 64];
//! let n = dec.decode(&mut out)?;
//! assert_eq!(&out[..n], b"hello world");
//! dec.finish()?;
//! # Ok::<(), ppmd_stream::PpmdError>(())
//! ```
//!
//! The decoder tells a complete stream from a truncated one by watching its
//! source: the range decoder reads zeros past the end, so any attempt to
//! read beyond the last byte means the stream was cut short.

use std::io;

use tracing::warn;

use crate::codec::{Codec, Ppmd7, Ppmd8, RangeDecode, RangeEncode, Symbol, Variant};
use crate::error::{CorruptKind, PpmdError, Result};
use crate::io::{ByteSink, ByteSource, SliceSource, Tracked};
use crate::options::{AnyCodec, CodecOptions};

/// Whether [`Encoder::finish`] writes the end symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndMark {
    /// Terminate the stream with the end symbol; decoders stop on their own.
    #[default]
    Write,
    /// No end symbol; the decoder must be told the decoded length.
    Omit,
}

/// Encodes a byte stream with one model.
pub struct Encoder<C: Codec, W: ByteSink> {
    model: C,
    rc: C::Encoder<W>,
    total_in: u64,
}

impl<C: Codec, W: ByteSink> Encoder<C, W> {
    /// Starts a stream on `sink`.
    pub fn new(model: C, sink: W) -> Self {
        let rc = model.encoder(sink);
        Self {
            model,
            rc,
            total_in: 0,
        }
    }

    /// Encodes `data`. Splitting input across calls yields the same bytes as
    /// a single call.
    pub fn encode(&mut self, data: &[u8]) {
        for &b in data {
            self.model.encode_symbol(&mut self.rc, b);
        }
        self.total_in += data.len() as u64;
    }

    /// Bytes encoded so far.
    pub const fn total_in(&self) -> u64 {
        self.total_in
    }

    /// The model, for its counters.
    pub fn model(&self) -> &C {
        &self.model
    }

    /// The sink. Some coded bytes may still be held back by the coder.
    pub fn get_ref(&self) -> &W {
        self.rc.get_ref()
    }

    /// The sink, mutably. Taking bytes out of it is fine; the coder only
    /// appends.
    pub fn get_mut(&mut self) -> &mut W {
        self.rc.get_mut()
    }

    /// Ends the stream and returns the sink.
    pub fn finish(mut self, end_mark: EndMark) -> W {
        if end_mark == EndMark::Write {
            self.model.encode_end_mark(&mut self.rc);
        }
        self.rc.flush();
        self.rc.into_inner()
    }
}

/// `flush` cannot end the range coder mid-stream and only reports success;
/// use [`Encoder::finish`].
impl<C: Codec, W: ByteSink> io::Write for Encoder<C, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encode(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Active,
    Ended,
    Failed,
}

/// Decodes a byte stream with one model.
pub struct Decoder<C: Codec, R: ByteSource> {
    model: C,
    rc: C::Decoder<Tracked<R>>,
    total_out: u64,
    state: DecodeState,
}

impl<C: Codec, R: ByteSource> Decoder<C, R> {
    /// Primes the range decoder from `source`.
    pub fn new(model: C, source: R) -> Result<Self> {
        let rc = model.decoder(Tracked::new(source))?;
        if rc.get_ref().eof_hits() > 0 {
            warn!(variant = %C::VARIANT, "stream shorter than the range coder priming");
            return Err(PpmdError::corrupt(0, CorruptKind::Truncated));
        }
        Ok(Self {
            model,
            rc,
            total_out: 0,
            state: DecodeState::Active,
        })
    }

    /// Decoded bytes so far.
    pub const fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Whether the end mark has been decoded.
    pub fn is_ended(&self) -> bool {
        self.state == DecodeState::Ended
    }

    /// The model, for its counters.
    pub fn model(&self) -> &C {
        &self.model
    }

    /// The source, e.g. to collect an I/O error after a failed decode.
    pub fn get_mut(&mut self) -> &mut R {
        self.rc.get_mut().get_mut()
    }

    fn fail(&mut self, reason: CorruptKind) -> PpmdError {
        self.state = DecodeState::Failed;
        warn!(
            variant = %C::VARIANT,
            offset = self.total_out,
            %reason,
            "corrupt stream"
        );
        PpmdError::corrupt(self.total_out, reason)
    }

    /// Decodes one symbol. `None` means the end mark.
    fn next_byte(&mut self) -> Result<Option<u8>> {
        match self.state {
            DecodeState::Active => {}
            DecodeState::Ended => return Ok(None),
            DecodeState::Failed => {
                return Err(PpmdError::corrupt(self.total_out, CorruptKind::InvalidSymbol))
            }
        }
        let symbol = self.model.decode_symbol(&mut self.rc);
        if self.rc.get_ref().eof_hits() > 0 {
            return Err(self.fail(CorruptKind::Truncated));
        }
        match symbol {
            Symbol::Byte(b) => {
                self.total_out += 1;
                Ok(Some(b))
            }
            Symbol::EndOfStream => {
                self.state = DecodeState::Ended;
                Ok(None)
            }
            Symbol::Error => Err(self.fail(CorruptKind::InvalidSymbol)),
        }
    }

    /// Fills `buf` until it is full or the end mark is reached. Returns the
    /// number of bytes written; 0 means the stream has ended.
    pub fn decode(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.next_byte()? {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    /// Decodes exactly `len` bytes. Meeting the end mark first is an error.
    pub fn decode_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0; len];
        let n = self.decode(&mut out)?;
        if n < len {
            return Err(self.fail(CorruptKind::Truncated));
        }
        Ok(out)
    }

    /// Checks that the range decoder ended exactly where the encoder
    /// flushed, and returns the source with any bytes that follow.
    pub fn finish(self) -> Result<R> {
        if self.state == DecodeState::Failed {
            return Err(PpmdError::corrupt(self.total_out, CorruptKind::InvalidSymbol));
        }
        if !self.rc.is_finished_ok() {
            warn!(
                variant = %C::VARIANT,
                offset = self.total_out,
                "range decoder not in final state"
            );
            return Err(PpmdError::corrupt(
                self.total_out,
                CorruptKind::TrailingGarbage,
            ));
        }
        Ok(self.rc.into_inner().into_inner())
    }
}

impl<C: Codec, R: ByteSource> io::Read for Decoder<C, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decode(buf).map_err(io::Error::from)
    }
}

/// [`Encoder`] over a runtime-selected variant.
pub enum AnyEncoder<W: ByteSink> {
    /// Variant H.
    H(Encoder<Ppmd7, W>),
    /// Variant I.
    I(Encoder<Ppmd8, W>),
}

impl<W: ByteSink> AnyEncoder<W> {
    /// Starts a stream on `sink` with an already built model.
    pub fn new(codec: AnyCodec, sink: W) -> Self {
        match codec {
            AnyCodec::H(m) => Self::H(Encoder::new(m, sink)),
            AnyCodec::I(m) => Self::I(Encoder::new(m, sink)),
        }
    }

    /// Builds the model from `options` and starts a stream on `sink`.
    pub fn with_options(options: &CodecOptions, sink: W) -> Result<Self> {
        Ok(Self::new(AnyCodec::new(options)?, sink))
    }

    /// Variant of the wrapped model.
    pub const fn variant(&self) -> Variant {
        match self {
            Self::H(_) => Variant::H,
            Self::I(_) => Variant::I,
        }
    }

    /// See [`Encoder::encode`].
    pub fn encode(&mut self, data: &[u8]) {
        match self {
            Self::H(e) => e.encode(data),
            Self::I(e) => e.encode(data),
        }
    }

    /// Bytes encoded so far.
    pub fn total_in(&self) -> u64 {
        match self {
            Self::H(e) => e.total_in(),
            Self::I(e) => e.total_in(),
        }
    }

    /// See [`Encoder::get_mut`].
    pub fn get_mut(&mut self) -> &mut W {
        match self {
            Self::H(e) => e.get_mut(),
            Self::I(e) => e.get_mut(),
        }
    }

    /// See [`Encoder::finish`].
    pub fn finish(self, end_mark: EndMark) -> W {
        match self {
            Self::H(e) => e.finish(end_mark),
            Self::I(e) => e.finish(end_mark),
        }
    }
}

impl<W: ByteSink> io::Write for AnyEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encode(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// [`Decoder`] over a runtime-selected variant.
pub enum AnyDecoder<R: ByteSource> {
    /// Variant H.
    H(Decoder<Ppmd7, R>),
    /// Variant I.
    I(Decoder<Ppmd8, R>),
}

impl<R: ByteSource> AnyDecoder<R> {
    /// Primes an already built model from `source`.
    pub fn new(codec: AnyCodec, source: R) -> Result<Self> {
        Ok(match codec {
            AnyCodec::H(m) => Self::H(Decoder::new(m, source)?),
            AnyCodec::I(m) => Self::I(Decoder::new(m, source)?),
        })
    }

    /// Builds the model from `options` and primes it from `source`.
    pub fn with_options(options: &CodecOptions, source: R) -> Result<Self> {
        Self::new(AnyCodec::new(options)?, source)
    }

    /// See [`Decoder::decode`].
    pub fn decode(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::H(d) => d.decode(buf),
            Self::I(d) => d.decode(buf),
        }
    }

    /// See [`Decoder::decode_exact`].
    pub fn decode_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        match self {
            Self::H(d) => d.decode_exact(len),
            Self::I(d) => d.decode_exact(len),
        }
    }

    /// Decoded bytes so far.
    pub fn total_out(&self) -> u64 {
        match self {
            Self::H(d) => d.total_out(),
            Self::I(d) => d.total_out(),
        }
    }

    /// Whether the end mark has been decoded.
    pub fn is_ended(&self) -> bool {
        match self {
            Self::H(d) => d.is_ended(),
            Self::I(d) => d.is_ended(),
        }
    }

    /// See [`Decoder::get_mut`].
    pub fn get_mut(&mut self) -> &mut R {
        match self {
            Self::H(d) => d.get_mut(),
            Self::I(d) => d.get_mut(),
        }
    }

    /// See [`Decoder::finish`].
    pub fn finish(self) -> Result<R> {
        match self {
            Self::H(d) => d.finish(),
            Self::I(d) => d.finish(),
        }
    }
}

impl<R: ByteSource> io::Read for AnyDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decode(buf).map_err(io::Error::from)
    }
}

/// Compresses `data` into a stream terminated by the end mark.
pub fn compress(options: &CodecOptions, data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = AnyEncoder::with_options(options, Vec::with_capacity(data.len() / 2 + 16))?;
    enc.encode(data);
    Ok(enc.finish(EndMark::Write))
}

/// Compresses `data` without an end mark. The length has to travel out of
/// band, as in 7z archives.
pub fn compress_raw(options: &CodecOptions, data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = AnyEncoder::with_options(options, Vec::with_capacity(data.len() / 2 + 16))?;
    enc.encode(data);
    Ok(enc.finish(EndMark::Omit))
}

/// Decompresses a stream produced by [`compress`]. Bytes after the end of
/// the stream are rejected.
pub fn decompress(options: &CodecOptions, data: &[u8]) -> Result<Vec<u8>> {
    let mut dec = AnyDecoder::with_options(options, SliceSource::new(data))?;
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut buf = [0u8; 4096];
    loop {
        let n = dec.decode(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    let rest = dec.finish()?;
    if !rest.remaining().is_empty() {
        return Err(PpmdError::corrupt(
            out.len() as u64,
            CorruptKind::TrailingGarbage,
        ));
    }
    Ok(out)
}

/// Decompresses `len` bytes from a stream produced by [`compress_raw`].
pub fn decompress_exact(options: &CodecOptions, data: &[u8], len: usize) -> Result<Vec<u8>> {
    let mut dec = AnyDecoder::with_options(options, SliceSource::new(data))?;
    let out = dec.decode_exact(len)?;
    dec.finish()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::codec::RestoreMethod;

    const SAMPLE: &[u8] = b"It was the best of times, it was the worst of times, \
        it was the age of wisdom, it was the age of foolishness";

    fn all_options() -> [CodecOptions; 3] {
        [
            CodecOptions::ppmd7(6, 1 << 20),
            CodecOptions::ppmd8(6, 1 << 20, RestoreMethod::Restart),
            CodecOptions::ppmd8(6, 1 << 20, RestoreMethod::CutOff),
        ]
    }

    #[test]
    fn test_compress_decompress() {
        for opts in all_options() {
            let packed = compress(&opts, SAMPLE).unwrap();
            assert!(packed.len() < SAMPLE.len());
            assert_eq!(decompress(&opts, &packed).unwrap(), SAMPLE);
        }
    }

    #[test]
    fn test_raw_roundtrip() {
        for opts in all_options() {
            let packed = compress_raw(&opts, SAMPLE).unwrap();
            let out = decompress_exact(&opts, &packed, SAMPLE.len()).unwrap();
            assert_eq!(out, SAMPLE);
        }
    }

    #[test]
    fn test_chunked_encode_matches_single_call() {
        for opts in all_options() {
            let whole = compress(&opts, SAMPLE).unwrap();
            let mut enc = AnyEncoder::with_options(&opts, Vec::new()).unwrap();
            for chunk in SAMPLE.chunks(7) {
                enc.encode(chunk);
            }
            assert_eq!(enc.total_in(), SAMPLE.len() as u64);
            assert_eq!(enc.finish(EndMark::Write), whole);
        }
    }

    #[test]
    fn test_truncated_stream_is_reported() {
        for opts in all_options() {
            let packed = compress(&opts, SAMPLE).unwrap();
            let err = decompress(&opts, &packed[..packed.len() - 1]).unwrap_err();
            assert!(matches!(
                err,
                PpmdError::StreamCorrupt {
                    reason: CorruptKind::Truncated,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let opts = CodecOptions::default();
        let mut packed = compress(&opts, SAMPLE).unwrap();
        packed.push(0x5A);
        assert!(matches!(
            decompress(&opts, &packed),
            Err(PpmdError::StreamCorrupt {
                reason: CorruptKind::TrailingGarbage,
                ..
            })
        ));
    }

    #[test]
    fn test_short_priming() {
        let opts = CodecOptions::ppmd7(6, 1 << 20);
        assert!(matches!(
            decompress(&opts, &[0, 0]),
            Err(PpmdError::StreamCorrupt {
                offset: 0,
                reason: CorruptKind::Truncated
            })
        ));
        assert!(matches!(
            decompress(&opts, &[7, 0, 0, 0, 0]),
            Err(PpmdError::StreamCorrupt {
                reason: CorruptKind::BadPriming,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_exact_past_end_mark() {
        let opts = CodecOptions::ppmd7(4, 1 << 16);
        let packed = compress(&opts, b"abc").unwrap();
        let mut dec = AnyDecoder::with_options(&opts, SliceSource::new(&packed)).unwrap();
        assert!(matches!(
            dec.decode_exact(4),
            Err(PpmdError::StreamCorrupt {
                offset: 3,
                reason: CorruptKind::Truncated
            })
        ));
    }

    #[test]
    fn test_io_traits() {
        let model = Ppmd8::new(5, 1 << 18, RestoreMethod::Restart).unwrap();
        let mut enc = Encoder::new(model, Vec::new());
        enc.write_all(SAMPLE).unwrap();
        enc.flush().unwrap();
        let packed = enc.finish(EndMark::Write);

        let model = Ppmd8::new(5, 1 << 18, RestoreMethod::Restart).unwrap();
        let mut dec = Decoder::new(model, SliceSource::new(&packed)).unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, SAMPLE);
        assert!(dec.is_ended());
        assert_eq!(dec.total_out(), SAMPLE.len() as u64);
        assert!(dec.finish().unwrap().remaining().is_empty());
    }

    #[test]
    fn test_stream_followed_by_other_data() {
        let opts = CodecOptions::ppmd7(6, 1 << 18);
        let mut packed = compress(&opts, SAMPLE).unwrap();
        packed.extend_from_slice(b"tail");
        let mut dec = AnyDecoder::with_options(&opts, SliceSource::new(&packed)).unwrap();
        let mut out = vec![0; SAMPLE.len() + 10];
        let n = dec.decode(&mut out).unwrap();
        assert_eq!(&out[..n], SAMPLE);
        assert_eq!(dec.finish().unwrap().remaining(), b"tail");
    }
}
