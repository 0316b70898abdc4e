//! Byte-level source and sink capabilities.
//!
//! The range coders pull and push single bytes through [`ByteSource`] and
//! [`ByteSink`]. Neither trait reports errors: a source signals "no more
//! input" with `None` (EOF and transport failure look the same), and a sink
//! is fire-and-forget. Adapters that wrap `std::io` keep the first error so
//! the host can inspect it afterwards.
//!
//! | Adapter | Direction | Backing |
//! |---------|-----------|---------|
//! | [`SliceSource`] | source | `&[u8]` |
//! | [`ReadSource`] | source | any [`std::io::Read`], buffered |
//! | [`FnSource`] | source | `FnMut() -> Option<u8>` |
//! | `Vec<u8>` | sink | appends |
//! | [`WriteSink`] | sink | any [`std::io::Write`], buffered |
//! | [`FnSink`] | sink | `FnMut(u8)` |

use std::io::{self, Read, Write};

/// Buffer size used by the `std::io` adapters.
const IO_BUFFER_SIZE: usize = 16 * 1024;

/// Supplies bytes to a decoder, one at a time.
pub trait ByteSource {
    /// Returns the next byte, or `None` once the input is exhausted or has
    /// failed.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Receives bytes from an encoder, one at a time.
pub trait ByteSink {
    /// Writes one byte.
    fn write_byte(&mut self, byte: u8);
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    #[inline]
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }
}

impl<T: ByteSink + ?Sized> ByteSink for &mut T {
    #[inline]
    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte);
    }
}

impl ByteSink for Vec<u8> {
    #[inline]
    fn write_byte(&mut self, byte: u8) {
        self.push(byte);
    }
}

/// Reads from an in-memory slice.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    /// Creates a source positioned at the start of `data`.
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not read yet.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

impl ByteSource for SliceSource<'_> {
    #[inline]
    fn read_byte(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }
}

/// Buffered adapter over any [`Read`].
///
/// An I/O error ends the input; it is kept and can be retrieved with
/// [`ReadSource::take_error`].
#[derive(Debug)]
pub struct ReadSource<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    done: bool,
    error: Option<io::Error>,
}

impl<R: Read> ReadSource<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; IO_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            done: false,
            error: None,
        }
    }

    /// Takes the I/O error that ended the input, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Returns the wrapped reader. Buffered bytes that were not consumed
    /// are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn refill(&mut self) -> bool {
        loop {
            match self.inner.read(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return false;
                }
                Ok(n) => {
                    self.pos = 0;
                    self.len = n;
                    return true;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.error = Some(e);
                    self.done = true;
                    return false;
                }
            }
        }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    #[inline]
    fn read_byte(&mut self) -> Option<u8> {
        if self.pos == self.len && (self.done || !self.refill()) {
            return None;
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Some(byte)
    }
}

/// Buffered adapter over any [`Write`].
///
/// The first write error is kept; later bytes are discarded. Call
/// [`WriteSink::finish`] to flush and surface it.
#[derive(Debug)]
pub struct WriteSink<W: Write> {
    inner: W,
    buf: Vec<u8>,
    error: Option<io::Error>,
}

impl<W: Write> WriteSink<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(IO_BUFFER_SIZE),
            error: None,
        }
    }

    /// Takes the first write error, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Writes out buffered bytes.
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.inner.write_all(&self.buf)?;
        self.buf.clear();
        self.inner.flush()
    }

    /// Flushes and returns the wrapped writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    fn drain(&mut self) {
        if let Err(e) = self.inner.write_all(&self.buf) {
            self.error = Some(e);
        }
        self.buf.clear();
    }
}

impl<W: Write> ByteSink for WriteSink<W> {
    #[inline]
    fn write_byte(&mut self, byte: u8) {
        if self.error.is_some() {
            return;
        }
        self.buf.push(byte);
        if self.buf.len() == IO_BUFFER_SIZE {
            self.drain();
        }
    }
}

/// Source backed by a closure.
pub struct FnSource<F>(pub F);

impl<F: FnMut() -> Option<u8>> ByteSource for FnSource<F> {
    #[inline]
    fn read_byte(&mut self) -> Option<u8> {
        (self.0)()
    }
}

/// Sink backed by a closure.
pub struct FnSink<F>(pub F);

impl<F: FnMut(u8)> ByteSink for FnSink<F> {
    #[inline]
    fn write_byte(&mut self, byte: u8) {
        (self.0)(byte);
    }
}

/// Counts reads and EOF hits of the wrapped source.
///
/// The decoders feed zeros once the source is dry; the stream layer uses
/// the EOF count to tell a complete stream from a truncated one.
#[derive(Debug)]
pub(crate) struct Tracked<R> {
    inner: R,
    eof_hits: u64,
}

impl<R: ByteSource> Tracked<R> {
    pub(crate) const fn new(inner: R) -> Self {
        Self { inner, eof_hits: 0 }
    }

    pub(crate) const fn eof_hits(&self) -> u64 {
        self.eof_hits
    }

    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ByteSource> ByteSource for Tracked<R> {
    #[inline]
    fn read_byte(&mut self) -> Option<u8> {
        let byte = self.inner.read_byte();
        if byte.is_none() {
            self.eof_hits += 1;
        }
        byte
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    impl Write for Failing {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_slice_source() {
        let mut src = SliceSource::new(&[1, 2]);
        assert_eq!(src.read_byte(), Some(1));
        assert_eq!(src.remaining(), &[2]);
        assert_eq!(src.read_byte(), Some(2));
        assert_eq!(src.read_byte(), None);
        assert_eq!(src.read_byte(), None);
        assert_eq!(src.position(), 2);
    }

    #[test]
    fn test_read_source_spans_buffers() {
        let data: Vec<u8> = (0..IO_BUFFER_SIZE * 2 + 7).map(|i| i as u8).collect();
        let mut src = ReadSource::new(data.as_slice());
        let mut out = Vec::new();
        while let Some(b) = src.read_byte() {
            out.push(b);
        }
        assert_eq!(out, data);
        assert!(src.take_error().is_none());
    }

    #[test]
    fn test_read_source_keeps_error() {
        let mut src = ReadSource::new(Failing);
        assert_eq!(src.read_byte(), None);
        let err = src.take_error().expect("error kept");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_write_sink_flushes() {
        let mut sink = WriteSink::new(Vec::new());
        for i in 0..(IO_BUFFER_SIZE + 3) {
            sink.write_byte(i as u8);
        }
        let out = sink.finish().unwrap();
        assert_eq!(out.len(), IO_BUFFER_SIZE + 3);
        assert_eq!(out[IO_BUFFER_SIZE + 2], (IO_BUFFER_SIZE + 2) as u8);
    }

    #[test]
    fn test_write_sink_reports_error() {
        let mut sink = WriteSink::new(Failing);
        sink.write_byte(1);
        let err = sink.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_closures() {
        let mut n = 0u8;
        let mut src = FnSource(|| {
            n += 1;
            (n < 3).then_some(n)
        });
        assert_eq!(src.read_byte(), Some(1));
        assert_eq!(src.read_byte(), Some(2));
        assert_eq!(src.read_byte(), None);

        let mut seen = Vec::new();
        let mut sink = FnSink(|b| seen.push(b));
        sink.write_byte(9);
        assert_eq!(seen, vec![9]);
    }

    #[test]
    fn test_tracked_counts_eof() {
        let mut src = Tracked::new(SliceSource::new(&[5]));
        assert_eq!(src.read_byte(), Some(5));
        assert_eq!(src.eof_hits(), 0);
        assert_eq!(src.read_byte(), None);
        assert_eq!(src.read_byte(), None);
        assert_eq!(src.eof_hits(), 2);
    }
}
