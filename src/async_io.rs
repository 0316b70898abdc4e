//! Async file and stream helpers (requires the `async` feature).
//!
//! Coding itself stays synchronous. Compression codes each 16 KiB input
//! block into an in-memory sink and writes the produced bytes out
//! asynchronously. Decompression runs the decoder on the blocking pool and
//! exchanges 16 KiB blocks with it over bounded channels.

use std::io::{self, Read};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task;

use crate::error::{CorruptKind, PpmdError, Result};
use crate::io::{ByteSource, ReadSource};
use crate::options::CodecOptions;
use crate::stream::{AnyDecoder, AnyEncoder, EndMark};

/// Block size for reads and writes.
const BLOCK_SIZE: usize = 16 * 1024;

/// Blocks in flight per direction while decoding.
const CHANNEL_DEPTH: usize = 4;

/// Compresses everything `reader` yields into `writer`, terminated by the
/// end mark. Returns the compressed size.
pub async fn compress_reader<R, W>(
    reader: &mut R,
    writer: &mut W,
    options: &CodecOptions,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut enc = AnyEncoder::with_options(options, Vec::with_capacity(BLOCK_SIZE))?;
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut block).await?;
        if n == 0 {
            break;
        }
        enc.encode(&block[..n]);
        let coded = std::mem::take(enc.get_mut());
        if !coded.is_empty() {
            writer.write_all(&coded).await?;
            written += coded.len() as u64;
        }
    }

    let tail = enc.finish(EndMark::Write);
    writer.write_all(&tail).await?;
    writer.flush().await?;
    Ok(written + tail.len() as u64)
}

/// Decompresses a stream with an end mark from `reader` into `writer`.
/// Returns the decompressed size.
///
/// The pull decoder runs on the blocking pool. Compressed input reaches it
/// in 16 KiB blocks over a bounded channel and decoded blocks come back the
/// same way, so neither side is held in memory as a whole.
pub async fn decompress_reader<R, W>(
    reader: &mut R,
    writer: &mut W,
    options: &CodecOptions,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    options.validate()?;
    let (input_tx, input_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (output_tx, output_rx) = mpsc::channel(CHANNEL_DEPTH);
    let options = *options;
    let worker = task::spawn_blocking(move || decode_blocks(&options, input_rx, &output_tx));

    tokio::try_join!(feed(reader, input_tx), drain(output_rx, writer))?;
    let total = worker
        .await
        .map_err(|err| PpmdError::Io(io::Error::new(io::ErrorKind::Other, err)))??;
    writer.flush().await?;
    Ok(total)
}

/// Sends `reader` in blocks until EOF or until the decoder stops listening.
async fn feed<R: AsyncRead + Unpin>(reader: &mut R, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
    loop {
        let mut block = vec![0u8; BLOCK_SIZE];
        let n = reader.read(&mut block).await?;
        if n == 0 {
            return Ok(());
        }
        block.truncate(n);
        if tx.send(block).await.is_err() {
            return Ok(());
        }
    }
}

async fn drain<W: AsyncWrite + Unpin>(
    mut rx: mpsc::Receiver<Vec<u8>>,
    writer: &mut W,
) -> Result<()> {
    while let Some(block) = rx.recv().await {
        writer.write_all(&block).await?;
    }
    Ok(())
}

/// Runs on the blocking pool. Stops early if the output side went away.
fn decode_blocks(
    options: &CodecOptions,
    input: mpsc::Receiver<Vec<u8>>,
    output: &mpsc::Sender<Vec<u8>>,
) -> Result<u64> {
    let mut dec = AnyDecoder::with_options(options, ReadSource::new(BlockReader::new(input)))?;
    loop {
        let mut block = vec![0u8; BLOCK_SIZE];
        let n = dec.decode(&mut block)?;
        if n == 0 {
            break;
        }
        block.truncate(n);
        if output.blocking_send(block).is_err() {
            return Ok(dec.total_out());
        }
    }

    let total = dec.total_out();
    let mut rest = dec.finish()?;
    if rest.read_byte().is_some() {
        return Err(PpmdError::corrupt(total, CorruptKind::TrailingGarbage));
    }
    Ok(total)
}

/// Blocking [`Read`] over blocks arriving on a channel.
struct BlockReader {
    rx: mpsc::Receiver<Vec<u8>>,
    block: Vec<u8>,
    pos: usize,
}

impl BlockReader {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            block: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for BlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.block.len() {
            match self.rx.blocking_recv() {
                Some(block) => {
                    self.block = block;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Compresses the file at `src` into a new file at `dst`.
pub async fn compress_file(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    options: &CodecOptions,
) -> Result<u64> {
    options.validate()?;
    let mut input = File::open(src).await?;
    let mut output = File::create(dst).await?;
    compress_reader(&mut input, &mut output, options).await
}

/// Decompresses the file at `src` into a new file at `dst`.
pub async fn decompress_file(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
    options: &CodecOptions,
) -> Result<u64> {
    options.validate()?;
    let mut input = File::open(src).await?;
    let mut output = File::create(dst).await?;
    decompress_reader(&mut input, &mut output, options).await
}
