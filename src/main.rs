//! `ppmd` - compress or extract a raw PPMd stream.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ppmd_stream::io::{ByteSource, ReadSource, WriteSink};
use ppmd_stream::stream::{AnyDecoder, AnyEncoder, EndMark};
use ppmd_stream::{CodecOptions, RestoreMethod, Variant};

const SUFFIX: &str = "ppmd";

/// Compress TARGET to TARGET.ppmd, or extract it with -x.
///
/// The stream carries no header: extraction needs the same model
/// parameters that were used for compression.
#[derive(Parser)]
#[command(name = "ppmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extract instead of compress
    #[arg(short = 'x')]
    extract: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// PPMd variant
    #[arg(long, value_enum, default_value = "i")]
    variant: VariantArg,

    /// Model order
    #[arg(long, default_value = "6")]
    order: u32,

    /// Model memory in MiB
    #[arg(long, default_value = "8")]
    memory: u32,

    /// What variant I does when its memory is full
    #[arg(long, value_enum, default_value = "restart")]
    restore: RestoreArg,

    target: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    H,
    I,
}

#[derive(Clone, Copy, ValueEnum)]
enum RestoreArg {
    Restart,
    CutOff,
}

impl Cli {
    fn options(&self) -> Result<CodecOptions> {
        let memory_size = self
            .memory
            .checked_mul(1 << 20)
            .with_context(|| format!("--memory {} MiB is too large", self.memory))?;
        let options = CodecOptions {
            variant: match self.variant {
                VariantArg::H => Variant::H,
                VariantArg::I => Variant::I,
            },
            order: self.order,
            memory_size,
            restore_method: match self.restore {
                RestoreArg::Restart => RestoreMethod::Restart,
                RestoreArg::CutOff => RestoreMethod::CutOff,
            },
        };
        options.validate()?;
        Ok(options)
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `name.ppmd` -> `name`, anything else -> `name.orig`.
fn extracted_path(target: &Path) -> PathBuf {
    if target.extension() == Some(OsStr::new(SUFFIX)) {
        target.with_extension("")
    } else {
        let mut name = target.as_os_str().to_owned();
        name.push(".orig");
        PathBuf::from(name)
    }
}

fn compressed_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(SUFFIX);
    PathBuf::from(name)
}

fn compress(target: &Path, options: &CodecOptions) -> Result<()> {
    let dst = compressed_path(target);
    let mut input = BufReader::new(
        File::open(target).with_context(|| format!("cannot open {}", target.display()))?,
    );
    let output = File::create(&dst).with_context(|| format!("cannot create {}", dst.display()))?;

    let mut enc = AnyEncoder::with_options(options, WriteSink::new(output))?;
    let mut block = vec![0u8; 64 * 1024];
    loop {
        let n = input.read(&mut block)?;
        if n == 0 {
            break;
        }
        enc.encode(&block[..n]);
    }
    let total_in = enc.total_in();
    enc.finish(EndMark::Write)
        .finish()
        .with_context(|| format!("cannot write {}", dst.display()))?;

    info!(src = %target.display(), dst = %dst.display(), bytes = total_in, "compressed");
    Ok(())
}

fn extract(target: &Path, options: &CodecOptions) -> Result<()> {
    let dst = extracted_path(target);
    if dst == target {
        bail!("refusing to overwrite {}", target.display());
    }
    let input = File::open(target).with_context(|| format!("cannot open {}", target.display()))?;
    let mut output = BufWriter::new(
        File::create(&dst).with_context(|| format!("cannot create {}", dst.display()))?,
    );

    let mut dec = AnyDecoder::with_options(options, ReadSource::new(input))?;
    let total_out = decode_into(&mut dec, &mut output, target)?;
    output.flush()?;

    let mut source = dec
        .finish()
        .with_context(|| format!("cannot decode {}", target.display()))?;
    let trailing = source.read_byte().is_some();
    if let Some(err) = source.take_error() {
        return Err(err).with_context(|| format!("cannot read {}", target.display()));
    }
    if trailing {
        bail!("{} has data after the end of the stream", target.display());
    }

    info!(src = %target.display(), dst = %dst.display(), bytes = total_out, "extracted");
    Ok(())
}

/// Decodes everything up to the end mark into `output`. A decode failure
/// caused by a read error reports the read error.
fn decode_into<R: Read, W: Write>(
    dec: &mut AnyDecoder<ReadSource<R>>,
    output: &mut W,
    target: &Path,
) -> Result<u64> {
    let mut block = vec![0u8; 64 * 1024];
    loop {
        let n = match dec.decode(&mut block) {
            Ok(n) => n,
            Err(err) => {
                if let Some(io_err) = dec.get_mut().take_error() {
                    return Err(io_err).with_context(|| format!("cannot read {}", target.display()));
                }
                return Err(err).with_context(|| format!("cannot decode {}", target.display()));
            }
        };
        if n == 0 {
            return Ok(dec.total_out());
        }
        output.write_all(&block[..n])?;
    }
}

fn run(cli: &Cli) -> Result<()> {
    let options = cli.options()?;
    if cli.extract {
        extract(&cli.target, &options)
    } else {
        compress(&cli.target, &options)
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(&cli) {
        eprintln!("ppmd: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_names() {
        assert_eq!(
            extracted_path(Path::new("dir/data.ppmd")),
            PathBuf::from("dir/data")
        );
        assert_eq!(
            extracted_path(Path::new("data.bin")),
            PathBuf::from("data.bin.orig")
        );
        assert_eq!(
            compressed_path(Path::new("notes.txt")),
            PathBuf::from("notes.txt.ppmd")
        );
    }

    /// Yields `data`, then fails once `limit` bytes have been read.
    struct FailingReader {
        data: Vec<u8>,
        pos: usize,
        limit: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.limit {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
            }
            let end = self.data.len().min(self.limit).min(self.pos + buf.len());
            let n = end - self.pos;
            buf[..n].copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(n)
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ppmd-cli-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_read_error_is_reported() {
        let opts = CodecOptions::default();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7919 % 251) as u8).collect();
        let packed = ppmd_stream::compress(&opts, &data).unwrap();
        let reader = FailingReader {
            limit: packed.len() / 2,
            data: packed,
            pos: 0,
        };

        let mut dec = AnyDecoder::with_options(&opts, ReadSource::new(reader)).unwrap();
        let err = decode_into(&mut dec, &mut Vec::new(), Path::new("in.ppmd")).unwrap_err();
        assert!(format!("{err:#}").contains("disk on fire"), "{err:#}");
        assert!(format!("{err:#}").contains("cannot read in.ppmd"), "{err:#}");
    }

    #[test]
    fn test_extract_rejects_trailing_data() {
        let opts = CodecOptions::default();
        let target = temp_path("trailing.ppmd");
        let mut packed = ppmd_stream::compress(&opts, b"some text, some text").unwrap();
        std::fs::write(&target, &packed).unwrap();
        extract(&target, &opts).unwrap();
        assert_eq!(
            std::fs::read(extracted_path(&target)).unwrap(),
            b"some text, some text"
        );

        packed.extend_from_slice(b"junk");
        std::fs::write(&target, &packed).unwrap();
        let err = extract(&target, &opts).unwrap_err();
        assert!(format!("{err:#}").contains("data after the end"), "{err:#}");

        let _ = std::fs::remove_file(extracted_path(&target));
        let _ = std::fs::remove_file(&target);
    }

    #[test]
    fn test_default_options() {
        let cli = Cli::parse_from(["ppmd", "file"]);
        let opts = cli.options().unwrap();
        assert_eq!(opts, CodecOptions::ppmd8(6, 8 << 20, RestoreMethod::Restart));
        assert!(!cli.extract);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "ppmd", "-x", "-vv", "--variant", "h", "--order", "32", "--memory", "64", "x.ppmd",
        ]);
        assert!(cli.extract);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.options().unwrap(), CodecOptions::ppmd7(32, 64 << 20));

        let cli = Cli::parse_from(["ppmd", "--order", "20", "f"]);
        assert!(cli.options().is_err());
        let cli = Cli::parse_from(["ppmd", "--restore", "cut-off", "f"]);
        assert_eq!(cli.options().unwrap().restore_method, RestoreMethod::CutOff);
    }
}
