//! PPMd compression with byte-level streaming.
//!
//! Implements the two PPMd flavours found in the wild, bit-compatible with
//! 7-Zip:
//!
//! - **variant H** ([`Ppmd7`]), used by 7z archives;
//! - **variant I revision 1** ([`Ppmd8`]), used by ZIP method 98.
//!
//! A model pulls and pushes single bytes through [`io::ByteSource`] and
//! [`io::ByteSink`], and obtains its arena once from an [`Allocator`]. The
//! [`stream`] module layers chunked encoding, decoding, and truncation
//! checks on top.
//!
//! ```rust
//! use ppmd_stream::{compress, decompress, CodecOptions};
//!
//! let opts = CodecOptions::default();
//! let packed = compress(&opts, b"to be or not to be, that is the question")?;
//! let plain = decompress(&opts, &packed)?;
//! assert_eq!(plain, b"to be or not to be, that is the question");
//! # Ok::<(), ppmd_stream::PpmdError>(())
//! ```
//!
//! ## Features
//! - Core library depends only on `thiserror` and `tracing`
//! - `async` - Async file and stream helpers with tokio
//! - `parallel` - Code many independent buffers on a rayon pool
//! - `cli` - The `ppmd` command-line tool

pub mod alloc;
pub mod codec;
pub mod error;
pub mod io;
pub mod options;
pub mod stream;

#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub mod async_io;

#[cfg(feature = "parallel")]
#[cfg_attr(docsrs, doc(cfg(feature = "parallel")))]
pub mod batch;

pub use alloc::{Allocator, BudgetAllocator, HeapAllocator};
pub use codec::{Codec, Ppmd7, Ppmd8, RestoreMethod, Symbol, Variant};
pub use error::{CorruptKind, PpmdError, Result};
pub use options::{AnyCodec, CodecOptions};
pub use stream::{compress, compress_raw, decompress, decompress_exact, EndMark};
