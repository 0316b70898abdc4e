//! Error types for PPMd model construction and stream coding.
//!
//! This module provides the [`PpmdError`] type, which covers every failure
//! the codec can report to its host.
//!
//! ## Error Categories
//!
//! | Category | Errors | Description |
//! |----------|--------|-------------|
//! | Parameters | [`InvalidOrder`], [`InvalidMemorySize`] | Rejected at construction, before any memory is reserved |
//! | Memory | [`OutOfMemory`] | The [`Allocator`] could not provide the arena |
//! | Stream | [`StreamCorrupt`] | Priming failed, a symbol could not be resolved, or input ended early |
//! | I/O | [`Io`] | Errors raised by `std::io` adapters |
//!
//! Running out of arena space while coding is *not* an error: the model
//! restarts (variant H) or restores itself (variant I) and carries on.
//! Reaching the end mark is not an error either; decoders report it as
//! [`Symbol::EndOfStream`].
//!
//! ## Example
//!
//! ```rust
//! use ppmd_stream::{Ppmd7, PpmdError};
//!
//! match Ppmd7::new(1, 16 << 20) {
//!     Err(PpmdError::InvalidOrder { order, min, .. }) => assert!(order < min),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```
//!
//! [`InvalidOrder`]: PpmdError::InvalidOrder
//! [`InvalidMemorySize`]: PpmdError::InvalidMemorySize
//! [`OutOfMemory`]: PpmdError::OutOfMemory
//! [`StreamCorrupt`]: PpmdError::StreamCorrupt
//! [`Io`]: PpmdError::Io
//! [`Allocator`]: crate::Allocator
//! [`Symbol::EndOfStream`]: crate::Symbol::EndOfStream

use std::fmt;
use std::io;

/// Why a compressed stream was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptKind {
    /// The range decoder could not be primed from the first bytes.
    BadPriming,
    /// The decoded cumulative count fell outside every interval.
    InvalidSymbol,
    /// The source ran dry before the stream was complete.
    Truncated,
    /// The range decoder did not end in its final state.
    TrailingGarbage,
}

impl fmt::Display for CorruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadPriming => "bad range coder priming",
            Self::InvalidSymbol => "symbol outside of every interval",
            Self::Truncated => "input ended early",
            Self::TrailingGarbage => "range coder not in final state",
        };
        f.write_str(s)
    }
}

/// Error type for PPMd operations.
#[derive(Debug, thiserror::Error)]
pub enum PpmdError {
    /// The model order is outside the legal range of the variant.
    ///
    /// Variant H accepts `2..=64`, variant I accepts `2..=16`.
    #[error("invalid model order {order} (allowed {min}..={max})")]
    InvalidOrder {
        /// Requested order.
        order: u32,
        /// Smallest legal order.
        min: u32,
        /// Largest legal order.
        max: u32,
    },

    /// The arena size is outside the legal range.
    #[error("invalid memory size {size} (allowed {min}..={max})")]
    InvalidMemorySize {
        /// Requested arena size in bytes.
        size: u32,
        /// Smallest legal size.
        min: u32,
        /// Largest legal size.
        max: u32,
    },

    /// The allocator refused to provide the arena.
    #[error("cannot allocate a {requested} byte arena")]
    OutOfMemory {
        /// Arena size that was requested.
        requested: usize,
    },

    /// The compressed stream is malformed or incomplete.
    ///
    /// Output produced before this error is still valid.
    #[error("corrupt stream after {offset} decoded bytes: {reason}")]
    StreamCorrupt {
        /// Number of bytes decoded successfully before the failure.
        offset: u64,
        /// What went wrong.
        reason: CorruptKind,
    },

    /// An I/O error occurred in a `std::io` adapter.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PpmdError {
    pub(crate) const fn corrupt(offset: u64, reason: CorruptKind) -> Self {
        Self::StreamCorrupt { offset, reason }
    }
}

impl From<PpmdError> for io::Error {
    fn from(err: PpmdError) -> Self {
        match err {
            PpmdError::Io(e) => e,
            PpmdError::StreamCorrupt { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            PpmdError::OutOfMemory { .. } => io::Error::new(io::ErrorKind::OutOfMemory, err),
            _ => io::Error::new(io::ErrorKind::InvalidInput, err),
        }
    }
}

/// Result type for PPMd operations.
pub type Result<T> = std::result::Result<T, PpmdError>;
