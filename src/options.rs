//! Codec parameters and runtime variant selection.
//!
//! Both sides of a stream must agree on every field of [`CodecOptions`];
//! nothing about them is stored in the compressed bytes.

use std::sync::Arc;

use crate::alloc::{Allocator, HeapAllocator};
use crate::codec::{ppmd7, ppmd8, Ppmd7, Ppmd8, RestoreMethod, Variant};
use crate::error::{PpmdError, Result};
use crate::codec::{MAX_MEMORY_SIZE, MIN_MEMORY_SIZE};

/// Model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecOptions {
    /// Which PPMd flavour to run.
    pub variant: Variant,
    /// Model order.
    pub order: u32,
    /// Arena size in bytes.
    pub memory_size: u32,
    /// Variant I only; ignored by variant H, which always restarts.
    pub restore_method: RestoreMethod,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self::ppmd8(6, 16 << 20, RestoreMethod::Restart)
    }
}

impl CodecOptions {
    /// Variant H parameters.
    pub const fn ppmd7(order: u32, memory_size: u32) -> Self {
        Self {
            variant: Variant::H,
            order,
            memory_size,
            restore_method: RestoreMethod::Restart,
        }
    }

    /// Variant I parameters.
    pub const fn ppmd8(order: u32, memory_size: u32, restore_method: RestoreMethod) -> Self {
        Self {
            variant: Variant::I,
            order,
            memory_size,
            restore_method,
        }
    }

    /// Legal order range of the selected variant.
    pub const fn order_range(&self) -> (u32, u32) {
        match self.variant {
            Variant::H => (ppmd7::MIN_ORDER, ppmd7::MAX_ORDER),
            Variant::I => (ppmd8::MIN_ORDER, ppmd8::MAX_ORDER),
        }
    }

    /// Checks the parameters without reserving any memory.
    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.order_range();
        if !(min..=max).contains(&self.order) {
            return Err(PpmdError::InvalidOrder {
                order: self.order,
                min,
                max,
            });
        }
        if !(MIN_MEMORY_SIZE..=MAX_MEMORY_SIZE).contains(&self.memory_size) {
            return Err(PpmdError::InvalidMemorySize {
                size: self.memory_size,
                min: MIN_MEMORY_SIZE,
                max: MAX_MEMORY_SIZE,
            });
        }
        Ok(())
    }
}

/// A model of either variant, chosen at runtime.
pub enum AnyCodec {
    /// Variant H.
    H(Ppmd7),
    /// Variant I.
    I(Ppmd8),
}

impl AnyCodec {
    /// Builds the model described by `options` on the process heap.
    pub fn new(options: &CodecOptions) -> Result<Self> {
        Self::with_allocator(options, Arc::new(HeapAllocator))
    }

    /// Builds the model described by `options` with a custom arena
    /// allocator.
    pub fn with_allocator(options: &CodecOptions, allocator: Arc<dyn Allocator>) -> Result<Self> {
        options.validate()?;
        Ok(match options.variant {
            Variant::H => Self::H(Ppmd7::with_allocator(
                options.order,
                options.memory_size,
                allocator,
            )?),
            Variant::I => Self::I(Ppmd8::with_allocator(
                options.order,
                options.memory_size,
                options.restore_method,
                allocator,
            )?),
        })
    }

    /// Variant of the wrapped model.
    pub const fn variant(&self) -> Variant {
        match self {
            Self::H(_) => Variant::H,
            Self::I(_) => Variant::I,
        }
    }

    /// Times the model restarted on a full arena.
    pub const fn restarts(&self) -> u64 {
        match self {
            Self::H(m) => m.restarts(),
            Self::I(m) => m.restarts(),
        }
    }
}

impl std::fmt::Debug for AnyCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyCodec")
            .field("variant", &self.variant())
            .field("restarts", &self.restarts())
            .finish()
    }
}
