//! Parallel coding of independent buffers (requires the `parallel` feature).
//!
//! Each buffer gets its own model; nothing is shared between them, so the
//! output is identical to coding the buffers one after another.

use rayon::prelude::*;

use crate::error::Result;
use crate::options::CodecOptions;
use crate::stream::{compress, decompress};

/// Compresses every buffer on the rayon pool. Output order follows input
/// order.
pub fn compress_all<T>(options: &CodecOptions, inputs: &[T]) -> Result<Vec<Vec<u8>>>
where
    T: AsRef<[u8]> + Sync,
{
    options.validate()?;
    inputs
        .par_iter()
        .map(|data| compress(options, data.as_ref()))
        .collect()
}

/// Decompresses every stream on the rayon pool. The first failure is
/// returned.
pub fn decompress_all<T>(options: &CodecOptions, inputs: &[T]) -> Result<Vec<Vec<u8>>>
where
    T: AsRef<[u8]> + Sync,
{
    options.validate()?;
    inputs
        .par_iter()
        .map(|data| decompress(options, data.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RestoreMethod;
    use crate::error::PpmdError;

    #[test]
    fn test_parallel_matches_sequential() {
        let inputs: Vec<Vec<u8>> = (0..16u8)
            .map(|i| (0..4000u32).map(|j| (j % (u32::from(i) + 3)) as u8 + b'a').collect())
            .collect();
        let opts = CodecOptions::ppmd8(6, 1 << 18, RestoreMethod::CutOff);

        let packed = compress_all(&opts, &inputs).unwrap();
        for (p, data) in packed.iter().zip(&inputs) {
            assert_eq!(p, &compress(&opts, data).unwrap());
        }
        assert_eq!(decompress_all(&opts, &packed).unwrap(), inputs);
    }

    #[test]
    fn test_corrupt_member_fails_batch() {
        let opts = CodecOptions::ppmd7(4, 1 << 16);
        let inputs = [b"first".as_slice(), b"second".as_slice()];
        let mut packed = compress_all(&opts, &inputs).unwrap();
        packed[1].pop();
        assert!(matches!(
            decompress_all(&opts, &packed),
            Err(PpmdError::StreamCorrupt { .. })
        ));
    }
}
