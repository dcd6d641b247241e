//! CPU based encoding.

mod astc;
pub(crate) mod common;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    encode::astc::{encode_block, Profile},
    BlockGrid, EncodeOption, Error, Result, BLOCK_BYTES,
};

/// Compresses raw RGBA8 data into ASTC blocks.
///
/// This runs the same per-block search as the compute shader of [`crate::AstcEncoder`], so it
/// can be used on machines without a GPU or to verify GPU results.
///
/// # Data Layout Requirements
/// The input data must be in RGBA8 format (8 bits per channel, 32 bits per pixel). The data is
/// expected to be in row-major order, with optional stride for padding between rows.
///
/// Width and height don't need to be multiples of the footprint. Partial blocks at the right
/// and bottom border replicate the last valid column and row.
///
/// # Buffer Requirements
/// The destination buffer must have exactly the size returned by
/// [`crate::BlockFootprint::blocks_byte_size()`]. Blocks are written row-major.
///
/// # Arguments
/// * `option` - Footprint and encoding profile
/// * `rgba_data` - Source RGBA8 pixel data
/// * `blocks_buffer` - Destination buffer for the compressed blocks
/// * `width` - Width of the image in pixels
/// * `height` - Height of the image in pixels
/// * `stride` - Number of bytes per row in the source data (for padding).
///   Must be `width * 4` for tightly packed RGBA data.
///
/// # Example
/// ```
/// use astc_compression::{encode::compress_rgba8, BlockFootprint, EncodeOption};
///
/// let rgba_data = vec![0u8; 64 * 64 * 4];
/// let option = EncodeOption::new(BlockFootprint::FourByFour);
///
/// let mut blocks_buffer = vec![0u8; option.footprint.blocks_byte_size(64, 64)];
/// compress_rgba8(option, &rgba_data, &mut blocks_buffer, 64, 64, 64 * 4).unwrap();
/// ```
pub fn compress_rgba8(
    option: EncodeOption,
    rgba_data: &[u8],
    blocks_buffer: &mut [u8],
    width: u32,
    height: u32,
    stride: u32,
) -> Result<()> {
    option.validate()?;
    let grid = BlockGrid::new(width, height, option.footprint)?;

    let stride = stride as usize;
    let required_input = (height as usize - 1) * stride + width as usize * 4;
    if stride < width as usize * 4 || rgba_data.len() < required_input {
        return Err(Error::InvalidDimension { width, height });
    }

    if blocks_buffer.len() != grid.blocks_byte_size() {
        return Err(Error::BlockDataSize {
            expected: grid.blocks_byte_size(),
            actual: blocks_buffer.len(),
        });
    }

    let profile = Profile::new(&option);
    let blocks_x = grid.blocks_x() as usize;

    tracing::debug!(
        "encoding {}x{} texels into {} {} blocks on the CPU",
        width,
        height,
        grid.block_count(),
        option.footprint
    );

    let encode = |(index, block): (usize, &mut [u8])| {
        let bx = (index % blocks_x) as u32;
        let by = (index / blocks_x) as u32;
        block.copy_from_slice(&encode_block(
            &profile, rgba_data, width, height, stride, bx, by,
        ));
    };

    #[cfg(feature = "rayon")]
    blocks_buffer
        .par_chunks_exact_mut(BLOCK_BYTES)
        .enumerate()
        .for_each(encode);

    #[cfg(not(feature = "rayon"))]
    blocks_buffer
        .chunks_exact_mut(BLOCK_BYTES)
        .enumerate()
        .for_each(encode);

    Ok(())
}

#[cfg(test)]
mod tests {
    use astc_decode::{astc_decode_block, Footprint};

    use super::{
        astc::{BlockEncoder, BlockTexels},
        *,
    };
    use crate::BlockFootprint;

    fn decode(block: &[u8], footprint: BlockFootprint) -> Vec<[u8; 4]> {
        let block: [u8; 16] = block.try_into().unwrap();
        let mut texels = vec![[0; 4]; footprint.texel_count()];
        let width = footprint.width();
        astc_decode_block(
            &block,
            Footprint::new(footprint.width(), footprint.height()),
            |x, y, color| texels[(y * width + x) as usize] = color,
        );
        texels
    }

    #[test]
    fn uniform_block_matches_general_path() {
        for footprint in [BlockFootprint::FourByFour, BlockFootprint::SixBySix] {
            for color in [[12, 200, 77, 255], [0, 0, 0, 255], [255, 255, 255, 255]] {
                let option = EncodeOption::new(footprint);
                let profile = Profile::new(&option);
                let size = footprint.width() as usize;
                let rgba: Vec<u8> = color.repeat(size * size);
                let texels = BlockTexels::load(
                    &profile,
                    &rgba,
                    footprint.width(),
                    footprint.height(),
                    size * 4,
                    0,
                    0,
                );

                let mut encoder = BlockEncoder::new(&profile, &texels);
                let void_extent = encoder.encode();
                let general = encoder.encode_general();
                assert_ne!(void_extent, general);

                let expected = vec![color; footprint.texel_count()];
                assert_eq!(decode(&void_extent, footprint), expected);
                assert_eq!(decode(&general, footprint), expected);
            }
        }
    }

    #[test]
    fn wrong_buffer_size_fails() {
        let rgba = vec![0u8; 8 * 8 * 4];
        let mut blocks = vec![0u8; 48];
        let result = compress_rgba8(EncodeOption::default(), &rgba, &mut blocks, 8, 8, 32);
        assert!(matches!(
            result,
            Err(Error::BlockDataSize {
                expected: 64,
                actual: 48
            })
        ));
    }

    #[test]
    fn short_input_fails() {
        let rgba = vec![0u8; 16];
        let mut blocks = vec![0u8; 16];
        let result = compress_rgba8(EncodeOption::default(), &rgba, &mut blocks, 4, 4, 16);
        assert!(matches!(result, Err(Error::InvalidDimension { .. })));
    }
}
