use bytemuck::{Pod, Zeroable};

use crate::BlockGrid;

/// Uniform record read by every invocation of the compute shader.
///
/// The size must stay a multiple of 16 bytes to be bindable as a uniform buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DispatchConstants {
    /// Width of the source image in texels.
    pub texel_width: u32,
    /// Height of the source image in texels.
    pub texel_height: u32,
    /// Number of block columns.
    pub blocks_x: u32,
    /// Index of the first block written by the dispatch inside the output buffer.
    pub block_offset: u32,
}

const _: () = assert!(size_of::<DispatchConstants>() % 16 == 0);

impl DispatchConstants {
    pub fn new(grid: &BlockGrid, block_offset: u32) -> Self {
        Self {
            texel_width: grid.width(),
            texel_height: grid.height(),
            blocks_x: grid.blocks_x(),
            block_offset,
        }
    }
}
