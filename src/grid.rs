use crate::{BlockFootprint, Error, Result, BLOCK_BYTES, WORKGROUP_BLOCKS};

/// Block layout of an image for a given footprint.
///
/// Partial blocks at the right and bottom border are counted as full blocks; their texels
/// outside of the image replicate the last valid column and row.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BlockGrid {
    width: u32,
    height: u32,
    footprint: BlockFootprint,
    blocks_x: u32,
    blocks_y: u32,
}

impl BlockGrid {
    /// Plans the block grid of a `width` x `height` texel image.
    pub fn new(width: u32, height: u32, footprint: BlockFootprint) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimension { width, height });
        }

        Ok(Self {
            width,
            height,
            footprint,
            blocks_x: width.div_ceil(footprint.width()),
            blocks_y: height.div_ceil(footprint.height()),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn footprint(&self) -> BlockFootprint {
        self.footprint
    }

    /// Number of block columns.
    pub fn blocks_x(&self) -> u32 {
        self.blocks_x
    }

    /// Number of block rows.
    pub fn blocks_y(&self) -> u32 {
        self.blocks_y
    }

    pub fn block_count(&self) -> usize {
        self.blocks_x as usize * self.blocks_y as usize
    }

    /// Size of the compressed blocks in bytes.
    pub fn blocks_byte_size(&self) -> usize {
        self.block_count() * BLOCK_BYTES
    }

    /// Workgroups to dispatch in x and y, each covering 8x8 blocks.
    pub fn workgroups(&self) -> (u32, u32) {
        (
            self.blocks_x.div_ceil(WORKGROUP_BLOCKS),
            self.blocks_y.div_ceil(WORKGROUP_BLOCKS),
        )
    }

    /// Byte range of the block at (`bx`, `by`) inside the result buffer.
    pub fn block_range(&self, bx: u32, by: u32) -> std::ops::Range<usize> {
        debug_assert!(bx < self.blocks_x && by < self.blocks_y);
        let start = (by as usize * self.blocks_x as usize + bx as usize) * BLOCK_BYTES;
        start..start + BLOCK_BYTES
    }
}
