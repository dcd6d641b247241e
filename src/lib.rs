//! # astc_compression
//!
//! ASTC texture block compression using WGPU compute shader.
//!
//! Every compressed block covers a fixed footprint of texels and is stored in exactly 16 bytes.
//! The GPU encoder dispatches one invocation per block (8x8 blocks per workgroup) and writes
//! the blocks row-major into a single storage buffer, which can then be stored inside an
//! `.astc` container file.
//!
//! ## Supported block footprints
//!
//!  * 4x4 (8 bits per texel)
//!  * 6x6 (3.56 bits per texel)
//!
//! ## Features
//!
//!  * `wgpu` (default): the GPU encoder [`AstcEncoder`].
//!  * `rayon`: encodes blocks in parallel in the CPU encoder [`encode::compress_rgba8`].
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "wgpu")]
mod astc_encoder;
pub mod container;
pub mod encode;
mod error;
mod grid;
#[cfg(feature = "wgpu")]
mod readback;
mod settings;

#[cfg(feature = "wgpu")]
pub use astc_encoder::{encode_astc, AstcEncoder};
pub use error::{Error, Result};
pub use grid::BlockGrid;
#[cfg(feature = "wgpu")]
pub use readback::download_blocks;
pub use settings::DispatchConstants;

/// Size in bytes of a single compressed ASTC block, regardless of its footprint.
pub const BLOCK_BYTES: usize = 16;

/// Number of blocks per workgroup in each axis.
pub const WORKGROUP_BLOCKS: u32 = 8;

/// Texel footprint covered by one compressed block.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
pub enum BlockFootprint {
    /// 4x4 texels per block.
    #[default]
    FourByFour,
    /// 6x6 texels per block.
    SixBySix,
}

impl BlockFootprint {
    /// Width of the footprint in texels.
    pub const fn width(self) -> u32 {
        match self {
            BlockFootprint::FourByFour => 4,
            BlockFootprint::SixBySix => 6,
        }
    }

    /// Height of the footprint in texels.
    pub const fn height(self) -> u32 {
        match self {
            BlockFootprint::FourByFour => 4,
            BlockFootprint::SixBySix => 6,
        }
    }

    /// Returns the number of texels in one block.
    pub const fn texel_count(self) -> usize {
        (self.width() * self.height()) as usize
    }

    /// Returns the bytes per row of blocks for the given width.
    ///
    /// Width is rounded up to the next multiple of the footprint width.
    pub const fn bytes_per_row(self, width: u32) -> u32 {
        width.div_ceil(self.width()) * BLOCK_BYTES as u32
    }

    /// Returns the byte size required for storing compressed blocks for the given dimensions.
    ///
    /// Width and height are rounded up to the next multiple of the footprint.
    pub const fn blocks_byte_size(self, width: u32, height: u32) -> usize {
        let blocks_x = width.div_ceil(self.width()) as usize;
        let blocks_y = height.div_ceil(self.height()) as usize;
        blocks_x * blocks_y * BLOCK_BYTES
    }

    const fn name(self) -> &'static str {
        match self {
            BlockFootprint::FourByFour => "astc 4x4",
            BlockFootprint::SixBySix => "astc 6x6",
        }
    }
}

impl std::fmt::Display for BlockFootprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Selects the encoding profile of a compression.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, Default)]
pub struct EncodeOption {
    /// Block footprint.
    pub footprint: BlockFootprint,
    /// Encodes a tangent space normal map.
    ///
    /// X is taken from the red and Y from the green channel. The blocks are stored in the
    /// `rrrg` layout: decoded red, green and blue hold X and alpha holds Y. Z is expected to be
    /// reconstructed by the consumer.
    pub normal_map: bool,
    /// The alpha channel carries data and is part of the mode search.
    /// Without it, decoded alpha is always 255.
    pub has_alpha: bool,
    /// The texels are sRGB encoded. Color error is weighted by the sRGB transfer curve and the
    /// endpoints are expanded the way sRGB decoding expects.
    pub srgb: bool,
}

impl EncodeOption {
    /// Creates the default options for the given footprint.
    pub const fn new(footprint: BlockFootprint) -> Self {
        Self {
            footprint,
            normal_map: false,
            has_alpha: false,
            srgb: false,
        }
    }

    /// Checks that the flags can be combined.
    pub fn validate(&self) -> Result<()> {
        if self.normal_map && self.has_alpha {
            return Err(Error::InvalidOption(
                "normal maps store Y in the alpha channel and can't carry alpha",
            ));
        }
        Ok(())
    }
}
