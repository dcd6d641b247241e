//! The `.astc` container format: a 16 byte header followed by the raw blocks.

use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use bytemuck::{Pod, Zeroable};

use crate::{BlockFootprint, Error, Result};

/// Magic constant `0x5CA1AB13`, stored least significant byte first.
pub const MAGIC: [u8; 4] = [0x13, 0xAB, 0xA1, 0x5C];

/// Largest extent a 24 bit size field can store.
pub const MAX_EXTENT: u32 = (1 << 24) - 1;

/// Header of an `.astc` file.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct AstcHeader {
    magic: [u8; 4],
    block_x: u8,
    block_y: u8,
    block_z: u8,
    x_size: [u8; 3],
    y_size: [u8; 3],
    z_size: [u8; 3],
}

const _: () = assert!(size_of::<AstcHeader>() == 16);

fn extent_bytes(value: u32) -> [u8; 3] {
    let [b0, b1, b2, _] = value.to_le_bytes();
    [b0, b1, b2]
}

fn extent_value(bytes: [u8; 3]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

impl AstcHeader {
    /// Creates the header of a 2D image.
    pub fn new(footprint: BlockFootprint, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || width > MAX_EXTENT || height > MAX_EXTENT {
            return Err(Error::InvalidDimension { width, height });
        }

        Ok(Self {
            magic: MAGIC,
            block_x: footprint.width() as u8,
            block_y: footprint.height() as u8,
            block_z: 1,
            x_size: extent_bytes(width),
            y_size: extent_bytes(height),
            z_size: extent_bytes(1),
        })
    }

    /// Parses and validates a header from the first 16 bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(bytes) = bytes.get(..size_of::<Self>()) else {
            return Err(Error::InvalidHeader(format!(
                "expected {} bytes, got {}",
                size_of::<Self>(),
                bytes.len()
            )));
        };
        let header: Self = bytemuck::pod_read_unaligned(bytes);

        if header.magic != MAGIC {
            return Err(Error::InvalidHeader(format!(
                "bad magic {:02X?}",
                header.magic
            )));
        }
        if header.block_z != 1 || extent_value(header.z_size) != 1 {
            return Err(Error::InvalidHeader("only 2D images are supported".into()));
        }
        header.footprint()?;
        if header.width() == 0 || header.height() == 0 {
            return Err(Error::InvalidDimension {
                width: header.width(),
                height: header.height(),
            });
        }

        Ok(header)
    }

    /// Block footprint of the payload.
    pub fn footprint(&self) -> Result<BlockFootprint> {
        match (self.block_x, self.block_y) {
            (4, 4) => Ok(BlockFootprint::FourByFour),
            (6, 6) => Ok(BlockFootprint::SixBySix),
            (x, y) => Err(Error::InvalidHeader(format!(
                "unsupported block footprint {x}x{y}"
            ))),
        }
    }

    pub fn width(&self) -> u32 {
        extent_value(self.x_size)
    }

    pub fn height(&self) -> u32 {
        extent_value(self.y_size)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Byte size of the block payload that must follow this header.
    pub fn blocks_byte_size(&self) -> Result<usize> {
        Ok(self
            .footprint()?
            .blocks_byte_size(self.width(), self.height()))
    }

    fn check_blocks(&self, blocks: &[u8]) -> Result<()> {
        let expected = self.blocks_byte_size()?;
        if blocks.len() != expected {
            return Err(Error::BlockDataSize {
                expected,
                actual: blocks.len(),
            });
        }
        Ok(())
    }
}

/// Writes `header` followed by `blocks`.
///
/// Fails with [`Error::BlockDataSize`] before writing anything if the payload doesn't match
/// the header.
pub fn write_astc<W: Write>(mut writer: W, header: &AstcHeader, blocks: &[u8]) -> Result<()> {
    header.check_blocks(blocks)?;
    writer.write_all(header.as_bytes())?;
    writer.write_all(blocks)?;
    writer.flush()?;
    Ok(())
}

/// Stores blocks as an `.astc` file at `path`.
pub fn save_astc(
    path: impl AsRef<Path>,
    footprint: BlockFootprint,
    width: u32,
    height: u32,
    blocks: &[u8],
) -> Result<()> {
    let path = path.as_ref();
    let header = AstcHeader::new(footprint, width, height)?;
    header.check_blocks(blocks)?;

    let file = File::create(path)?;
    write_astc(BufWriter::new(file), &header, blocks)?;

    tracing::debug!(
        "wrote {} bytes of {} blocks to {}",
        blocks.len(),
        footprint,
        path.display()
    );

    Ok(())
}

/// A parsed `.astc` file.
#[derive(Clone, Debug)]
pub struct AstcFile {
    pub header: AstcHeader,
    pub blocks: Vec<u8>,
}

impl AstcFile {
    /// Reads and validates an `.astc` file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = AstcHeader::parse(data)?;
        let blocks = data[size_of::<AstcHeader>()..].to_vec();
        header.check_blocks(&blocks)?;
        Ok(Self { header, blocks })
    }
}
