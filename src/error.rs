use thiserror::Error;

/// Errors that can occur while encoding or storing ASTC data.
#[derive(Debug, Error)]
pub enum Error {
    /// The image has a zero-sized axis or doesn't fit the container.
    #[error("invalid image dimension: {width}x{height}")]
    InvalidDimension { width: u32, height: u32 },

    /// The encode options can't be combined.
    #[error("invalid encode option: {0}")]
    InvalidOption(&'static str),

    /// The source texture can't be read by the encoder.
    #[cfg(feature = "wgpu")]
    #[error("unsupported texture format: {0:?}")]
    UnsupportedTextureFormat(wgpu::TextureFormat),

    /// The device rejected the compute work or the result couldn't be read back.
    #[error("gpu dispatch failed: {0}")]
    GpuDispatch(String),

    /// The block payload doesn't match the image dimensions.
    #[error("block data size mismatch: expected {expected} bytes, got {actual}")]
    BlockDataSize { expected: usize, actual: usize },

    /// The container header is malformed.
    #[error("invalid ASTC header: {0}")]
    InvalidHeader(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type of this crate.
pub type Result<T> = std::result::Result<T, Error>;
