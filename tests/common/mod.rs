#![allow(dead_code)]

pub mod metrics;

use std::sync::Arc;

use astc_compression::BlockFootprint;
use astc_decode::{astc_decode_block, Footprint};
use pollster::block_on;
use wgpu::{
    util::{DeviceExt, TextureDataOrder},
    BackendOptions, Backends, Buffer, BufferDescriptor, BufferUsages, Device, DeviceDescriptor,
    Error, Extent3d, Features, Instance, InstanceDescriptor, InstanceFlags, Limits, MemoryHints,
    Queue, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
};

/// Creates a device on the adapter picked by `WGPU_BACKEND`.
///
/// Panics without an adapter, so a machine without a GPU fails the GPU tests instead of
/// skipping them.
pub fn create_wgpu_resources() -> (Arc<Device>, Arc<Queue>) {
    let instance = Instance::new(&InstanceDescriptor {
        backends: Backends::from_env().unwrap_or_default(),
        flags: InstanceFlags::from_build_config().with_env(),
        backend_options: BackendOptions::default(),
    });

    let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .expect("Failed to find an appropriate adapter");

    let (device, queue) = block_on(adapter.request_device(
        &DeviceDescriptor {
            label: Some("test device"),
            required_features: Features::empty(),
            required_limits: Limits::downlevel_defaults(),
            memory_hints: MemoryHints::default(),
        },
        None,
    ))
    .expect("Failed to create device");
    device.on_uncaptured_error(Box::new(error_handler));

    (Arc::new(device), Arc::new(queue))
}

pub fn error_handler(error: Error) {
    let (message_type, message) = match error {
        Error::OutOfMemory { source } => ("OutOfMemory", source.to_string()),
        Error::Validation {
            source,
            description,
        } => ("Validation", format!("{source}: {description}")),
        Error::Internal {
            source,
            description,
        } => ("Internal", format!("{source}: {description}")),
    };

    panic!("wgpu [{message_type}] [error]: {message}");
}

pub fn create_texture(
    device: &Device,
    queue: &Queue,
    rgba: &[u8],
    width: u32,
    height: u32,
    srgb: bool,
) -> Texture {
    let format = if srgb {
        TextureFormat::Rgba8UnormSrgb
    } else {
        TextureFormat::Rgba8Unorm
    };

    device.create_texture_with_data(
        queue,
        &TextureDescriptor {
            label: Some("test texture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage: TextureUsages::COPY_DST | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        rgba,
    )
}

pub fn create_blocks_buffer(device: &Device, size: u64) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some("blocks buffer"),
        size,
        usage: BufferUsages::COPY_SRC | BufferUsages::STORAGE,
        mapped_at_creation: false,
    })
}

/// Decodes row-major blocks into a tightly packed RGBA8 image.
pub fn decode_blocks(blocks: &[u8], footprint: BlockFootprint, width: u32, height: u32) -> Vec<u8> {
    let blocks_x = width.div_ceil(footprint.width());
    let mut rgba = vec![0; (width * height * 4) as usize];

    for (index, block) in blocks.chunks_exact(16).enumerate() {
        let bx = index as u32 % blocks_x;
        let by = index as u32 / blocks_x;
        let block: &[u8; 16] = block.try_into().unwrap();

        astc_decode_block(
            block,
            Footprint::new(footprint.width(), footprint.height()),
            |x, y, color| {
                let px = bx * footprint.width() + x;
                let py = by * footprint.height() + y;
                if px < width && py < height {
                    let offset = ((py * width + px) * 4) as usize;
                    rgba[offset..offset + 4].copy_from_slice(&color);
                }
            },
        );
    }

    rgba
}

/// Smooth diagonal gradient with a varying alpha ramp.
pub fn gradient_image(width: u32, height: u32) -> Vec<u8> {
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            rgba.extend_from_slice(&[
                (x * 255 / width.max(2).saturating_sub(1)).min(255) as u8,
                (y * 255 / height.max(2).saturating_sub(1)).min(255) as u8,
                ((x + y) * 127 / (width + height)) as u8 + 64,
                (255 - (x * 200 / width.max(1))) as u8,
            ]);
        }
    }
    rgba
}

/// Pseudo random texels, deterministic for a given seed.
pub fn noise_image(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..width * height * 4)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

/// Largest absolute difference of a channel between two RGBA8 images.
pub fn max_channel_error(a: &[u8], b: &[u8], channel: usize) -> u8 {
    a.chunks_exact(4)
        .zip(b.chunks_exact(4))
        .map(|(a, b)| a[channel].abs_diff(b[channel]))
        .max()
        .unwrap_or(0)
}
