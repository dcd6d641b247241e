use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Instant};

use astc_compression::{
    container::save_astc, download_blocks, encode::compress_rgba8, AstcEncoder, BlockFootprint,
    BlockGrid, EncodeOption,
};
use bytemuck::cast_slice;
use clap::{Parser, ValueEnum};
use image::{ImageReader, RgbaImage};
use pollster::block_on;
use tracing_subscriber::EnvFilter;
use wgpu::{
    util::{DeviceExt, TextureDataOrder},
    BackendOptions, Backends, Buffer, BufferDescriptor, BufferUsages, CommandEncoderDescriptor,
    ComputePassDescriptor, ComputePassTimestampWrites, Device, DeviceDescriptor,
    Dx12BackendOptions, Dx12Compiler, Error, Extent3d, Features, GlBackendOptions,
    Gles3MinorVersion, Instance, InstanceDescriptor, InstanceFlags, Limits, Maintain, MapMode,
    MemoryHints, PowerPreference, QuerySet, QueryType, Queue, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureViewDescriptor,
};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Block {
    #[value(name = "4x4")]
    FourByFour,
    #[value(name = "6x6")]
    SixBySix,
}

impl From<Block> for BlockFootprint {
    fn from(block: Block) -> Self {
        match block {
            Block::FourByFour => BlockFootprint::FourByFour,
            Block::SixBySix => BlockFootprint::SixBySix,
        }
    }
}

/// Compresses an image into an `.astc` file.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Input image (png, bmp or tga).
    input: PathBuf,
    /// Output file. Defaults to the input path with the `astc` extension.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Block footprint.
    #[arg(short, long, value_enum, default_value = "4x4")]
    block: Block,
    /// Encode a tangent space normal map (X in red, Y in green).
    #[arg(long, conflicts_with = "alpha")]
    normal_map: bool,
    /// Keep the alpha channel.
    #[arg(long)]
    alpha: bool,
    /// The image is sRGB encoded.
    #[arg(long)]
    srgb: bool,
    /// Encode on the CPU instead of the GPU.
    #[arg(long)]
    cpu: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let option = EncodeOption {
        footprint: args.block.into(),
        normal_map: args.normal_map,
        has_alpha: args.alpha,
        srgb: args.srgb,
    };
    option.validate()?;

    let start = Instant::now();
    let image = ImageReader::open(&args.input)?.decode()?.to_rgba8();
    let (width, height) = image.dimensions();
    tracing::info!(
        "Image read took: {:.3} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    let block_data = if args.cpu {
        encode_on_cpu(&image, option)?
    } else {
        encode_on_gpu(&image, option, &args.input)?
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("astc"));

    let start = Instant::now();
    save_astc(&output, option.footprint, width, height, &block_data)?;
    tracing::info!(
        "ASTC output to {} took: {:.3} ms",
        output.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(())
}

fn encode_on_cpu(
    image: &RgbaImage,
    option: EncodeOption,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let (width, height) = image.dimensions();
    let mut block_data = vec![0; option.footprint.blocks_byte_size(width, height)];

    let start = Instant::now();
    compress_rgba8(option, image, &mut block_data, width, height, width * 4)?;
    tracing::info!(
        "CPU compression took: {:.3} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(block_data)
}

fn encode_on_gpu(
    image: &RgbaImage,
    option: EncodeOption,
    input: &std::path::Path,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let (device, queue) = create_resources()?;
    let mut encoder = AstcEncoder::new(device.clone(), queue.clone());

    let start = Instant::now();
    let texture = create_texture(&device, &queue, image, &input.to_string_lossy());
    let texture_view = texture.create_view(&TextureViewDescriptor::default());
    tracing::info!(
        "Texture upload took: {:.3} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    let grid = BlockGrid::new(texture.width(), texture.height(), option.footprint)?;
    let blocks_buffer = device.create_buffer(&BufferDescriptor {
        label: Some("blocks buffer"),
        size: grid.blocks_byte_size() as _,
        usage: BufferUsages::COPY_SRC | BufferUsages::STORAGE,
        mapped_at_creation: false,
    });

    encoder.add_encode_task(
        &texture_view,
        grid.width(),
        grid.height(),
        option,
        &blocks_buffer,
        0,
    )?;
    encoder.upload();

    compress(&mut encoder, &device, &queue);

    let start = Instant::now();
    let block_data = download_blocks(&device, &queue, &blocks_buffer)?;
    tracing::info!(
        "Block data download took: {:.3} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(block_data)
}

fn create_resources() -> Result<(Arc<Device>, Arc<Queue>), Box<dyn std::error::Error>> {
    let instance = Instance::new(&InstanceDescriptor {
        backends: Backends::from_env().unwrap_or_default(),
        flags: InstanceFlags::from_build_config().with_env(),
        backend_options: BackendOptions {
            gl: GlBackendOptions {
                gles_minor_version: Gles3MinorVersion::Version1,
            },
            dx12: Dx12BackendOptions {
                shader_compiler: Dx12Compiler::StaticDxc,
            }
            .with_env(),
        },
    });

    let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or("failed to find an appropriate adapter")?;

    let (device, queue) = block_on(adapter.request_device(
        &DeviceDescriptor {
            label: Some("main device"),
            required_features: adapter.features() & Features::TIMESTAMP_QUERY,
            required_limits: Limits::downlevel_defaults(),
            memory_hints: MemoryHints::Performance,
        },
        None,
    ))?;
    device.on_uncaptured_error(Box::new(error_handler));

    let info = adapter.get_info();
    tracing::info!("Using backend: {:?}", info.backend);

    Ok((Arc::new(device), Arc::new(queue)))
}

fn create_texture(
    device: &Device,
    queue: &Queue,
    image: &RgbaImage,
    label: &str,
) -> Texture {
    device.create_texture_with_data(
        queue,
        &TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width: image.width(),
                height: image.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            // sRGB images are uploaded as raw bytes, the encoder applies the sRGB profile.
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::COPY_DST | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        image.as_raw(),
    )
}

fn create_timestamp_queries(device: &Device) -> Option<(QuerySet, Buffer, Buffer)> {
    if !device.features().contains(Features::TIMESTAMP_QUERY) {
        return None;
    }

    let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
        label: Some("timestamp query set"),
        count: 2,
        ty: QueryType::Timestamp,
    });

    let resolve_buffer = device.create_buffer(&BufferDescriptor {
        label: Some("timestamp resolve buffer"),
        size: 16,
        usage: BufferUsages::COPY_SRC | BufferUsages::QUERY_RESOLVE,
        mapped_at_creation: false,
    });

    let readback_buffer = device.create_buffer(&BufferDescriptor {
        label: Some("timestamp read-back buffer"),
        size: 16,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    Some((query_set, resolve_buffer, readback_buffer))
}

fn compress(encoder: &mut AstcEncoder, device: &Device, queue: &Queue) {
    let timestamps = create_timestamp_queries(device);
    let start = Instant::now();

    let mut command_encoder = device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("command encoder"),
    });

    {
        let mut pass = command_encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("compute pass"),
            timestamp_writes: timestamps
                .as_ref()
                .map(|(query_set, ..)| ComputePassTimestampWrites {
                    query_set,
                    beginning_of_pass_write_index: Some(0),
                    end_of_pass_write_index: Some(1),
                }),
        });

        encoder.compress(&mut pass);
    }

    if let Some((query_set, resolve_buffer, readback_buffer)) = &timestamps {
        command_encoder.resolve_query_set(query_set, 0..2, resolve_buffer, 0);
        command_encoder.copy_buffer_to_buffer(resolve_buffer, 0, readback_buffer, 0, 16);
    }

    queue.submit([command_encoder.finish()]);

    let Some((_, _, readback_buffer)) = &timestamps else {
        device.poll(Maintain::Wait);
        tracing::info!(
            "Compression took: {:.3} ms (wall clock)",
            start.elapsed().as_secs_f64() * 1000.0
        );
        return;
    };

    let buffer_slice = readback_buffer.slice(..);

    let (tx, rx) = std::sync::mpsc::channel();
    buffer_slice.map_async(MapMode::Read, move |v| {
        let _ = tx.send(v);
    });

    device.poll(Maintain::Wait);

    if let Ok(Ok(())) = rx.recv() {
        {
            let data = buffer_slice.get_mapped_range();
            let timestamps: &[u64] = cast_slice(&data);

            let period = queue.get_timestamp_period() as f64;
            let start_ns = timestamps[0] as f64 * period;
            let end_ns = timestamps[1] as f64 * period;
            let duration_ms = (end_ns - start_ns) / 1_000_000.0;

            tracing::info!("Compression took: {:.3} ms", duration_ms);
        }
        readback_buffer.unmap();
    } else {
        tracing::warn!("couldn't read the compression timestamps");
    }
}

fn error_handler(error: Error) {
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
