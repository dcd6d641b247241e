use std::{borrow::Cow, collections::HashMap, num::NonZeroU64, sync::Arc};

use bytemuck::{bytes_of, cast_slice};
use wgpu::{
    self,
    util::{BufferInitDescriptor, DeviceExt},
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, Buffer, BufferBinding, BufferBindingType,
    BufferDescriptor, BufferUsages, CommandEncoderDescriptor, ComputePass, ComputePassDescriptor,
    ComputePipeline, ComputePipelineDescriptor, Device, ErrorFilter, Maintain,
    PipelineCompilationOptions, PipelineLayout, PipelineLayoutDescriptor, Queue,
    ShaderModuleDescriptor, ShaderSource, ShaderStages, Texture, TextureFormat, TextureSampleType, TextureView, TextureViewDescriptor,
    TextureViewDimension,
};

use crate::{
    encode::common::ColorTables, BlockGrid, DispatchConstants, EncodeOption, Error, Result,
};

const INITIAL_TASK_CAPACITY: usize = 16;

const SHADER_SOURCE: &str = include_str!("shader/astc.wgsl");

/// Selects a compiled variant of the encoder shader.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
struct PipelineKey {
    option: EncodeOption,
    /// The bound view decodes sRGB, so the shader converts texels back to the stored bytes.
    srgb_texture: bool,
}

impl PipelineKey {
    /// Shader source of this variant.
    ///
    /// The variant is baked in as plain constants, so every variant gets its own shader module.
    /// Some backends cache compiled programs per module and ignore override constants.
    fn shader_source(&self) -> String {
        format!(
            "const BLOCK_SIZE: u32 = {}u;\n\
             const NORMAL_MAP: bool = {};\n\
             const HAS_ALPHA: bool = {};\n\
             const SRGB: bool = {};\n\
             const SRGB_TEXTURE: bool = {};\n\n{}",
            self.option.footprint.width(),
            self.option.normal_map,
            self.option.has_alpha,
            self.option.srgb,
            self.srgb_texture,
            SHADER_SOURCE
        )
    }
}

struct Task {
    key: PipelineKey,
    grid: BlockGrid,
    uniforms_buffer: Arc<Buffer>,
    uniform_offset: u32,
    block_offset: u32,
    bind_group: BindGroup,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum Status {
    Ready,
    Uploaded,
}

/// Encodes textures into ASTC blocks with a compute shader.
///
/// Tasks are recorded with [`AstcEncoder::add_encode_task`], their constants are written with
/// [`AstcEncoder::upload`] and the work is recorded into a compute pass with
/// [`AstcEncoder::compress`]. [`AstcEncoder::encode`] runs all three steps for a single texture
/// and waits for the result.
///
/// Pipelines are compiled once per [`EncodeOption`] and reused.
pub struct AstcEncoder {
    scratch_buffer: Vec<u8>,
    tasks: Vec<Task>,
    uniforms_buffer: Arc<Buffer>,
    color_table_buffer: Buffer,
    bind_group_layout: BindGroupLayout,
    pipeline_layout: PipelineLayout,
    pipelines: HashMap<PipelineKey, ComputePipeline>,
    device: Arc<Device>,
    queue: Arc<Queue>,
    uniforms_aligned_size: usize,
    status: Status,
}

impl AstcEncoder {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        let limits = device.limits();

        let alignment = limits.min_uniform_buffer_offset_alignment as usize;
        let size = size_of::<DispatchConstants>();
        let uniforms_aligned_size = size.div_ceil(alignment) * alignment;

        let uniforms_buffer = Arc::new(Self::create_uniforms_buffer(
            &device,
            uniforms_aligned_size * INITIAL_TASK_CAPACITY,
        ));

        let color_table_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("astc color table"),
            contents: cast_slice(&ColorTables::get().packed()),
            usage: BufferUsages::STORAGE,
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("astc bind group layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(size_of::<DispatchConstants>() as _),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("astc block compression pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            scratch_buffer: Vec::default(),
            tasks: Vec::default(),
            uniforms_buffer,
            color_table_buffer,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            device,
            queue,
            uniforms_aligned_size,
            status: Status::Ready,
        }
    }

    fn create_uniforms_buffer(device: &Device, size: usize) -> Buffer {
        device.create_buffer(&BufferDescriptor {
            label: Some("astc uniforms buffer"),
            size: size as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::UNIFORM,
            mapped_at_creation: false,
        })
    }

    fn pipeline(&mut self, key: PipelineKey) -> &ComputePipeline {
        self.pipelines.entry(key).or_insert_with(|| {
            tracing::trace!("compiling astc pipeline for {:?}", key);

            let label = format!("{} block compression", key.option.footprint);
            let shader_module = self.device.create_shader_module(ShaderModuleDescriptor {
                label: Some(&label),
                source: ShaderSource::Wgsl(Cow::Owned(key.shader_source())),
            });

            self.device
                .create_compute_pipeline(&ComputePipelineDescriptor {
                    label: Some(&format!("{label} pipeline")),
                    layout: Some(&self.pipeline_layout),
                    module: &shader_module,
                    entry_point: Some("compress_astc"),
                    compilation_options: PipelineCompilationOptions::default(),
                    cache: None,
                })
        })
    }

    /// Adds a task to encode the given texture view into `buffer`.
    ///
    /// The view must read RGBA8 texels without sRGB decoding. Upload sRGB images into an
    /// [`TextureFormat::Rgba8Unorm`] texture and set [`EncodeOption::srgb`], or use
    /// [`AstcEncoder::encode`], which also accepts [`TextureFormat::Rgba8UnormSrgb`] textures.
    /// The blocks are written starting at block index `block_offset`, which lets several
    /// textures share one buffer.
    pub fn add_encode_task(
        &mut self,
        texture_view: &TextureView,
        width: u32,
        height: u32,
        option: EncodeOption,
        buffer: &Buffer,
        block_offset: u32,
    ) -> Result<()> {
        let key = PipelineKey {
            option,
            srgb_texture: false,
        };
        self.add_task(texture_view, width, height, key, buffer, block_offset)
    }

    fn add_task(
        &mut self,
        texture_view: &TextureView,
        width: u32,
        height: u32,
        key: PipelineKey,
        buffer: &Buffer,
        block_offset: u32,
    ) -> Result<()> {
        let option = key.option;
        assert_ne!(
            self.status,
            Status::Uploaded,
            "added encode task after upload and before dispatch"
        );

        option.validate()?;
        let grid = BlockGrid::new(width, height, option.footprint)?;

        let expected = (block_offset as usize + grid.block_count()) * crate::BLOCK_BYTES;
        if buffer.size() < expected as u64 {
            return Err(Error::BlockDataSize {
                expected,
                actual: buffer.size() as usize,
            });
        }

        self.pipeline(key);

        let uniform_offset = self.tasks.len() * self.uniforms_aligned_size;
        if uniform_offset + self.uniforms_aligned_size > self.uniforms_buffer.size() as usize {
            // Earlier tasks keep the buffer their bind group points to.
            let size = (self.tasks.len() + 1).next_power_of_two() * self.uniforms_aligned_size;
            self.uniforms_buffer = Arc::new(Self::create_uniforms_buffer(&self.device, size));
        }

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("astc bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(texture_view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Buffer(BufferBinding {
                        buffer: &self.uniforms_buffer,
                        offset: 0,
                        size: NonZeroU64::new(size_of::<DispatchConstants>() as _),
                    }),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: self.color_table_buffer.as_entire_binding(),
                },
            ],
        });

        self.tasks.push(Task {
            key,
            grid,
            uniforms_buffer: Arc::clone(&self.uniforms_buffer),
            uniform_offset: uniform_offset as u32,
            block_offset,
            bind_group,
        });

        Ok(())
    }

    /// Writes the constants of all added tasks.
    pub fn upload(&mut self) {
        if self.status == Status::Uploaded {
            return;
        }
        self.status = Status::Uploaded;

        self.scratch_buffer.clear();
        for (index, task) in self.tasks.iter().enumerate() {
            let offset = task.uniform_offset as usize;
            let constants = DispatchConstants::new(&task.grid, task.block_offset);

            self.scratch_buffer
                .resize(offset + self.uniforms_aligned_size, 0);
            self.scratch_buffer[offset..offset + size_of::<DispatchConstants>()]
                .copy_from_slice(bytes_of(&constants));

            // Flush whenever the next task points to another uniform buffer.
            let last_of_buffer = self
                .tasks
                .get(index + 1)
                .is_none_or(|next| !Arc::ptr_eq(&next.uniforms_buffer, &task.uniforms_buffer));
            if last_of_buffer {
                self.queue
                    .write_buffer(&task.uniforms_buffer, 0, &self.scratch_buffer);
            }
        }
    }

    /// Records the dispatches of all uploaded tasks into `pass`.
    pub fn compress(&mut self, pass: &mut ComputePass) {
        assert_eq!(
            self.status,
            Status::Uploaded,
            "dispatch called before upload"
        );
        self.status = Status::Ready;

        for task in self.tasks.drain(..) {
            let Some(pipeline) = self.pipelines.get(&task.key) else {
                unreachable!("pipelines are created when a task is added");
            };

            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &task.bind_group, &[task.uniform_offset]);

            let (workgroup_width, workgroup_height) = task.grid.workgroups();

            tracing::debug!(
                "dispatching {}x{} workgroups for {} {} blocks",
                workgroup_width,
                workgroup_height,
                task.grid.block_count(),
                task.key.option.footprint
            );

            pass.dispatch_workgroups(workgroup_width, workgroup_height, 1);
        }
    }

    /// Encodes a whole texture and waits until the GPU is done.
    ///
    /// The texture must be [`TextureFormat::Rgba8Unorm`] or [`TextureFormat::Rgba8UnormSrgb`].
    /// sRGB textures are bound with their own format, so no view formats are needed. The
    /// returned buffer holds exactly the row-major blocks of the texture and can be read with
    /// [`crate::download_blocks`].
    ///
    /// # Panics
    /// Panics if tasks added with [`AstcEncoder::add_encode_task`] haven't been dispatched yet.
    pub fn encode(&mut self, texture: &Texture, option: EncodeOption) -> Result<Buffer> {
        assert!(
            self.tasks.is_empty(),
            "encode called while {} pending tasks wait for dispatch",
            self.tasks.len()
        );
        option.validate()?;

        let format = texture.format();
        if !matches!(
            format,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb
        ) {
            return Err(Error::UnsupportedTextureFormat(format));
        }

        let grid = BlockGrid::new(texture.width(), texture.height(), option.footprint)?;

        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        self.device.push_error_scope(ErrorFilter::Validation);

        let texture_view = texture.create_view(&TextureViewDescriptor {
            label: Some("astc source view"),
            ..Default::default()
        });
        let key = PipelineKey {
            option,
            srgb_texture: format == TextureFormat::Rgba8UnormSrgb,
        };

        let block_buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some("astc block buffer"),
            size: grid.blocks_byte_size() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("astc command encoder"),
            });
        encoder.clear_buffer(&block_buffer, 0, None);

        let recorded = self.add_task(
            &texture_view,
            grid.width(),
            grid.height(),
            key,
            &block_buffer,
            0,
        );
        if recorded.is_ok() {
            self.upload();

            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("astc compute pass"),
                timestamp_writes: None,
            });
            self.compress(&mut pass);
        }

        self.queue.submit([encoder.finish()]);
        self.device.poll(Maintain::Wait);

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        recorded?;

        if let Some(error) = validation.or(out_of_memory) {
            return Err(Error::GpuDispatch(error.to_string()));
        }

        tracing::debug!(
            "encoded {}x{} texture into {} bytes of {} blocks",
            grid.width(),
            grid.height(),
            grid.blocks_byte_size(),
            option.footprint
        );

        Ok(block_buffer)
    }
}

/// Encodes `texture` with a new [`AstcEncoder`] and returns the block buffer.
///
/// Prefer keeping an [`AstcEncoder`] around when encoding several textures, so the pipelines
/// are only compiled once.
pub fn encode_astc(
    device: &Arc<Device>,
    queue: &Arc<Queue>,
    texture: &Texture,
    option: EncodeOption,
) -> Result<Buffer> {
    AstcEncoder::new(Arc::clone(device), Arc::clone(queue)).encode(texture, option)
}
