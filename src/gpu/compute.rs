//! Compute executor for frame plans.
//!
//! Owns the compute pipelines, the ping-pong radiance images and every
//! per-path working buffer. [`PathTraceCompute::encode`] records a
//! [`FramePlan`] into one compute pass: dispatch order equals plan order and
//! each dispatch binds its own parameter slot through a dynamic offset.
//!
//! ## Bind groups
//! ```text
//! 0 frame        camera uniform, step params (dynamic offset)
//! 1 pathtracer   radiance_out, radiance_in, path_segments, intersections, active_paths
//! 2 geometry     vertices, triangles, geoms, bvh         (intersection)
//! 2 compaction   scan, block_sums, indirect args         (compaction passes)
//! 3 materials    materials, texture descriptors, texels  (integrate; group 2 empty)
//! ```

use std::mem::size_of;
use std::num::NonZeroU64;

use wgpu::util::DeviceExt;

use super::readback::{ImageReadback, Readback};
use super::scene_buffers::{geometry_layout, materials_layout, SceneBuffers};
use super::storage_entry;
use crate::accumulation::RadianceBuffer;
use crate::camera::CameraUniform;
use crate::pipeline::{Dispatch, DispatchSize, FramePlan, PipelineConfig, StepParams};
use crate::scene::layout::{GpuIntersection, GpuPathSegment, HEADER_BYTES};
use crate::shader_source::{assemble, Program, ShaderConstants};
use crate::util::{Error, Result};

/// Format of both accumulation images.
pub const RADIANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

const PARAMS_BINDING_SIZE: u64 = size_of::<StepParams>() as u64;

struct RadianceImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct PathTracerPipelines {
    clear: wgpu::ComputePipeline,
    generate: wgpu::ComputePipeline,
    intersect: wgpu::ComputePipeline,
    integrate: wgpu::ComputePipeline,
    gather: wgpu::ComputePipeline,
}

struct CompactionPipelines {
    flags: wgpu::ComputePipeline,
    scan_blocks: wgpu::ComputePipeline,
    scan_block_sums: wgpu::ComputePipeline,
    add_offsets: wgpu::ComputePipeline,
    compact: wgpu::ComputePipeline,
}

/// Everything whose size depends on resolution, depth or samples per frame.
struct FrameResources {
    radiance: [RadianceImage; 2],
    path_segments: wgpu::Buffer,
    intersections: wgpu::Buffer,
    active_paths: wgpu::Buffer,
    scan: wgpu::Buffer,
    block_sums: wgpu::Buffer,
    indirect: wgpu::Buffer,
    params: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    /// Indexed by the image the group writes.
    pathtracer_bind_groups: [wgpu::BindGroup; 2],
    compaction_bind_group: wgpu::BindGroup,
}

struct Layouts {
    frame: wgpu::BindGroupLayout,
    pathtracer: wgpu::BindGroupLayout,
    geometry: wgpu::BindGroupLayout,
    materials: wgpu::BindGroupLayout,
    compaction: wgpu::BindGroupLayout,
    empty: wgpu::BindGroupLayout,
}

/// Path trace compute pipeline state.
pub struct PathTraceCompute {
    config: PipelineConfig,
    layouts: Layouts,
    empty_bind_group: wgpu::BindGroup,
    pipelines: PathTracerPipelines,
    compaction: Option<CompactionPipelines>,
    camera_buffer: wgpu::Buffer,
    res: FrameResources,
}

impl Layouts {
    fn new(device: &wgpu::Device) -> Self {
        let frame = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pt_frame_bgl"),
            entries: &[
                // @binding(0) camera
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(size_of::<CameraUniform>() as u64),
                    },
                    count: None,
                },
                // @binding(1) step params, one slot per dispatch
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(PARAMS_BINDING_SIZE),
                    },
                    count: None,
                },
            ],
        });

        let pathtracer = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pt_pathtracer_bgl"),
            entries: &[
                // @binding(0) radiance_out
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: RADIANCE_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                // @binding(1) radiance_in
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                storage_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        });

        let compaction = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pt_compaction_bgl"),
            entries: &[storage_entry(0, false), storage_entry(1, false), storage_entry(2, false)],
        });

        let empty = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pt_empty_bgl"),
            entries: &[],
        });

        Self {
            frame,
            pathtracer,
            geometry: geometry_layout(device),
            materials: materials_layout(device),
            compaction,
            empty,
        }
    }
}

fn compute_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry),
        layout: Some(layout),
        module,
        entry_point: Some(entry),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn pipeline_layout(
    device: &wgpu::Device,
    label: &str,
    groups: &[&wgpu::BindGroupLayout],
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: groups,
        push_constant_ranges: &[],
    })
}

fn shader_module(
    device: &wgpu::Device,
    program: Program,
    constants: &ShaderConstants,
) -> Result<wgpu::ShaderModule> {
    let source = assemble(program, constants)?;
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(program.label()),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

impl PathTracerPipelines {
    fn new(device: &wgpu::Device, layouts: &Layouts, constants: &ShaderConstants) -> Result<Self> {
        let module = shader_module(device, Program::PathTracer, constants)?;
        let base = pipeline_layout(device, "pt_base_pl", &[&layouts.frame, &layouts.pathtracer]);
        let intersect = pipeline_layout(
            device,
            "pt_intersect_pl",
            &[&layouts.frame, &layouts.pathtracer, &layouts.geometry],
        );
        let integrate = pipeline_layout(
            device,
            "pt_integrate_pl",
            &[&layouts.frame, &layouts.pathtracer, &layouts.empty, &layouts.materials],
        );
        Ok(Self {
            clear: compute_pipeline(device, &base, &module, "clearRadiance"),
            generate: compute_pipeline(device, &base, &module, "generateRay"),
            intersect: compute_pipeline(device, &intersect, &module, "computeIntersections"),
            integrate: compute_pipeline(device, &integrate, &module, "integrate"),
            gather: compute_pipeline(device, &base, &module, "finalGather"),
        })
    }
}

impl CompactionPipelines {
    fn new(device: &wgpu::Device, layouts: &Layouts, constants: &ShaderConstants) -> Result<Self> {
        let module = shader_module(device, Program::Compaction, constants)?;
        let layout = pipeline_layout(
            device,
            "pt_compaction_pl",
            &[&layouts.frame, &layouts.pathtracer, &layouts.compaction],
        );
        Ok(Self {
            flags: compute_pipeline(device, &layout, &module, "generateFlags"),
            scan_blocks: compute_pipeline(device, &layout, &module, "scanBlocks"),
            scan_block_sums: compute_pipeline(device, &layout, &module, "scanBlockSums"),
            add_offsets: compute_pipeline(device, &layout, &module, "addBlockOffsets"),
            compact: compute_pipeline(device, &layout, &module, "compactPaths"),
        })
    }
}

impl RadianceImage {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: RADIANCE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

fn work_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(wgpu::COPY_BUFFER_ALIGNMENT),
        usage,
        mapped_at_creation: false,
    })
}

impl FrameResources {
    fn new(
        device: &wgpu::Device,
        config: &PipelineConfig,
        layouts: &Layouts,
        camera: &wgpu::Buffer,
    ) -> Result<Self> {
        let n = config.pixel_count() as u64;
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        let segments_size = n * size_of::<GpuPathSegment>() as u64;
        if segments_size > limit {
            return Err(Error::capacity("path segments", segments_size as usize, limit as usize));
        }

        let radiance = [
            RadianceImage::new(device, "pt_radiance_a", config.width, config.height),
            RadianceImage::new(device, "pt_radiance_b", config.width, config.height),
        ];
        let storage = wgpu::BufferUsages::STORAGE;
        let path_segments = work_buffer(device, "pt_path_segments", segments_size, storage);
        let intersections = work_buffer(
            device,
            "pt_intersections",
            n * size_of::<GpuIntersection>() as u64,
            storage,
        );
        let active_paths =
            work_buffer(device, "pt_active_paths", HEADER_BYTES as u64 + n * 4, storage);
        let scan = work_buffer(device, "pt_scan", n * 4, storage);
        let block_sums_size = config.scan_blocks().max(1) as u64 * 4;
        let block_sums = work_buffer(device, "pt_block_sums", block_sums_size, storage);
        let indirect = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pt_indirect_args"),
            contents: bytemuck::cast_slice(&[0u32, 1, 1]),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT,
        });
        let params = work_buffer(
            device,
            "pt_step_params",
            config.params_buffer_size(),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pt_frame_bg"),
            layout: &layouts.frame,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: camera.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &params,
                        offset: 0,
                        size: NonZeroU64::new(PARAMS_BINDING_SIZE),
                    }),
                },
            ],
        });

        let pathtracer_bind_group = |written: RadianceBuffer| {
            let out = &radiance[written.index()];
            let input = &radiance[written.other().index()];
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(match written {
                    RadianceBuffer::A => "pt_pathtracer_bg_write_a",
                    RadianceBuffer::B => "pt_pathtracer_bg_write_b",
                }),
                layout: &layouts.pathtracer,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&out.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&input.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: path_segments.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: intersections.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: active_paths.as_entire_binding(),
                    },
                ],
            })
        };
        let pathtracer_bind_groups = [
            pathtracer_bind_group(RadianceBuffer::A),
            pathtracer_bind_group(RadianceBuffer::B),
        ];

        let compaction_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pt_compaction_bg"),
            layout: &layouts.compaction,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: scan.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: block_sums.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: indirect.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            radiance,
            path_segments,
            intersections,
            active_paths,
            scan,
            block_sums,
            indirect,
            params,
            frame_bind_group,
            pathtracer_bind_groups,
            compaction_bind_group,
        })
    }
}

/// Reject configs the device cannot run.
fn check_device(device: &wgpu::Device, config: &PipelineConfig) -> Result<()> {
    let limits = device.limits();
    let max_dim = limits.max_texture_dimension_2d;
    if config.width > max_dim || config.height > max_dim {
        return Err(Error::capacity(
            "texture dimension",
            config.width.max(config.height) as usize,
            max_dim as usize,
        ));
    }
    if config.max_workgroups > limits.max_compute_workgroups_per_dimension {
        return Err(Error::config(format!(
            "max_workgroups {} exceeds device limit {}",
            config.max_workgroups, limits.max_compute_workgroups_per_dimension
        )));
    }
    config.validate()
}

impl PathTraceCompute {
    /// Build pipelines and size every buffer for `config`.
    #[tracing::instrument(
        skip_all,
        fields(width = config.width, height = config.height, variant = ?config.variant)
    )]
    pub fn new(device: &wgpu::Device, config: PipelineConfig) -> Result<Self> {
        check_device(device, &config)?;
        super::context::scoped(device, "path tracer setup", || {
            let layouts = Layouts::new(device);
            let empty_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pt_empty_bg"),
                layout: &layouts.empty,
                entries: &[],
            });
            let constants = ShaderConstants::new(config.variant);
            let pipelines = PathTracerPipelines::new(device, &layouts, &constants)?;
            let compaction = if config.variant.compacts() {
                Some(CompactionPipelines::new(device, &layouts, &constants)?)
            } else {
                None
            };
            let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("pt_camera_buffer"),
                size: size_of::<CameraUniform>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let res = FrameResources::new(device, &config, &layouts, &camera_buffer)?;
            Ok(Self {
                config,
                layouts,
                empty_bind_group,
                pipelines,
                compaction,
                camera_buffer,
                res,
            })
        })?
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Apply a new config. Pipelines are rebuilt only when the variant
    /// changes; size-dependent resources whenever anything else does.
    pub fn set_config(&mut self, device: &wgpu::Device, config: PipelineConfig) -> Result<()> {
        if config == self.config {
            return Ok(());
        }
        check_device(device, &config)?;
        let old = self.config;
        super::context::scoped(device, "path tracer reconfigure", || -> Result<()> {
            if config.variant != old.variant {
                let constants = ShaderConstants::new(config.variant);
                self.pipelines = PathTracerPipelines::new(device, &self.layouts, &constants)?;
                self.compaction = if config.variant.compacts() {
                    Some(CompactionPipelines::new(device, &self.layouts, &constants)?)
                } else {
                    None
                };
            }
            let shape = |c: &PipelineConfig| (c.width, c.height, c.ray_depth, c.samples_per_frame);
            if shape(&config) != shape(&old) {
                self.res =
                    FrameResources::new(device, &config, &self.layouts, &self.camera_buffer)?;
            }
            Ok(())
        })??;
        self.config = config;
        tracing::debug!(
            width = config.width,
            height = config.height,
            variant = ?config.variant,
            "compute reconfigured"
        );
        Ok(())
    }

    pub fn geometry_layout(&self) -> &wgpu::BindGroupLayout {
        &self.layouts.geometry
    }

    pub fn materials_layout(&self) -> &wgpu::BindGroupLayout {
        &self.layouts.materials
    }

    pub fn update_camera(&self, queue: &wgpu::Queue, uniform: &CameraUniform) {
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(uniform));
    }

    pub fn radiance_view(&self, buffer: RadianceBuffer) -> &wgpu::TextureView {
        &self.res.radiance[buffer.index()].view
    }

    pub fn radiance_texture(&self, buffer: RadianceBuffer) -> &wgpu::Texture {
        &self.res.radiance[buffer.index()].texture
    }

    fn pathtracer_bind_group(&self, written: RadianceBuffer) -> &wgpu::BindGroup {
        &self.res.pathtracer_bind_groups[written.index()]
    }

    fn dispatch(&self, pass: &mut wgpu::ComputePass<'_>, size: DispatchSize) {
        match size {
            DispatchSize::Direct([x, y, z]) => pass.dispatch_workgroups(x, y, z),
            DispatchSize::Indirect => pass.dispatch_workgroups_indirect(&self.res.indirect, 0),
        }
    }

    /// Record `plan` into `encoder`. Parameters are staged on `queue` and
    /// land before the encoder's commands on the next submit.
    ///
    /// Nothing is staged or recorded when the plan's parameters overrun the
    /// uniform array.
    pub fn encode(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        plan: &FramePlan,
        scene: &SceneBuffers,
    ) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        plan.params_fit(self.res.params.size())?;
        queue.write_buffer(&self.res.params, 0, &plan.params_bytes());

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("pt_frame_pass"),
            timestamp_writes: None,
        });
        let default_group = self.pathtracer_bind_group(RadianceBuffer::A);

        for step in &plan.steps {
            pass.insert_debug_marker(step.dispatch.label());
            pass.set_bind_group(0, &self.res.frame_bind_group, &[step.params_offset()]);

            match step.dispatch {
                Dispatch::Clear => {
                    pass.set_pipeline(&self.pipelines.clear);
                    for written in [RadianceBuffer::A, RadianceBuffer::B] {
                        pass.set_bind_group(1, self.pathtracer_bind_group(written), &[]);
                        self.dispatch(&mut pass, step.size);
                    }
                    continue;
                }
                Dispatch::GenerateRay { .. } => {
                    pass.set_pipeline(&self.pipelines.generate);
                    pass.set_bind_group(1, default_group, &[]);
                }
                Dispatch::ComputeIntersections { .. } => {
                    pass.set_pipeline(&self.pipelines.intersect);
                    pass.set_bind_group(1, default_group, &[]);
                    pass.set_bind_group(2, scene.geometry_bind_group(), &[]);
                }
                Dispatch::Integrate { .. } => {
                    pass.set_pipeline(&self.pipelines.integrate);
                    pass.set_bind_group(1, default_group, &[]);
                    pass.set_bind_group(2, &self.empty_bind_group, &[]);
                    pass.set_bind_group(3, scene.materials_bind_group(), &[]);
                }
                Dispatch::FinalGather { read, .. } => {
                    pass.set_pipeline(&self.pipelines.gather);
                    pass.set_bind_group(1, self.pathtracer_bind_group(read.other()), &[]);
                }
                Dispatch::GenerateFlags { .. }
                | Dispatch::ScanBlocks { .. }
                | Dispatch::ScanBlockSums { .. }
                | Dispatch::AddBlockOffsets { .. }
                | Dispatch::CompactPaths { .. } => {
                    let Some(c) = &self.compaction else {
                        tracing::warn!(
                            step = step.dispatch.label(),
                            "compaction step without compaction pipelines"
                        );
                        continue;
                    };
                    let pipeline = match step.dispatch {
                        Dispatch::GenerateFlags { .. } => &c.flags,
                        Dispatch::ScanBlocks { .. } => &c.scan_blocks,
                        Dispatch::ScanBlockSums { .. } => &c.scan_block_sums,
                        Dispatch::AddBlockOffsets { .. } => &c.add_offsets,
                        _ => &c.compact,
                    };
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(1, default_group, &[]);
                    pass.set_bind_group(2, &self.res.compaction_bind_group, &[]);
                }
            }
            self.dispatch(&mut pass, step.size);
        }
        Ok(())
    }

    /// Copy one radiance image to host memory. Submits its own encoder.
    pub fn read_radiance(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffer: RadianceBuffer,
    ) -> ImageReadback {
        let (width, height) = (self.config.width, self.config.height);
        let texel_bytes = 16u32;
        let padded_row = (width * texel_bytes).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let len = padded_row as u64 * height as u64;
        let staging = Readback::staging(device, "pt_radiance_readback", len);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pt_radiance_readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: self.radiance_texture(buffer),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));
        ImageReadback::new(Readback::map(staging, len), width, height, padded_row)
    }
}
