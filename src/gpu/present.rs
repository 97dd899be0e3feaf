//! Tone-mapped blit of a radiance image onto a color target.

use crate::accumulation::RadianceBuffer;
use crate::pipeline::PipelineVariant;
use crate::shader_source::{assemble, Program, ShaderConstants};
use crate::util::Result;

/// Fullscreen-triangle pipeline plus one bind group per radiance image.
pub struct Presenter {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    bind_groups: [wgpu::BindGroup; 2],
    format: wgpu::TextureFormat,
}

impl Presenter {
    /// `views` are the A and B radiance images, in that order.
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        views: [&wgpu::TextureView; 2],
    ) -> Result<Self> {
        super::context::scoped(device, "present setup", || {
            // sRGB targets encode on store; anything else gets it in the shader.
            let constants = ShaderConstants {
                encode_srgb: !format.is_srgb(),
                ..ShaderConstants::new(PipelineVariant::default())
            };
            let source = assemble(Program::Present, &constants)?;
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("pt_present_shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("pt_present_bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                }],
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pt_present_pl"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("pt_present_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            let bind_groups = Self::bind_groups(device, &layout, views);
            Ok(Self {
                pipeline,
                layout,
                bind_groups,
                format,
            })
        })?
    }

    fn bind_groups(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        views: [&wgpu::TextureView; 2],
    ) -> [wgpu::BindGroup; 2] {
        views.map(|view| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pt_present_bg"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                }],
            })
        })
    }

    /// Point at new radiance images after a resize.
    pub fn rebind(&mut self, device: &wgpu::Device, views: [&wgpu::TextureView; 2]) {
        self.bind_groups = Self::bind_groups(device, &self.layout, views);
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Draw `source` onto `target`, replacing its contents.
    pub fn draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        source: RadianceBuffer,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("pt_present_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_groups[source.index()], &[]);
        pass.draw(0..3, 0..1);
    }
}
