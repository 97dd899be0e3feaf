//! Storage buffers holding the serialized scene.
//!
//! Buffers are allocated once from [`SceneCapacity`] and rewritten in place
//! on upload, so bind groups that reference them stay valid across scene
//! edits.

use super::storage_entry;
use crate::scene::layout::{
    array_bytes, GpuBvhNode, GpuGeom, GpuMaterial, GpuTexel, GpuTextureDescriptor, GpuTriangle,
    GpuVertex,
};
use crate::scene::{SceneBytes, SceneCapacity};
use crate::util::{Error, Result};

/// Geometry group: vertices, triangles, geoms, BVH nodes.
pub fn geometry_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("pt_geometry_bgl"),
        entries: &[
            storage_entry(0, true),
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, true),
        ],
    })
}

/// Materials group: materials, texture descriptors, texels.
pub fn materials_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("pt_materials_bgl"),
        entries: &[storage_entry(0, true), storage_entry(1, true), storage_entry(2, true)],
    })
}

/// Device copies of every scene array.
pub struct SceneBuffers {
    pub vertices: wgpu::Buffer,
    pub triangles: wgpu::Buffer,
    pub geoms: wgpu::Buffer,
    pub bvh_nodes: wgpu::Buffer,
    pub materials: wgpu::Buffer,
    pub texture_descriptors: wgpu::Buffer,
    pub texels: wgpu::Buffer,
    geometry_bind_group: wgpu::BindGroup,
    materials_bind_group: wgpu::BindGroup,
    uploaded_generation: Option<u64>,
}

fn storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    extra: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra,
        mapped_at_creation: false,
    })
}

/// Room for at least one record so the runtime array is never empty.
const fn sized<T>(capacity: usize) -> u64 {
    array_bytes::<T>(if capacity == 0 { 1 } else { capacity })
}

impl SceneBuffers {
    #[tracing::instrument(skip_all)]
    pub fn new(
        device: &wgpu::Device,
        capacity: &SceneCapacity,
        geometry: &wgpu::BindGroupLayout,
        materials: &wgpu::BindGroupLayout,
    ) -> Result<Self> {
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        let sizes = [
            ("vertices", sized::<GpuVertex>(capacity.max_vertices)),
            ("triangles", sized::<GpuTriangle>(capacity.max_triangles)),
            ("geoms", sized::<GpuGeom>(capacity.max_geoms)),
            ("bvh_nodes", sized::<GpuBvhNode>(capacity.max_bvh_nodes())),
            ("materials", sized::<GpuMaterial>(capacity.max_materials)),
            ("texture_descriptors", sized::<GpuTextureDescriptor>(capacity.max_textures)),
            ("texels", sized::<GpuTexel>(capacity.max_texels)),
        ];
        for (what, size) in sizes {
            if size > limit {
                return Err(Error::capacity(what, size as usize, limit as usize));
            }
        }

        let buffers = sizes.map(|(what, size)| {
            let extra = if what == "vertices" {
                wgpu::BufferUsages::COPY_SRC
            } else {
                wgpu::BufferUsages::empty()
            };
            storage_buffer(device, &format!("pt_{what}"), size, extra)
        });
        let [vertices, triangles, geoms, bvh_nodes, mats, descriptors, texels] = buffers;

        let geometry_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pt_geometry_bg"),
            layout: geometry,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: triangles.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: geoms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bvh_nodes.as_entire_binding(),
                },
            ],
        });
        let materials_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pt_materials_bg"),
            layout: materials,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: mats.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: descriptors.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: texels.as_entire_binding(),
                },
            ],
        });

        let total: u64 = sizes.iter().map(|(_, s)| s).sum();
        tracing::debug!(bytes = total, "scene buffers allocated");

        Ok(Self {
            vertices,
            triangles,
            geoms,
            bvh_nodes,
            materials: mats,
            texture_descriptors: descriptors,
            texels,
            geometry_bind_group,
            materials_bind_group,
            uploaded_generation: None,
        })
    }

    fn buffers(&self) -> [&wgpu::Buffer; 7] {
        [
            &self.vertices,
            &self.triangles,
            &self.geoms,
            &self.bvh_nodes,
            &self.materials,
            &self.texture_descriptors,
            &self.texels,
        ]
    }

    /// Write every array. Fails without writing anything if one does not fit.
    #[tracing::instrument(skip_all, fields(bytes = bytes.total_len(), generation = generation))]
    pub fn upload(
        &mut self,
        queue: &wgpu::Queue,
        bytes: &SceneBytes,
        generation: u64,
    ) -> Result<()> {
        let arrays = bytes.arrays();
        for (&(what, data), buffer) in arrays.iter().zip(self.buffers()) {
            if data.len() as u64 > buffer.size() {
                return Err(Error::capacity(what, data.len(), buffer.size() as usize));
            }
        }
        for (&(_, data), buffer) in arrays.iter().zip(self.buffers()) {
            queue.write_buffer(buffer, 0, data);
        }
        self.uploaded_generation = Some(generation);
        Ok(())
    }

    /// Generation of the last full upload, if any.
    pub fn uploaded_generation(&self) -> Option<u64> {
        self.uploaded_generation
    }

    pub fn geometry_bind_group(&self) -> &wgpu::BindGroup {
        &self.geometry_bind_group
    }

    pub fn materials_bind_group(&self) -> &wgpu::BindGroup {
        &self.materials_bind_group
    }
}
