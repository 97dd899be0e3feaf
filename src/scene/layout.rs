//! GPU images of the scene arrays.
//!
//! Every storage array is written as a 16-byte header holding the element
//! count (little-endian u32, zero padded) followed by fixed-stride records.
//! The matching WGSL declaration is `struct { count: u32, data: array<T> }`,
//! whose runtime array starts at offset 16.
//!
//! Record sizes are multiples of 16 so that `vec3<f32>` members keep the
//! same offsets on both sides; the padding fields below are load-bearing.

use std::mem::size_of;

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::{Pod, Zeroable};

use super::types::{Geom, Material, Triangle, Vertex};
use crate::bvh::BvhNode;
use crate::util::{Error, Result, Vec2, Vec3, Vec4};

/// Size of the count header in front of every storage array.
pub const HEADER_BYTES: usize = 16;

/// Mesh vertex (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub normal: [f32; 3],
    pub _pad1: f32,
    pub uv: [f32; 2],
    pub _pad2: [f32; 2],
}

impl From<&Vertex> for GpuVertex {
    fn from(v: &Vertex) -> Self {
        Self {
            position: v.position.to_array(),
            _pad0: 0.0,
            normal: v.normal.to_array(),
            _pad1: 0.0,
            uv: v.uv.to_array(),
            _pad2: [0.0; 2],
        }
    }
}

impl From<&GpuVertex> for Vertex {
    fn from(v: &GpuVertex) -> Self {
        Vertex::new(
            Vec3::from_array(v.position),
            Vec3::from_array(v.normal),
            Vec2::from_array(v.uv),
        )
    }
}

/// Triangle (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: u32,
    pub v1: u32,
    pub v2: u32,
    pub material_id: i32,
}

impl From<&Triangle> for GpuTriangle {
    fn from(t: &Triangle) -> Self {
        Self {
            v0: t.v0,
            v1: t.v1,
            v2: t.v2,
            material_id: t.material_id,
        }
    }
}

/// Instance (224 bytes): three column-major matrices then scalars.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuGeom {
    pub transform: [[f32; 4]; 4],
    pub inverse_transform: [[f32; 4]; 4],
    pub inv_transpose: [[f32; 4]; 4],
    pub geom_type: u32,
    pub material_id: i32,
    pub triangle_count: u32,
    pub triangle_start: i32,
    pub bvh_root: i32,
    pub _pad: [u32; 3],
}

impl From<&Geom> for GpuGeom {
    fn from(g: &Geom) -> Self {
        Self {
            transform: g.transform.to_cols_array_2d(),
            inverse_transform: g.inverse_transform.to_cols_array_2d(),
            inv_transpose: g.inv_transpose.to_cols_array_2d(),
            geom_type: g.geom_type as u32,
            material_id: g.material_id,
            triangle_count: g.triangle_count,
            triangle_start: g.triangle_start as i32,
            bvh_root: g.bvh_root,
            _pad: [0; 3],
        }
    }
}

/// BVH node (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuBvhNode {
    pub bounds_min: [f32; 3],
    pub _pad0: f32,
    pub bounds_max: [f32; 3],
    pub _pad1: f32,
    pub left_child: i32,
    pub right_child: i32,
    pub triangle_start: i32,
    pub triangle_count: u32,
}

impl From<&BvhNode> for GpuBvhNode {
    fn from(n: &BvhNode) -> Self {
        Self {
            bounds_min: n.bounds.min.to_array(),
            _pad0: 0.0,
            bounds_max: n.bounds.max.to_array(),
            _pad1: 0.0,
            left_child: n.left_child,
            right_child: n.right_child,
            triangle_start: n.triangle_start,
            triangle_count: n.triangle_count,
        }
    }
}

/// Material (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
    pub base_color_texture: i32,
    pub emissive_texture: i32,
    pub mat_type: u32,
}

impl From<&Material> for GpuMaterial {
    fn from(m: &Material) -> Self {
        Self {
            base_color: m.base_color.to_array(),
            emissive: m.emissive.to_array(),
            metallic: m.metallic,
            roughness: m.roughness,
            base_color_texture: m.base_color_texture,
            emissive_texture: m.emissive_texture,
            mat_type: m.mat_type as u32,
        }
    }
}

/// Texture descriptor (16 bytes). `offset` counts texels, not bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub offset: u32,
    pub _pad: u32,
}

/// Linear RGBA texel (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTexel(pub [f32; 4]);

impl From<&Vec4> for GpuTexel {
    fn from(v: &Vec4) -> Self {
        Self(v.to_array())
    }
}

/// Per-pixel path state (64 bytes). Never touched by the CPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPathSegment {
    pub origin: [f32; 3],
    pub remaining_bounces: i32,
    pub direction: [f32; 3],
    pub pixel_index: u32,
    pub throughput: [f32; 3],
    pub _pad0: f32,
    pub radiance: [f32; 3],
    pub _pad1: f32,
}

/// Closest hit for one path (32 bytes). `t < 0` marks a miss.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuIntersection {
    pub normal: [f32; 3],
    pub t: f32,
    pub uv: [f32; 2],
    pub geom_index: i32,
    pub material_id: i32,
}

/// Bytes needed for a headered array able to hold `capacity` records.
#[inline]
pub const fn array_bytes<T>(capacity: usize) -> u64 {
    (HEADER_BYTES + capacity * size_of::<T>()) as u64
}

/// Headered array image: count header then the records.
///
/// Records are cast in host byte order, which is little-endian on every
/// target wgpu supports.
pub fn write_array<T: Pod>(records: &[T]) -> Vec<u8> {
    let body: &[u8] = bytemuck::cast_slice(records);
    let mut out = vec![0u8; HEADER_BYTES];
    LittleEndian::write_u32(&mut out[..4], records.len() as u32);
    out.extend_from_slice(body);
    out
}

/// Count stored in a headered array image.
pub fn read_count(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < HEADER_BYTES {
        return Err(Error::Readback(format!(
            "array image is {} bytes, shorter than its header",
            bytes.len()
        )));
    }
    Ok(LittleEndian::read_u32(&bytes[..4]))
}

/// Decode a run of bare records (no header), e.g. a mapped sub-range.
///
/// The source need not be aligned.
pub fn read_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    let stride = size_of::<T>();
    if bytes.len() % stride != 0 {
        return Err(Error::Readback(format!(
            "{} bytes is not a whole number of {}-byte records",
            bytes.len(),
            stride
        )));
    }
    Ok(bytes
        .chunks_exact(stride)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

/// Byte-exact images of every scene array, ready for `queue.write_buffer`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneBytes {
    pub vertices: Vec<u8>,
    pub triangles: Vec<u8>,
    pub geoms: Vec<u8>,
    pub bvh_nodes: Vec<u8>,
    pub materials: Vec<u8>,
    pub texture_descriptors: Vec<u8>,
    pub texels: Vec<u8>,
}

impl SceneBytes {
    /// (label, bytes) pairs in binding order.
    pub fn arrays(&self) -> [(&'static str, &[u8]); 7] {
        [
            ("vertices", &self.vertices),
            ("triangles", &self.triangles),
            ("geoms", &self.geoms),
            ("bvh_nodes", &self.bvh_nodes),
            ("materials", &self.materials),
            ("texture_descriptors", &self.texture_descriptors),
            ("texels", &self.texels),
        ]
    }

    pub fn total_len(&self) -> usize {
        self.arrays().iter().map(|(_, b)| b.len()).sum()
    }
}
