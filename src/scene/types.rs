//! CPU-side scene records.
//!
//! These are the canonical arrays owned by [`Scene`](super::Scene). Their
//! GPU images live in [`layout`](super::layout).

use std::ops::Range;

use crate::util::{Mat4, Vec2, Vec3, Vec4};

/// Mesh vertex. Positions and normals are in world space once appended.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Triangle referencing three vertices by absolute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triangle {
    pub v0: u32,
    pub v1: u32,
    pub v2: u32,
    /// Scene material id, or [`Triangle::INSTANCE_MATERIAL`].
    pub material_id: i32,
}

impl Triangle {
    /// Use the owning instance's material.
    pub const INSTANCE_MATERIAL: i32 = -1;

    pub fn new(v0: u32, v1: u32, v2: u32, material_id: i32) -> Self {
        Self {
            v0,
            v1,
            v2,
            material_id,
        }
    }

    #[inline]
    pub fn indices(&self) -> [u32; 3] {
        [self.v0, self.v1, self.v2]
    }
}

/// Instance kind. Discriminants are the values the intersection stage reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GeomType {
    /// Unit cube centered at the origin, object space.
    Cube = 0,
    /// Unit-diameter sphere centered at the origin, object space.
    Sphere = 1,
    /// Triangle mesh with its own BVH subtree.
    Mesh = 2,
}

impl GeomType {
    #[inline]
    pub fn is_mesh(self) -> bool {
        self == GeomType::Mesh
    }
}

/// Handle to an instance inside a [`Scene`](super::Scene).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeomId(pub usize);

/// Scene instance ("geom").
#[derive(Debug, Clone, PartialEq)]
pub struct Geom {
    pub transform: Mat4,
    pub inverse_transform: Mat4,
    pub inv_transpose: Mat4,
    pub geom_type: GeomType,
    /// Scene material id, -1 for none.
    pub material_id: i32,
    pub triangle_start: u32,
    pub triangle_count: u32,
    /// Root of this instance's BVH subtree, -1 if none.
    pub bvh_root: i32,
    /// Vertices owned by this instance (CPU bookkeeping only).
    pub vertex_range: Range<u32>,
    /// Nodes of this instance's subtree in the shared array (CPU bookkeeping only).
    pub bvh_range: Range<u32>,
}

impl Geom {
    /// Build an instance, caching inverse and inverse-transpose.
    pub fn new(geom_type: GeomType, transform: Mat4, material_id: i32) -> Self {
        let inverse_transform = transform.inverse();
        Self {
            transform,
            inverse_transform,
            inv_transpose: inverse_transform.transpose(),
            geom_type,
            material_id,
            triangle_start: 0,
            triangle_count: 0,
            bvh_root: -1,
            vertex_range: 0..0,
            bvh_range: 0..0,
        }
    }

    #[inline]
    pub fn triangle_range(&self) -> Range<usize> {
        let start = self.triangle_start as usize;
        start..start + self.triangle_count as usize
    }
}

/// BRDF branch selected by the integration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MatType {
    Emissive = 0,
    Diffuse = 1,
    Metal = 2,
}

/// Surface material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    /// Texture id, -1 for none.
    pub base_color_texture: i32,
    /// Texture id, -1 for none.
    pub emissive_texture: i32,
    pub mat_type: MatType,
}

impl Material {
    /// Derive the BRDF branch from metallic-roughness factors.
    ///
    /// Any emission (factor or texture) wins, then fully metallic surfaces,
    /// everything else is Lambertian.
    pub fn from_pbr(
        base_color: Vec4,
        metallic: f32,
        roughness: f32,
        emissive: Vec3,
        base_color_texture: i32,
        emissive_texture: i32,
    ) -> Self {
        let mat_type = if emissive != Vec3::ZERO || emissive_texture >= 0 {
            MatType::Emissive
        } else if metallic == 1.0 {
            MatType::Metal
        } else {
            MatType::Diffuse
        };
        Self {
            base_color,
            emissive,
            metallic,
            roughness,
            base_color_texture,
            emissive_texture,
            mat_type,
        }
    }

    /// Lambertian surface.
    pub fn diffuse(color: Vec3) -> Self {
        Self::from_pbr(color.extend(1.0), 0.0, 1.0, Vec3::ZERO, -1, -1)
    }

    /// Mirror-like metal; `roughness` fuzzes the reflection lobe.
    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::from_pbr(color.extend(1.0), 1.0, roughness, Vec3::ZERO, -1, -1)
    }

    /// Area light.
    pub fn emissive(radiance: Vec3) -> Self {
        Self::from_pbr(Vec4::ONE, 0.0, 1.0, radiance, -1, -1)
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::diffuse(Vec3::splat(0.8))
    }
}

/// Linear RGBA texture.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    /// `width * height` texels, row-major.
    pub texels: Vec<Vec4>,
}

impl Texture {
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One imported instance handed over by the scene-loading collaborator.
///
/// Indices are local to this asset: vertex indices into `vertices`,
/// triangle material ids into `materials`, texture ids into `textures`.
#[derive(Debug, Clone, Default)]
pub struct AssetGeometry {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub transform: Mat4,
}
