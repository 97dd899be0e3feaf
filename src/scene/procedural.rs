//! Procedural assets for demos and tests.
//!
//! Stand-ins for what the scene-loading collaborator normally hands over:
//! unit quads and boxes, a Cornell box, and a deformable cloth grid.

use super::{AssetGeometry, GeomId, GeomType, Material, Scene, Triangle, Vertex};
use crate::util::{Mat4, Result, Vec2, Vec3};

/// Unit quad in the XZ plane facing +Y, centered at the origin.
pub fn quad(material: Material, transform: Mat4) -> AssetGeometry {
    let positions = [
        Vec3::new(-0.5, 0.0, -0.5),
        Vec3::new(0.5, 0.0, -0.5),
        Vec3::new(0.5, 0.0, 0.5),
        Vec3::new(-0.5, 0.0, 0.5),
    ];
    let uvs = [Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y];
    let vertices = positions
        .iter()
        .zip(uvs)
        .map(|(&p, uv)| Vertex::new(p, Vec3::Y, uv))
        .collect();
    AssetGeometry {
        vertices,
        triangles: vec![Triangle::new(0, 2, 1, -1), Triangle::new(0, 3, 2, -1)],
        materials: vec![material],
        textures: Vec::new(),
        transform,
    }
}

/// Unit cube as a 12-triangle mesh with flat normals.
pub fn cuboid(material: Material, transform: Mat4) -> AssetGeometry {
    let mut vertices = Vec::with_capacity(24);
    let mut triangles = Vec::with_capacity(12);
    for axis in 0..3 {
        for sign in [-1.0f32, 1.0] {
            let mut n = Vec3::ZERO;
            n[axis] = sign;
            let mut u = Vec3::ZERO;
            u[(axis + 1) % 3] = 1.0;
            let v = n.cross(u);
            let base = vertices.len() as u32;
            for (du, dv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                let p = n * 0.5 + u * du + v * dv;
                vertices.push(Vertex::new(p, n, Vec2::new(du + 0.5, dv + 0.5)));
            }
            triangles.push(Triangle::new(base, base + 1, base + 2, -1));
            triangles.push(Triangle::new(base, base + 2, base + 3, -1));
        }
    }
    AssetGeometry {
        vertices,
        triangles,
        materials: vec![material],
        textures: Vec::new(),
        transform,
    }
}

/// Classic Cornell box: five walls, an area light and two objects.
///
/// The box spans `[-5, 5]` on X and Z and `[0, 10]` on Y, open towards +Z.
/// A matching camera sits at `(0, 5, 18)` looking down -Z.
pub fn cornell_box(scene: &mut Scene) -> Result<()> {
    let white = Material::diffuse(Vec3::splat(0.73));
    let red = Material::diffuse(Vec3::new(0.65, 0.05, 0.05));
    let green = Material::diffuse(Vec3::new(0.12, 0.45, 0.15));
    let light = Material::emissive(Vec3::splat(15.0));

    let wall = |t: Vec3, r: Mat4| {
        Mat4::from_translation(t) * r * Mat4::from_scale(Vec3::splat(10.0))
    };
    let (pi, half_pi) = (std::f32::consts::PI, std::f32::consts::FRAC_PI_2);

    scene.append(quad(white, wall(Vec3::ZERO, Mat4::IDENTITY)))?;
    scene.append(quad(white, wall(Vec3::new(0.0, 10.0, 0.0), Mat4::from_rotation_x(pi))))?;
    scene.append(quad(white, wall(Vec3::new(0.0, 5.0, -5.0), Mat4::from_rotation_x(half_pi))))?;
    scene.append(quad(red, wall(Vec3::new(-5.0, 5.0, 0.0), Mat4::from_rotation_z(-half_pi))))?;
    scene.append(quad(green, wall(Vec3::new(5.0, 5.0, 0.0), Mat4::from_rotation_z(half_pi))))?;

    scene.append(quad(
        light,
        Mat4::from_translation(Vec3::new(0.0, 9.99, 0.0))
            * Mat4::from_rotation_x(std::f32::consts::PI)
            * Mat4::from_scale(Vec3::new(3.0, 1.0, 3.0)),
    ))?;

    scene.append(cuboid(
        white,
        Mat4::from_translation(Vec3::new(-1.8, 3.0, -1.5))
            * Mat4::from_rotation_y(0.3)
            * Mat4::from_scale(Vec3::new(3.0, 6.0, 3.0)),
    ))?;

    let metal = scene.add_material(Material::metal(Vec3::splat(0.9), 0.05))?;
    scene.add_primitive(
        GeomType::Sphere,
        Mat4::from_translation(Vec3::new(2.0, 1.75, 1.5)) * Mat4::from_scale(Vec3::splat(3.5)),
        metal,
    )?;
    Ok(())
}

/// Regular grid of `(segments_x + 1) * (segments_y + 1)` vertices in the
/// XZ plane at height 1, two triangles per cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClothGrid {
    pub width: f32,
    pub height: f32,
    pub segments_x: u32,
    pub segments_y: u32,
}

impl ClothGrid {
    pub fn new(width: f32, height: f32, segments_x: u32, segments_y: u32) -> Self {
        Self {
            width,
            height,
            segments_x: segments_x.max(1),
            segments_y: segments_y.max(1),
        }
    }

    pub fn vertex_count(&self) -> usize {
        (self.segments_x as usize + 1) * (self.segments_y as usize + 1)
    }

    pub fn triangle_count(&self) -> usize {
        2 * self.segments_x as usize * self.segments_y as usize
    }

    /// Rest pose, local space.
    pub fn rest_vertices(&self) -> Vec<Vertex> {
        self.displaced(|_| 0.0)
    }

    /// Grid with a height offset per vertex; `offset` receives the uv.
    /// Normals are recomputed from the displaced surface.
    pub fn displaced(&self, offset: impl Fn(Vec2) -> f32) -> Vec<Vertex> {
        let (sx, sy) = (self.segments_x, self.segments_y);
        let dx = self.width / sx as f32;
        let dy = self.height / sy as f32;
        let mut out = Vec::with_capacity(self.vertex_count());
        for y in 0..=sy {
            for x in 0..=sx {
                let uv = Vec2::new(x as f32 / sx as f32, y as f32 / sy as f32);
                let p = Vec3::new(
                    x as f32 * dx - self.width / 2.0,
                    1.0 + offset(uv),
                    y as f32 * dy - self.height / 2.0,
                );
                out.push(Vertex::new(p, Vec3::ZERO, uv));
            }
        }
        self.accumulate_normals(&mut out);
        out
    }

    /// Same grid as a world-space vertex array, for
    /// [`Scene::replace_vertex_range`].
    pub fn displaced_world(&self, transform: Mat4, offset: impl Fn(Vec2) -> f32) -> Vec<Vertex> {
        let nxf = transform.inverse().transpose();
        self.displaced(offset)
            .into_iter()
            .map(|v| Vertex {
                position: transform.transform_point3(v.position),
                normal: nxf.transform_vector3(v.normal).normalize_or_zero(),
                uv: v.uv,
            })
            .collect()
    }

    pub fn triangles(&self) -> Vec<Triangle> {
        let row = self.segments_x + 1;
        let mut out = Vec::with_capacity(self.triangle_count());
        for y in 0..self.segments_y {
            for x in 0..self.segments_x {
                let i0 = y * row + x;
                let i1 = i0 + 1;
                let i2 = i0 + row;
                let i3 = i2 + 1;
                out.push(Triangle::new(i0, i2, i1, -1));
                out.push(Triangle::new(i1, i2, i3, -1));
            }
        }
        out
    }

    pub fn asset(&self, material: Material, transform: Mat4) -> AssetGeometry {
        AssetGeometry {
            vertices: self.rest_vertices(),
            triangles: self.triangles(),
            materials: vec![material],
            textures: Vec::new(),
            transform,
        }
    }

    /// Append the rest pose to `scene`.
    pub fn append_to(
        &self,
        scene: &mut Scene,
        material: Material,
        transform: Mat4,
    ) -> Result<GeomId> {
        scene.append(self.asset(material, transform))
    }

    fn accumulate_normals(&self, vertices: &mut [Vertex]) {
        for t in self.triangles() {
            let [a, b, c] = t.indices().map(|i| vertices[i as usize].position);
            let n = (b - a).cross(c - a);
            for i in t.indices() {
                vertices[i as usize].normal += n;
            }
        }
        for v in vertices {
            v.normal = v.normal.normalize_or_zero();
        }
    }
}
