//! Scene geometry store.
//!
//! [`Scene`] owns the flat arrays the compute stages read: vertices,
//! triangles, instances, materials, textures and the shared BVH node array.
//! Assets are merged with [`Scene::append`], which rebases every index the
//! asset carries so the arrays stay self-consistent.
//!
//! Every mutation bumps [`Scene::generation`]; the frame loop compares it to
//! the last uploaded generation to decide on re-upload and accumulation reset.

pub mod layout;
pub mod procedural;
mod types;

pub use layout::SceneBytes;
pub use types::*;

use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bvh::{
    build_subtree, check_traversal_depth, tree_depth, BvhArena, BvhNode, BvhSettings, LocalBvh,
    TriangleRange, LEAF_THRESHOLD_RANGE, TRAVERSAL_STACK_SIZE,
};
use crate::util::{Error, Result};
use layout::{
    write_array, GpuBvhNode, GpuGeom, GpuMaterial, GpuTexel, GpuTextureDescriptor, GpuTriangle,
    GpuVertex,
};

/// Upper bounds the GPU buffers are allocated for.
///
/// Checked on every insertion so a scene never outgrows what was uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneCapacity {
    pub max_vertices: usize,
    pub max_triangles: usize,
    pub max_geoms: usize,
    pub max_materials: usize,
    pub max_textures: usize,
    pub max_texels: usize,
}

impl SceneCapacity {
    /// Median splits emit at most `2n - 1` nodes per instance.
    pub fn max_bvh_nodes(&self) -> usize {
        self.max_triangles.saturating_mul(2)
    }
}

impl Default for SceneCapacity {
    fn default() -> Self {
        Self {
            max_vertices: 1 << 20,
            max_triangles: 1 << 20,
            max_geoms: 1024,
            max_materials: 1024,
            max_textures: 64,
            max_texels: 1 << 22,
        }
    }
}

/// Merged scene arrays plus their BVH.
#[derive(Debug, Clone)]
pub struct Scene {
    capacity: SceneCapacity,
    bvh_settings: BvhSettings,
    vertices: Vec<Vertex>,
    triangles: Vec<Triangle>,
    geoms: Vec<Geom>,
    materials: Vec<Material>,
    textures: Vec<Texture>,
    texel_total: usize,
    bvh: BvhArena,
    generation: u64,
}

fn check(what: &'static str, requested: usize, capacity: usize) -> Result<()> {
    if requested > capacity {
        return Err(Error::capacity(what, requested, capacity));
    }
    Ok(())
}

fn check_id(what: &'static str, id: i32, count: usize) -> Result<()> {
    if id < -1 || (id >= 0 && id as usize >= count) {
        return Err(Error::InvalidIndex {
            what,
            index: id as i64,
            count,
        });
    }
    Ok(())
}

impl Scene {
    pub fn new(capacity: SceneCapacity, bvh_settings: BvhSettings) -> Self {
        Self {
            capacity,
            bvh_settings,
            vertices: Vec::new(),
            triangles: Vec::new(),
            geoms: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            texel_total: 0,
            bvh: BvhArena::new(),
            generation: 0,
        }
    }

    // ---- accessors ----

    pub fn capacity(&self) -> &SceneCapacity {
        &self.capacity
    }

    pub fn bvh_settings(&self) -> BvhSettings {
        self.bvh_settings
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn geoms(&self) -> &[Geom] {
        &self.geoms
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn bvh_nodes(&self) -> &[BvhNode] {
        self.bvh.nodes()
    }

    /// Total texels over all textures.
    pub fn texel_count(&self) -> usize {
        self.texel_total
    }

    /// Change counter, bumped by every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn geom(&self, id: GeomId) -> Result<&Geom> {
        self.geoms.get(id.0).ok_or(Error::InvalidIndex {
            what: "geom",
            index: id.0 as i64,
            count: self.geoms.len(),
        })
    }

    /// Vertex records of one mesh instance.
    pub fn instance_vertices(&self, id: GeomId) -> Result<&[Vertex]> {
        let g = self.mesh(id)?;
        Ok(&self.vertices[g.vertex_range.start as usize..g.vertex_range.end as usize])
    }

    fn mesh(&self, id: GeomId) -> Result<&Geom> {
        let g = self.geom(id)?;
        if !g.geom_type.is_mesh() {
            return Err(Error::NotAMesh(id.0));
        }
        Ok(g)
    }

    // ---- insertion ----

    /// Add a scene-level material; returns its id.
    pub fn add_material(&mut self, material: Material) -> Result<i32> {
        check("materials", self.materials.len() + 1, self.capacity.max_materials)?;
        check_id("texture", material.base_color_texture, self.textures.len())?;
        check_id("texture", material.emissive_texture, self.textures.len())?;
        self.materials.push(material);
        self.generation += 1;
        Ok(self.materials.len() as i32 - 1)
    }

    /// Add a texture; returns its id.
    pub fn add_texture(&mut self, texture: Texture) -> Result<i32> {
        if texture.texels.len() != texture.texel_count() {
            return Err(Error::ShapeMismatch {
                what: "texels",
                expected: texture.texel_count(),
                actual: texture.texels.len(),
            });
        }
        check("textures", self.textures.len() + 1, self.capacity.max_textures)?;
        check("texels", self.texel_total + texture.texels.len(), self.capacity.max_texels)?;
        self.texel_total += texture.texels.len();
        self.textures.push(texture);
        self.generation += 1;
        Ok(self.textures.len() as i32 - 1)
    }

    /// Merge one asset instance and build its BVH subtree.
    ///
    /// Positions are moved to world space by the asset transform, normals by
    /// its inverse transpose. Vertex, material and texture ids are rebased by
    /// the totals already in the scene. The instance material is the asset's
    /// first material, or none. Everything is validated before anything is
    /// written, so a failed append leaves the scene untouched.
    #[tracing::instrument(skip_all, fields(
        verts = asset.vertices.len(),
        tris = asset.triangles.len(),
    ))]
    pub fn append(&mut self, asset: AssetGeometry) -> Result<GeomId> {
        if asset.triangles.is_empty() {
            return Err(Error::EmptyInstance);
        }
        self.check_asset(&asset)?;

        let vertex_base = self.vertices.len() as u32;
        let material_base = self.materials.len() as i32;
        let texture_base = self.textures.len() as i32;
        let triangle_start = self.triangles.len() as u32;

        let rebase_tex = |id: i32| if id >= 0 { id + texture_base } else { id };
        for tex in asset.textures {
            self.texel_total += tex.texels.len();
            self.textures.push(tex);
        }
        self.materials.extend(asset.materials.iter().map(|m| Material {
            base_color_texture: rebase_tex(m.base_color_texture),
            emissive_texture: rebase_tex(m.emissive_texture),
            ..*m
        }));

        let mut geom = Geom::new(
            GeomType::Mesh,
            asset.transform,
            if asset.materials.is_empty() { -1 } else { material_base },
        );
        let (xf, nxf) = (geom.transform, geom.inv_transpose);
        self.vertices.extend(asset.vertices.iter().map(|v| Vertex {
            position: xf.transform_point3(v.position),
            normal: nxf.transform_vector3(v.normal).normalize_or_zero(),
            uv: v.uv,
        }));
        self.triangles.extend(asset.triangles.iter().map(|t| Triangle {
            v0: t.v0 + vertex_base,
            v1: t.v1 + vertex_base,
            v2: t.v2 + vertex_base,
            material_id: if t.material_id >= 0 {
                t.material_id + material_base
            } else {
                t.material_id
            },
        }));

        geom.triangle_start = triangle_start;
        geom.triangle_count = asset.triangles.len() as u32;
        geom.vertex_range = vertex_base..self.vertices.len() as u32;

        let id = GeomId(self.geoms.len());
        let local = self.build_instance(&geom);
        let (root, range) = self.bvh.append_subtree(&local);
        geom.bvh_root = root;
        geom.bvh_range = range;
        self.geoms.push(geom);
        self.generation += 1;

        tracing::debug!(geom = id.0, nodes = local.nodes.len(), "appended mesh instance");
        Ok(id)
    }

    fn check_asset(&self, asset: &AssetGeometry) -> Result<()> {
        let c = &self.capacity;
        check("geoms", self.geoms.len() + 1, c.max_geoms)?;
        check("vertices", self.vertices.len() + asset.vertices.len(), c.max_vertices)?;
        check("triangles", self.triangles.len() + asset.triangles.len(), c.max_triangles)?;
        check("materials", self.materials.len() + asset.materials.len(), c.max_materials)?;
        check("textures", self.textures.len() + asset.textures.len(), c.max_textures)?;
        let texels: usize = asset.textures.iter().map(|t| t.texels.len()).sum();
        check("texels", self.texel_total + texels, c.max_texels)?;
        check(
            "bvh nodes",
            self.bvh.len() + 2 * asset.triangles.len() - 1,
            c.max_bvh_nodes(),
        )?;
        check_traversal_depth(asset.triangles.len(), self.bvh_settings, TRAVERSAL_STACK_SIZE)?;

        let nverts = asset.vertices.len();
        for t in &asset.triangles {
            for idx in t.indices() {
                if idx as usize >= nverts {
                    return Err(Error::InvalidIndex {
                        what: "vertex",
                        index: idx as i64,
                        count: nverts,
                    });
                }
            }
            check_id("material", t.material_id, asset.materials.len())?;
        }
        for m in &asset.materials {
            check_id("texture", m.base_color_texture, asset.textures.len())?;
            check_id("texture", m.emissive_texture, asset.textures.len())?;
        }
        for t in &asset.textures {
            if t.texels.len() != t.texel_count() {
                return Err(Error::ShapeMismatch {
                    what: "texels",
                    expected: t.texel_count(),
                    actual: t.texels.len(),
                });
            }
        }
        Ok(())
    }

    /// Add an implicit cube or sphere. No BVH subtree is built for it.
    pub fn add_primitive(
        &mut self,
        geom_type: GeomType,
        transform: crate::util::Mat4,
        material_id: i32,
    ) -> Result<GeomId> {
        if geom_type.is_mesh() {
            return Err(Error::EmptyInstance);
        }
        check("geoms", self.geoms.len() + 1, self.capacity.max_geoms)?;
        check_id("material", material_id, self.materials.len())?;

        let mut geom = Geom::new(geom_type, transform, material_id);
        geom.triangle_start = self.triangles.len() as u32;
        let id = GeomId(self.geoms.len());
        self.geoms.push(geom);
        self.generation += 1;
        Ok(id)
    }

    // ---- BVH maintenance ----

    fn build_instance(&mut self, geom: &Geom) -> LocalBvh {
        let range = geom.triangle_range();
        let start = range.start;
        let mut tris = TriangleRange::new(start, &mut self.triangles[range]);
        build_subtree(&mut tris, &self.vertices, self.bvh_settings)
    }

    /// Rebuild every mesh subtree from scratch.
    ///
    /// Instances build in parallel over disjoint triangle ranges; subtrees
    /// are then appended in instance order, so the node array matches a
    /// serial build exactly.
    pub fn rebuild_bvh(&mut self) -> Result<()> {
        self.rebuild_with(self.bvh_settings)
    }

    /// Rebuild under `settings`, which are kept only if the rebuild succeeds.
    ///
    /// Every instance range is checked before the first triangle moves, so
    /// an error leaves triangles, nodes and settings as they were.
    #[tracing::instrument(skip_all, fields(geoms = self.geoms.len(), tris = self.triangles.len()))]
    fn rebuild_with(&mut self, settings: BvhSettings) -> Result<()> {
        let vertices = &self.vertices;

        let mut jobs: Vec<(usize, TriangleRange<'_>)> = Vec::new();
        let mut rest: &mut [Triangle] = &mut self.triangles;
        let mut consumed = 0usize;
        for (i, g) in self.geoms.iter().enumerate() {
            if !g.geom_type.is_mesh() {
                continue;
            }
            let range = g.triangle_range();
            let gap = range.start.checked_sub(consumed).ok_or_else(|| {
                Error::inconsistent(format!("geom {i} overlaps the previous instance"))
            })?;
            if gap + range.len() > rest.len() {
                return Err(Error::inconsistent(format!("geom {i} triangles out of bounds")));
            }
            check_traversal_depth(range.len(), settings, TRAVERSAL_STACK_SIZE)?;
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(gap);
            let (mine, tail) = tail.split_at_mut(range.len());
            rest = tail;
            consumed = range.end;
            jobs.push((i, TriangleRange::new(range.start, mine)));
        }

        let locals: Vec<(usize, LocalBvh)> = jobs
            .into_par_iter()
            .map(|(i, mut tris)| (i, build_subtree(&mut tris, vertices, settings)))
            .collect();

        self.bvh.clear();
        for (i, local) in &locals {
            let (root, range) = self.bvh.append_subtree(local);
            self.geoms[*i].bvh_root = root;
            self.geoms[*i].bvh_range = range;
        }
        self.bvh_settings = settings;
        self.generation += 1;

        tracing::debug!(nodes = self.bvh.len(), instances = locals.len(), "bvh rebuilt");
        Ok(())
    }

    /// Toggle recursive builds and rebuild. A disabled BVH gives every mesh
    /// one leaf covering all of its triangles.
    pub fn set_bvh_enabled(&mut self, enabled: bool) -> Result<()> {
        self.rebuild_with(BvhSettings {
            enabled,
            ..self.bvh_settings
        })?;
        tracing::info!(enabled, "bvh toggled");
        Ok(())
    }

    /// Change the leaf threshold and rebuild.
    pub fn set_leaf_threshold(&mut self, leaf_threshold: usize) -> Result<()> {
        if !LEAF_THRESHOLD_RANGE.contains(&leaf_threshold) {
            return Err(Error::config(format!(
                "leaf_threshold {leaf_threshold} outside {LEAF_THRESHOLD_RANGE:?}"
            )));
        }
        self.rebuild_with(BvhSettings {
            leaf_threshold,
            ..self.bvh_settings
        })
    }

    /// Rebuild one instance's subtree.
    ///
    /// Rewritten in place when the node count is unchanged, otherwise the
    /// whole node array is rebuilt so later instances keep valid offsets.
    pub fn rebuild_instance(&mut self, id: GeomId) -> Result<()> {
        let geom = self.mesh(id)?.clone();
        let local = self.build_instance(&geom);
        match self.bvh.overwrite_subtree(geom.bvh_range.clone(), &local) {
            Some(root) => {
                self.geoms[id.0].bvh_root = root;
                self.generation += 1;
                Ok(())
            }
            None => {
                tracing::debug!(geom = id.0, "subtree size changed, full rebuild");
                self.rebuild_bvh()
            }
        }
    }

    /// Overwrite one mesh instance's vertices (world space) and rebuild its
    /// subtree. Other instances' vertices are untouched.
    pub fn replace_vertex_range(&mut self, id: GeomId, vertices: &[Vertex]) -> Result<()> {
        let range = self.mesh(id)?.vertex_range.clone();
        let dst = &mut self.vertices[range.start as usize..range.end as usize];
        if dst.len() != vertices.len() {
            return Err(Error::ShapeMismatch {
                what: "vertices",
                expected: dst.len(),
                actual: vertices.len(),
            });
        }
        dst.copy_from_slice(vertices);
        self.rebuild_instance(id)
    }

    /// Decode GPU vertex records read back from the device and apply them to
    /// `id` via [`Scene::replace_vertex_range`].
    pub fn apply_vertex_readback(&mut self, id: GeomId, bytes: Vec<u8>) -> Result<()> {
        let records = layout::read_records::<GpuVertex>(&bytes)?;
        let vertices: Vec<Vertex> = records.iter().map(Vertex::from).collect();
        self.replace_vertex_range(id, &vertices)
    }

    /// Byte range of one instance's vertices inside the uploaded vertex array.
    pub fn vertex_byte_range(&self, id: GeomId) -> Result<Range<u64>> {
        let r = &self.mesh(id)?.vertex_range;
        let stride = std::mem::size_of::<GpuVertex>() as u64;
        let base = layout::HEADER_BYTES as u64;
        Ok(base + r.start as u64 * stride..base + r.end as u64 * stride)
    }

    // ---- output ----

    /// Little-endian GPU images of all arrays.
    #[tracing::instrument(skip_all)]
    pub fn serialize(&self) -> SceneBytes {
        let vertices: Vec<GpuVertex> = self.vertices.iter().map(GpuVertex::from).collect();
        let triangles: Vec<GpuTriangle> = self.triangles.iter().map(GpuTriangle::from).collect();
        let geoms: Vec<GpuGeom> = self.geoms.iter().map(GpuGeom::from).collect();
        let nodes: Vec<GpuBvhNode> = self.bvh.nodes().iter().map(GpuBvhNode::from).collect();
        let materials: Vec<GpuMaterial> = self.materials.iter().map(GpuMaterial::from).collect();

        let mut offset = 0u32;
        let descriptors: Vec<GpuTextureDescriptor> = self
            .textures
            .iter()
            .map(|t| {
                let d = GpuTextureDescriptor {
                    width: t.width,
                    height: t.height,
                    offset,
                    _pad: 0,
                };
                offset += t.texels.len() as u32;
                d
            })
            .collect();
        let texels: Vec<GpuTexel> = self
            .textures
            .iter()
            .flat_map(|t| t.texels.iter().map(GpuTexel::from))
            .collect();

        SceneBytes {
            vertices: write_array(&vertices),
            triangles: write_array(&triangles),
            geoms: write_array(&geoms),
            bvh_nodes: write_array(&nodes),
            materials: write_array(&materials),
            texture_descriptors: write_array(&descriptors),
            texels: write_array(&texels),
        }
    }

    /// Check count and index invariants across all arrays.
    pub fn validate(&self) -> Result<()> {
        let mut tri_sum = 0usize;
        let mut vert_sum = 0usize;
        for (i, g) in self.geoms.iter().enumerate() {
            check_id("material", g.material_id, self.materials.len())?;
            if !g.geom_type.is_mesh() {
                if g.triangle_count != 0 || g.bvh_root != -1 {
                    return Err(Error::inconsistent(format!("primitive geom {i} owns mesh data")));
                }
                continue;
            }
            let r = g.triangle_range();
            if r.end > self.triangles.len() {
                return Err(Error::inconsistent(format!("geom {i} triangles out of bounds")));
            }
            if g.vertex_range.end as usize > self.vertices.len() {
                return Err(Error::inconsistent(format!("geom {i} vertices out of bounds")));
            }
            let b = &g.bvh_range;
            let root_inside = (b.start as i32..b.end as i32).contains(&g.bvh_root);
            if b.end as usize > self.bvh.len() || !root_inside {
                return Err(Error::inconsistent(format!("geom {i} bvh root outside its subtree")));
            }
            match tree_depth(self.bvh.nodes(), g.bvh_root as usize) {
                Some(depth) if depth <= TRAVERSAL_STACK_SIZE => {}
                Some(depth) => {
                    return Err(Error::inconsistent(format!(
                        "geom {i} bvh is {depth} levels deep, \
                         traversal stack holds {TRAVERSAL_STACK_SIZE}"
                    )));
                }
                None => {
                    return Err(Error::inconsistent(format!(
                        "geom {i} bvh has a dangling child link"
                    )));
                }
            }
            for t in &self.triangles[r] {
                for idx in t.indices() {
                    if !g.vertex_range.contains(&idx) {
                        return Err(Error::inconsistent(format!(
                            "geom {i} triangle references foreign vertex {idx}"
                        )));
                    }
                }
                check_id("material", t.material_id, self.materials.len())?;
            }
            tri_sum += g.triangle_count as usize;
            vert_sum += g.vertex_range.len();
        }
        if tri_sum != self.triangles.len() {
            return Err(Error::inconsistent(format!(
                "instances own {tri_sum} triangles, array holds {}",
                self.triangles.len()
            )));
        }
        if vert_sum != self.vertices.len() {
            return Err(Error::inconsistent(format!(
                "instances own {vert_sum} vertices, array holds {}",
                self.vertices.len()
            )));
        }
        for m in &self.materials {
            check_id("texture", m.base_color_texture, self.textures.len())?;
            check_id("texture", m.emissive_texture, self.textures.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::DEFAULT_LEAF_THRESHOLD;
    use crate::util::{Mat4, Vec2, Vec3, Vec4};

    fn strip(n: usize) -> AssetGeometry {
        let mut asset = AssetGeometry {
            transform: Mat4::IDENTITY,
            ..Default::default()
        };
        for i in 0..n {
            let x = i as f32;
            let base = asset.vertices.len() as u32;
            for p in [
                Vec3::new(x, 0.0, 0.0),
                Vec3::new(x + 1.0, 0.0, 0.0),
                Vec3::new(x, 1.0, 0.0),
            ] {
                asset.vertices.push(Vertex::new(p, Vec3::Z, Vec2::ZERO));
            }
            asset.triangles.push(Triangle::new(base, base + 1, base + 2, -1));
        }
        asset
    }

    fn scene() -> Scene {
        Scene::new(SceneCapacity::default(), BvhSettings::default())
    }

    #[test]
    fn test_append_rebases_indices() {
        let mut s = scene();
        let mut a = strip(2);
        a.materials.push(Material::diffuse(Vec3::ONE));
        a.triangles[1].material_id = 0;
        let mut b = strip(3);
        b.materials.push(Material::metal(Vec3::ONE, 0.1));
        b.materials.push(Material::diffuse(Vec3::X));
        b.triangles[2].material_id = 1;

        s.append(a).unwrap();
        let id = s.append(b).unwrap();
        assert_eq!(id, GeomId(1));

        let g = s.geom(id).unwrap();
        assert_eq!(g.triangle_start, 2);
        assert_eq!(g.triangle_count, 3);
        assert_eq!(g.vertex_range, 6..15);
        assert_eq!(g.material_id, 1);
        for t in &s.triangles()[2..] {
            assert!(t.indices().iter().all(|&v| (6..15).contains(&v)));
        }
        assert!(s.triangles()[2..].iter().any(|t| t.material_id == 2));
        assert!(s.triangles()[..2].iter().any(|t| t.material_id == 0));
        s.validate().unwrap();
    }

    #[test]
    fn test_append_rebases_textures() {
        let mut s = scene();
        s.add_texture(Texture {
            width: 1,
            height: 1,
            texels: vec![Vec4::ONE],
        })
        .unwrap();
        let mut a = strip(1);
        a.textures.push(Texture {
            width: 2,
            height: 1,
            texels: vec![Vec4::ZERO; 2],
        });
        a.materials
            .push(Material::from_pbr(Vec4::ONE, 0.0, 1.0, Vec3::ZERO, 0, -1));
        s.append(a).unwrap();
        assert_eq!(s.materials()[0].base_color_texture, 1);
        assert_eq!(s.texel_count(), 3);

        let bytes = s.serialize();
        let d: Vec<GpuTextureDescriptor> =
            layout::read_records(&bytes.texture_descriptors[layout::HEADER_BYTES..]).unwrap();
        assert_eq!(d[1].offset, 1);
        assert_eq!(d[1].width, 2);
    }

    #[test]
    fn test_append_transforms_to_world() {
        let mut s = scene();
        let mut a = strip(1);
        a.transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0))
            * Mat4::from_scale(Vec3::new(1.0, 1.0, 4.0));
        s.append(a).unwrap();
        assert_eq!(s.vertices()[0].position, Vec3::new(0.0, 0.0, 5.0));
        // normals: inverse transpose then renormalized
        assert!((s.vertices()[0].normal - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_capacity_rejects_without_mutation() {
        let mut s = Scene::new(
            SceneCapacity {
                max_triangles: 4,
                ..Default::default()
            },
            BvhSettings::default(),
        );
        s.append(strip(3)).unwrap();
        let sizes = |s: &Scene| {
            (s.vertices().len(), s.triangles().len(), s.bvh_nodes().len(), s.generation())
        };
        let before = sizes(&s);
        let err = s.append(strip(2)).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExceeded { what: "triangles", requested: 5, capacity: 4 }
        ));
        assert_eq!(before, sizes(&s));
    }

    #[test]
    fn test_empty_instance_rejected() {
        let mut s = scene();
        assert!(matches!(s.append(strip(0)), Err(Error::EmptyInstance)));
        assert!(matches!(
            s.add_primitive(GeomType::Mesh, Mat4::IDENTITY, -1),
            Err(Error::EmptyInstance)
        ));
    }

    #[test]
    fn test_bad_vertex_index_rejected() {
        let mut s = scene();
        let mut a = strip(1);
        a.triangles[0].v2 = 3;
        assert!(matches!(
            s.append(a),
            Err(Error::InvalidIndex { what: "vertex", index: 3, count: 3 })
        ));
        assert!(s.triangles().is_empty());
    }

    #[test]
    fn test_primitives_have_no_bvh() {
        let mut s = scene();
        let m = s.add_material(Material::emissive(Vec3::splat(5.0))).unwrap();
        let id = s.add_primitive(GeomType::Sphere, Mat4::IDENTITY, m).unwrap();
        s.append(strip(5)).unwrap();
        let g = s.geom(id).unwrap();
        assert_eq!(g.bvh_root, -1);
        assert_eq!(g.triangle_count, 0);
        s.rebuild_bvh().unwrap();
        assert_eq!(s.geom(id).unwrap().bvh_root, -1);
        assert!(s.add_primitive(GeomType::Cube, Mat4::IDENTITY, 7).is_err());
        s.validate().unwrap();
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        let mut s = scene();
        s.append(strip(10)).unwrap();
        s.append(strip(2)).unwrap();
        let incremental = s.serialize();
        s.rebuild_bvh().unwrap();
        let rebuilt = s.serialize();
        assert_eq!(incremental.bvh_nodes, rebuilt.bvh_nodes);
        assert_eq!(incremental.triangles, rebuilt.triangles);
        assert_eq!(incremental.geoms, rebuilt.geoms);
    }

    #[test]
    fn test_toggle_bvh() {
        let mut s = scene();
        let id = s.append(strip(10)).unwrap();
        assert_eq!(s.bvh_nodes().len(), 7);
        let gen = s.generation();
        s.set_bvh_enabled(false).unwrap();
        assert_eq!(s.bvh_nodes().len(), 1);
        assert_eq!(s.geom(id).unwrap().bvh_root, 0);
        assert!(s.generation() > gen);
        s.set_bvh_enabled(true).unwrap();
        assert_eq!(s.bvh_nodes().len(), 7);
        assert!(s.set_leaf_threshold(0).is_err());
        s.set_leaf_threshold(10).unwrap();
        assert_eq!(s.bvh_nodes().len(), 1);
    }

    #[test]
    fn test_failed_toggle_keeps_settings() {
        let mut s = scene();
        s.append(strip(6)).unwrap();
        s.append(strip(6)).unwrap();
        // Overlapping instances make the rebuild bail out before moving anything.
        s.geoms[1].triangle_start = 0;
        let nodes = s.bvh_nodes().to_vec();
        let gen = s.generation();

        assert!(matches!(s.set_bvh_enabled(false), Err(Error::Inconsistent(_))));
        assert!(s.bvh_settings().enabled);
        assert!(s.set_leaf_threshold(1).is_err());
        assert_eq!(s.bvh_settings().leaf_threshold, DEFAULT_LEAF_THRESHOLD);
        assert_eq!(s.bvh_nodes(), nodes.as_slice());
        assert_eq!(s.generation(), gen);
    }

    #[test]
    fn test_validate_rejects_tree_deeper_than_stack() {
        let mut s = Scene::new(
            SceneCapacity::default(),
            BvhSettings {
                leaf_threshold: 1,
                enabled: true,
            },
        );
        let id = s.append(strip(40)).unwrap();
        s.validate().unwrap();

        // Same node count, rewired into a single chain.
        let range = s.geom(id).unwrap().bvh_range.clone();
        let bounds = s.bvh_nodes()[range.start as usize].bounds;
        let mut nodes = vec![BvhNode::leaf(bounds, 0, 40)];
        nodes.extend((1..range.len()).map(|i| BvhNode::internal(bounds, i - 1, 0)));
        let chain = LocalBvh {
            root: nodes.len() - 1,
            nodes,
        };
        assert!(chain.depth() > TRAVERSAL_STACK_SIZE);
        let root = s.bvh.overwrite_subtree(range, &chain).unwrap();
        s.geoms[id.0].bvh_root = root;

        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("traversal stack holds"), "{err}");
    }

    #[test]
    fn test_replace_vertex_range_isolated() {
        let mut s = scene();
        let a = s.append(strip(4)).unwrap();
        let b = s.append(strip(4)).unwrap();
        let other_before = s.instance_vertices(a).unwrap().to_vec();

        let mut moved = s.instance_vertices(b).unwrap().to_vec();
        for v in &mut moved {
            v.position.y += 3.0;
        }
        s.replace_vertex_range(b, &moved).unwrap();
        assert_eq!(s.instance_vertices(a).unwrap(), &other_before[..]);
        assert_eq!(s.instance_vertices(b).unwrap(), &moved[..]);

        let root = s.bvh_nodes()[s.geom(b).unwrap().bvh_root as usize];
        assert_eq!(root.bounds.min.y, 3.0);
        s.validate().unwrap();

        let err = s.replace_vertex_range(b, &moved[1..]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 12, actual: 11, .. }));
    }

    #[test]
    fn test_replace_is_idempotent() {
        let mut s = scene();
        let id = s.append(strip(9)).unwrap();
        let same = s.instance_vertices(id).unwrap().to_vec();
        let before = s.serialize();
        s.replace_vertex_range(id, &same).unwrap();
        let after = s.serialize();
        assert_eq!(before, after);
    }

    #[test]
    fn test_apply_vertex_readback() {
        let mut s = scene();
        let id = s.append(strip(2)).unwrap();
        let mut verts = s.instance_vertices(id).unwrap().to_vec();
        verts[0].position = Vec3::splat(-2.0);
        let gpu: Vec<GpuVertex> = verts.iter().map(GpuVertex::from).collect();
        let bytes = bytemuck::cast_slice::<GpuVertex, u8>(&gpu).to_vec();
        s.apply_vertex_readback(id, bytes).unwrap();
        assert_eq!(s.vertices()[0].position, Vec3::splat(-2.0));
        assert!(s.apply_vertex_readback(id, vec![0u8; 47]).is_err());
    }

    #[test]
    fn test_vertex_byte_range() {
        let mut s = scene();
        s.append(strip(1)).unwrap();
        let id = s.append(strip(2)).unwrap();
        assert_eq!(s.vertex_byte_range(id).unwrap(), 16 + 3 * 48..16 + 9 * 48);
    }

    #[test]
    fn test_serialize_headers() {
        let mut s = scene();
        s.append(strip(10)).unwrap();
        let bytes = s.serialize();
        assert_eq!(layout::read_count(&bytes.triangles).unwrap(), 10);
        assert_eq!(layout::read_count(&bytes.bvh_nodes).unwrap(), 7);
        assert_eq!(layout::read_count(&bytes.geoms).unwrap(), 1);
        assert_eq!(layout::read_count(&bytes.texels).unwrap(), 0);
        assert_eq!(bytes.geoms.len(), 16 + 224);
    }
}
