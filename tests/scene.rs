//! Scene assembly, GPU byte images and the deformation readback path.

use pathtracer::scene::layout::{read_count, HEADER_BYTES};
use pathtracer::scene::procedural::{cornell_box, ClothGrid};
use pathtracer::scene::{GeomType, Material, Scene, SceneCapacity};
use pathtracer::settings::RenderSettings;
use pathtracer::util::{Mat4, Vec3};
use pathtracer::Error;

fn cornell() -> Scene {
    let settings = RenderSettings::default();
    let mut scene = Scene::new(settings.capacity, settings.bvh_settings());
    cornell_box(&mut scene).unwrap();
    scene
}

#[test]
fn test_cornell_box_is_consistent() {
    let scene = cornell();
    scene.validate().unwrap();
    assert!(scene.geoms().iter().any(|g| g.geom_type == GeomType::Sphere));
    for g in scene.geoms().iter().filter(|g| g.geom_type == GeomType::Mesh) {
        assert!(g.bvh_root >= 0);
    }
    assert!(scene
        .materials()
        .iter()
        .any(|m| m.emissive.max_element() > 0.0));

    let bytes = scene.serialize();
    assert_eq!(read_count(&bytes.geoms).unwrap() as usize, scene.geoms().len());
    assert_eq!(read_count(&bytes.triangles).unwrap() as usize, scene.triangles().len());
    assert_eq!(read_count(&bytes.bvh_nodes).unwrap() as usize, scene.bvh_nodes().len());
    assert_eq!(read_count(&bytes.texels).unwrap(), 0);
}

#[test]
fn test_cloth_readback_round_trip() {
    let mut scene = cornell();
    let grid = ClothGrid::new(4.0, 4.0, 12, 12);
    let transform = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
    let id = grid
        .append_to(&mut scene, Material::diffuse(Vec3::splat(0.7)), transform)
        .unwrap();

    let wave = grid.displaced_world(transform, |uv| 0.2 * (uv.x * 6.0).sin());
    scene.replace_vertex_range(id, &wave).unwrap();
    let generation = scene.generation();

    // Emulate the device copy: slice the instance out of the uploaded image.
    let image = scene.serialize().vertices;
    let range = scene.vertex_byte_range(id).unwrap();
    assert!(range.start >= HEADER_BYTES as u64);
    let copied = image[range.start as usize..range.end as usize].to_vec();

    let mut other = scene.clone();
    other.apply_vertex_readback(id, copied).unwrap();
    assert_eq!(other.instance_vertices(id).unwrap(), scene.instance_vertices(id).unwrap());
    assert_eq!(other.bvh_nodes(), scene.bvh_nodes());
    assert!(other.generation() > generation);
    other.validate().unwrap();
}

#[test]
fn test_readback_length_must_match() {
    let mut scene = cornell();
    let grid = ClothGrid::new(1.0, 1.0, 2, 2);
    let id = grid
        .append_to(&mut scene, Material::diffuse(Vec3::ONE), Mat4::IDENTITY)
        .unwrap();
    let range = scene.vertex_byte_range(id).unwrap();
    let short = vec![0u8; (range.end - range.start) as usize - 48];
    assert!(matches!(
        scene.apply_vertex_readback(id, short),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_capacity_is_enforced_across_appends() {
    let capacity = SceneCapacity {
        max_triangles: 200,
        ..SceneCapacity::default()
    };
    let mut scene = Scene::new(capacity, Default::default());
    let grid = ClothGrid::new(1.0, 1.0, 8, 8);
    grid.append_to(&mut scene, Material::diffuse(Vec3::ONE), Mat4::IDENTITY)
        .unwrap();
    let generation = scene.generation();
    let tris = scene.triangles().len();

    let err = grid
        .append_to(&mut scene, Material::diffuse(Vec3::ONE), Mat4::IDENTITY)
        .unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { .. }));
    assert_eq!(scene.triangles().len(), tris);
    assert_eq!(scene.generation(), generation);
}
