//! # pathtracer
//!
//! Progressive, BVH-accelerated wavefront path tracer on wgpu compute.
//!
//! The CPU side keeps a flat scene store and builds one BVH per mesh
//! instance; the GPU side runs ray generation, intersection, shading and
//! accumulation as separate compute dispatches, blending every new sample
//! into a ping-pong pair of radiance images.
//!
//! ## Modules
//!
//! - [`util`] - Errors and math types
//! - [`bvh`] - Per-instance BVH construction and the shared node arena
//! - [`scene`] - Geometry store, GPU byte layouts, procedural scenes
//! - [`camera`] - Fly camera and the camera uniform
//! - [`accumulation`] - Reset/continue state machine, ping-pong parity
//! - [`pipeline`] - GPU-free frame scheduler
//! - [`settings`] - Persistent render settings
//! - [`shader_source`] - WGSL assembly
//! - [`gpu`] - wgpu executor and presenter (feature `gpu`)
//!
//! ## Example
//!
//! ```ignore
//! use pathtracer::prelude::*;
//!
//! let settings = RenderSettings::default();
//! let mut scene = Scene::new(settings.capacity, settings.bvh_settings());
//! pathtracer::scene::procedural::cornell_box(&mut scene)?;
//! scene.rebuild_bvh()?;
//!
//! let mut pt = PathTracer::new(GpuContext::headless()?, settings, &scene)?;
//! for _ in 0..64 {
//!     pt.render_frame()?;
//! }
//! let pixels = pt.read_display().wait(&pt.context().device)?;
//! ```

pub mod accumulation;
pub mod bvh;
pub mod camera;
pub mod pipeline;
pub mod scene;
pub mod settings;
pub mod shader_source;
pub mod util;

// GPU executor (optional, enabled with "gpu" feature)
#[cfg(feature = "gpu")]
pub mod gpu;

// Re-export commonly used types
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accumulation::{AccumulationController, RadianceBuffer, ResetReason};
    pub use crate::bvh::{BvhNode, BvhSettings};
    pub use crate::camera::{CameraState, FlyCamera, MoveInput};
    pub use crate::pipeline::{FrameScheduler, PipelineConfig, PipelineVariant};
    pub use crate::scene::{
        AssetGeometry, GeomId, GeomType, Material, Scene, SceneCapacity, Texture, Triangle, Vertex,
    };
    pub use crate::settings::RenderSettings;
    pub use crate::util::{Error, Result};

    #[cfg(feature = "gpu")]
    pub use crate::gpu::{GpuContext, PathTracer};
}
