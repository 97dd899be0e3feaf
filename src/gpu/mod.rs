//! wgpu side of the path tracer.
//!
//! ## Architecture
//! ```text
//! Scene::serialize → SceneBuffers ─┐
//! FrameScheduler::plan ────────────┼→ PathTraceCompute::encode → radiance A/B
//! CameraUniform ───────────────────┘                                  ↓
//!                                                                 Presenter
//! ```
//!
//! [`PathTracer`] owns all of it and is the type frame loops talk to.

pub mod compute;
pub mod context;
pub mod present;
pub mod readback;
pub mod renderer;
pub mod scene_buffers;

pub use compute::{PathTraceCompute, RADIANCE_FORMAT};
pub use context::GpuContext;
pub use present::Presenter;
pub use readback::{ImageReadback, Readback};
pub use renderer::{FrameReport, PathTracer};
pub use scene_buffers::SceneBuffers;

/// Compute-visible storage buffer entry.
pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
