//! Frame loop driver tying scene, scheduler, accumulation and GPU together.
//!
//! ## Usage
//! ```ignore
//! let mut pt = PathTracer::new(GpuContext::headless()?, settings, &scene)?;
//! loop {
//!     pt.update_camera(&mut fly_camera);
//!     pt.upload_scene(&scene)?;          // no-op unless the scene changed
//!     pt.render_frame()?;
//!     pt.present(&mut encoder, &target_view, target_format)?;
//! }
//! ```

use super::compute::PathTraceCompute;
use super::context::GpuContext;
use super::present::Presenter;
use super::readback::{ImageReadback, Readback};
use super::scene_buffers::SceneBuffers;
use crate::accumulation::{AccumulationController, RadianceBuffer, ResetReason};
use crate::camera::{CameraState, CameraUniform, FlyCamera};
use crate::pipeline::{FramePlan, FrameScheduler, PipelineConfig};
use crate::scene::{GeomId, Scene};
use crate::settings::RenderSettings;
use crate::util::{Error, Result};

/// Outcome of one [`PathTracer::render_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Dispatches recorded.
    pub dispatches: usize,
    /// Samples gathered this frame.
    pub gathers: u32,
    pub frames_accumulated: u32,
    pub display: RadianceBuffer,
}

/// Progressive path tracer bound to one device.
pub struct PathTracer {
    ctx: GpuContext,
    settings: RenderSettings,
    compute: PathTraceCompute,
    scene_buffers: SceneBuffers,
    scheduler: FrameScheduler,
    accumulation: AccumulationController,
    presenter: Option<Presenter>,
    camera: CameraState,
    camera_dirty: bool,
}

impl PathTracer {
    /// Allocate every GPU resource and upload `scene`.
    ///
    /// Scene buffers are sized from the scene's capacity, not its current
    /// contents, so later appends fit without reallocation.
    pub fn new(ctx: GpuContext, settings: RenderSettings, scene: &Scene) -> Result<Self> {
        settings.validate()?;
        let config = Self::pipeline_config(&ctx, &settings);
        let compute = PathTraceCompute::new(&ctx.device, config)?;
        let scene_buffers = super::context::scoped(&ctx.device, "scene buffers", || {
            SceneBuffers::new(
                &ctx.device,
                scene.capacity(),
                compute.geometry_layout(),
                compute.materials_layout(),
            )
        })??;

        let mut tracer = Self {
            scheduler: FrameScheduler::new(config),
            accumulation: AccumulationController::new(settings.max_samples),
            settings,
            compute,
            scene_buffers,
            presenter: None,
            camera: CameraState::default(),
            camera_dirty: true,
            ctx,
        };
        tracer.upload_scene(scene)?;
        tracing::info!(
            width = config.width,
            height = config.height,
            variant = ?config.variant,
            "path tracer ready"
        );
        Ok(tracer)
    }

    fn pipeline_config(ctx: &GpuContext, settings: &RenderSettings) -> PipelineConfig {
        settings.pipeline_config(ctx.limits().max_compute_workgroups_per_dimension)
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn accumulation(&self) -> &AccumulationController {
        &self.accumulation
    }

    pub fn frames_accumulated(&self) -> u32 {
        self.accumulation.frames_accumulated()
    }

    pub fn is_converged(&self) -> bool {
        self.accumulation.is_converged()
    }

    /// Discard the accumulated image on the next frame.
    pub fn reset(&mut self) {
        self.accumulation.request_reset(ResetReason::Requested);
    }

    /// Set the camera pose. Any change resets accumulation.
    pub fn set_camera(&mut self, camera: CameraState) {
        if camera != self.camera {
            self.camera = camera;
            self.camera_dirty = true;
            self.accumulation.observe_camera(true);
        }
    }

    /// Pull the pose from a fly camera if it moved since the last call.
    pub fn update_camera(&mut self, camera: &mut FlyCamera) {
        if camera.take_updated() {
            self.set_camera(camera.state());
        }
    }

    /// Upload `scene` if its generation changed since the last upload.
    pub fn upload_scene(&mut self, scene: &Scene) -> Result<()> {
        let generation = scene.generation();
        if self.scene_buffers.uploaded_generation() == Some(generation) {
            return Ok(());
        }
        let bytes = scene.serialize();
        self.scene_buffers.upload(&self.ctx.queue, &bytes, generation)?;
        self.accumulation.observe_scene_generation(generation);
        Ok(())
    }

    /// Toggle BVH traversal, rebuild, re-upload and reset.
    pub fn set_bvh_enabled(&mut self, scene: &mut Scene, enabled: bool) -> Result<()> {
        scene.set_bvh_enabled(enabled)?;
        self.settings.enable_bvh = enabled;
        self.upload_scene(scene)?;
        self.accumulation.request_reset(ResetReason::BvhToggled);
        Ok(())
    }

    /// Resize the radiance images and working buffers.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if (width, height) == (self.settings.width, self.settings.height) {
            return Ok(());
        }
        let settings = RenderSettings {
            width,
            height,
            ..self.settings.clone()
        };
        self.apply_settings(settings)?;
        self.accumulation.request_reset(ResetReason::Resized);
        Ok(())
    }

    /// Apply changed integrator settings. Capacity and BVH fields are
    /// ignored here; they belong to the scene.
    pub fn apply_settings(&mut self, settings: RenderSettings) -> Result<()> {
        settings.validate()?;
        let config = Self::pipeline_config(&self.ctx, &settings);
        self.compute.set_config(&self.ctx.device, config)?;
        self.scheduler.set_config(config);
        self.accumulation.set_max_samples(settings.max_samples);
        if let Some(presenter) = &mut self.presenter {
            presenter.rebind(
                &self.ctx.device,
                [
                    self.compute.radiance_view(RadianceBuffer::A),
                    self.compute.radiance_view(RadianceBuffer::B),
                ],
            );
        }
        self.settings = settings;
        self.camera_dirty = true;
        self.accumulation.request_reset(ResetReason::SettingsChanged);
        Ok(())
    }

    fn camera_uniform(&self) -> CameraUniform {
        let s = &self.settings;
        CameraUniform::new(
            &self.camera,
            s.resolution(),
            s.fov_y_degrees,
            s.ray_depth,
            s.samples_per_frame,
            s.background(),
        )
    }

    /// Plan the next frame without recording it.
    fn plan_frame(&mut self) -> FramePlan {
        let start = self.accumulation.begin_frame(self.settings.samples_per_frame);
        self.scheduler.plan(start)
    }

    /// Record and submit one frame. Never blocks.
    ///
    /// On error nothing is submitted and the accumulation state is rolled
    /// back, so the next call plans the same frame again.
    pub fn render_frame(&mut self) -> Result<FrameReport> {
        let accumulation = self.accumulation.clone();
        let scheduler = self.scheduler.clone();
        let plan = self.plan_frame();
        if plan.is_empty() {
            return Ok(FrameReport {
                dispatches: 0,
                gathers: 0,
                frames_accumulated: self.accumulation.frames_accumulated(),
                display: self.accumulation.display_buffer(),
            });
        }

        if self.camera_dirty {
            self.compute.update_camera(&self.ctx.queue, &self.camera_uniform());
            self.camera_dirty = false;
        }

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pt_frame_encoder"),
        });
        if let Err(e) = self
            .compute
            .encode(&self.ctx.queue, &mut encoder, &plan, &self.scene_buffers)
        {
            self.accumulation = accumulation;
            self.scheduler = scheduler;
            return Err(e);
        }
        self.ctx.queue.submit(Some(encoder.finish()));

        self.accumulation.complete_gathers(plan.gathers);
        debug_assert_eq!(plan.display, self.accumulation.display_buffer());
        tracing::trace!(
            steps = plan.steps.len(),
            gathers = plan.gathers,
            frames = self.accumulation.frames_accumulated(),
            "frame submitted"
        );
        Ok(FrameReport {
            dispatches: plan.steps.len(),
            gathers: plan.gathers,
            frames_accumulated: self.accumulation.frames_accumulated(),
            display: plan.display,
        })
    }

    /// Image holding the newest average.
    pub fn display_buffer(&self) -> RadianceBuffer {
        self.accumulation.display_buffer()
    }

    pub fn display_view(&self) -> &wgpu::TextureView {
        self.compute.radiance_view(self.display_buffer())
    }

    /// Tone-map the current image onto `target` (expected at render
    /// resolution). The presenter is rebuilt if `format` changes.
    pub fn present(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        format: wgpu::TextureFormat,
    ) -> Result<()> {
        if self.presenter.as_ref().map(Presenter::format) != Some(format) {
            self.presenter = Some(Presenter::new(
                &self.ctx.device,
                format,
                [
                    self.compute.radiance_view(RadianceBuffer::A),
                    self.compute.radiance_view(RadianceBuffer::B),
                ],
            )?);
        }
        let source = self.display_buffer();
        if let Some(presenter) = &self.presenter {
            presenter.draw(encoder, target, source);
        }
        Ok(())
    }

    /// Copy one instance's vertices back from the device.
    ///
    /// Feed the result to [`Scene::apply_vertex_readback`] once it resolves.
    pub fn read_vertices(&self, scene: &Scene, id: GeomId) -> Result<Readback> {
        if self.scene_buffers.uploaded_generation() != Some(scene.generation()) {
            return Err(Error::Readback(format!(
                "scene generation {} has not been uploaded",
                scene.generation()
            )));
        }
        let range = scene.vertex_byte_range(id)?;
        let len = range.end - range.start;
        let device = &self.ctx.device;
        let staging = Readback::staging(device, "pt_vertex_readback", len);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pt_vertex_readback"),
        });
        encoder.copy_buffer_to_buffer(&self.scene_buffers.vertices, range.start, &staging, 0, len);
        self.ctx.queue.submit(Some(encoder.finish()));
        Ok(Readback::map(staging, len))
    }

    /// Copy the displayed radiance image back from the device.
    pub fn read_display(&self) -> ImageReadback {
        self.compute
            .read_radiance(&self.ctx.device, &self.ctx.queue, self.display_buffer())
    }
}
