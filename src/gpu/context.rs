//! Device acquisition and error-scope helpers.

use crate::util::{Error, Result};

/// Device and queue plus the limits the renderer checks against.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Headless device on the highest-performance adapter.
    pub fn headless() -> Result<Self> {
        pollster::block_on(Self::headless_async())
    }

    pub async fn headless_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("no suitable adapter: {e}")))?;

        let adapter_info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("pathtracer_device"),
                required_features: wgpu::Features::empty(),
                required_limits: required_limits(&adapter.limits()),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Gpu(format!("device request failed: {e}")))?;

        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "gpu device ready"
        );
        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}

/// WebGPU defaults, with buffer sizes raised to what the adapter allows so
/// large scene capacities fit in one binding.
fn required_limits(adapter: &wgpu::Limits) -> wgpu::Limits {
    let mut limits = wgpu::Limits::default();
    limits.max_storage_buffer_binding_size = adapter.max_storage_buffer_binding_size;
    limits.max_buffer_size = adapter.max_buffer_size;
    limits
}

/// Run `f` inside validation and out-of-memory scopes; any captured error
/// becomes [`Error::Gpu`].
pub fn scoped<T>(device: &wgpu::Device, what: &str, f: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    if let Some(e) = validation.or(oom) {
        return Err(Error::Gpu(format!("{what}: {e}")));
    }
    Ok(value)
}
