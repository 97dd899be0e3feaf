//! Asynchronous buffer readback.
//!
//! A [`Readback`] owns a mappable staging buffer and resolves to the mapped
//! bytes. The `map_async` callback only flips shared state and wakes the
//! waiting task; the bytes are copied out on the polling side.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::util::{Error, Result};

#[derive(Default)]
struct Shared {
    status: Option<std::result::Result<(), wgpu::BufferAsyncError>>,
    waker: Option<Waker>,
}

/// Pending copy of GPU memory into host memory.
pub struct Readback {
    buffer: wgpu::Buffer,
    len: u64,
    shared: Arc<Mutex<Shared>>,
    done: bool,
}

impl Readback {
    /// Start mapping the first `len` bytes of `buffer` (MAP_READ usage).
    /// The copy into `buffer` must already be submitted.
    pub(crate) fn map(buffer: wgpu::Buffer, len: u64) -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        if len == 0 {
            shared.lock().status = Some(Ok(()));
        } else {
            let callback_state = Arc::clone(&shared);
            buffer.slice(..len).map_async(wgpu::MapMode::Read, move |res| {
                let mut s = callback_state.lock();
                s.status = Some(res);
                if let Some(w) = s.waker.take() {
                    w.wake();
                }
            });
        }
        Self {
            buffer,
            len,
            shared,
            done: false,
        }
    }

    /// Staging buffer for a `len`-byte copy.
    pub(crate) fn staging(device: &wgpu::Device, label: &str, len: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: len.max(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_ready(&self) -> bool {
        self.shared.lock().status.is_some()
    }

    /// Block until the bytes are available.
    pub fn wait(self, device: &wgpu::Device) -> Result<Vec<u8>> {
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::Readback(format!("device poll failed: {e}")))?;
        pollster::block_on(self)
    }

    fn finish(
        &mut self,
        status: std::result::Result<(), wgpu::BufferAsyncError>,
    ) -> Result<Vec<u8>> {
        if self.done {
            return Err(Error::Readback("bytes already taken".into()));
        }
        self.done = true;
        status.map_err(|e| Error::Readback(format!("map_async failed: {e}")))?;
        if self.len == 0 {
            return Ok(Vec::new());
        }
        let bytes = {
            let view = self.buffer.slice(..self.len).get_mapped_range();
            view.to_vec()
        };
        self.buffer.unmap();
        Ok(bytes)
    }
}

impl Future for Readback {
    type Output = Result<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let status = {
            let mut s = this.shared.lock();
            match s.status.take() {
                Some(status) => status,
                None => {
                    s.waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
            }
        };
        Poll::Ready(this.finish(status))
    }
}

impl std::fmt::Debug for Readback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Readback")
            .field("len", &self.len)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Readback of an RGBA32F image whose rows are padded to
/// `COPY_BYTES_PER_ROW_ALIGNMENT`.
#[derive(Debug)]
pub struct ImageReadback {
    inner: Readback,
    width: u32,
    height: u32,
    padded_row: u32,
}

impl ImageReadback {
    pub(crate) fn new(inner: Readback, width: u32, height: u32, padded_row: u32) -> Self {
        Self {
            inner,
            width,
            height,
            padded_row,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Block until mapped; returns row-major texels, row 0 at the top.
    pub fn wait(self, device: &wgpu::Device) -> Result<Vec<[f32; 4]>> {
        let (width, height, padded_row) = (self.width, self.height, self.padded_row);
        let bytes = self.inner.wait(device)?;
        unpad_rows(&bytes, width, height, padded_row)
    }
}

/// Strip row padding from a mapped RGBA32F copy.
pub fn unpad_rows(bytes: &[u8], width: u32, height: u32, padded_row: u32) -> Result<Vec<[f32; 4]>> {
    let row = width as usize * 16;
    let stride = padded_row as usize;
    if stride < row || bytes.len() < stride * height as usize {
        return Err(Error::Readback(format!(
            "{} bytes cannot hold {}x{} texels at a {}-byte row stride",
            bytes.len(),
            width,
            height,
            padded_row
        )));
    }
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height as usize {
        let src = &bytes[y * stride..y * stride + row];
        out.extend(src.chunks_exact(16).map(bytemuck::pod_read_unaligned::<[f32; 4]>));
    }
    Ok(out)
}
