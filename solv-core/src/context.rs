use crate::error::SolvCoreError;
use cfg_if::cfg_if;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use wgpu::PollType;

/// wgpu buffers must be copied in multiples of this many bytes.
pub(crate) const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Queue and device of one adapter, with byte counters.
/// Internal to solv-core: consumers go through [`crate::device::GpuDevice`].
#[derive(Debug, Clone)]
pub(crate) struct GpuContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    pub(crate) bytes_to_gpu: Arc<AtomicU64>,
    pub(crate) bytes_from_gpu: Arc<AtomicU64>,
}

fn storage_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    })
}

/// Number of adapters a rank can be assigned to.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn adapter_count() -> usize {
    storage_instance()
        .enumerate_adapters(wgpu::Backends::PRIMARY)
        .len()
}

impl GpuContext {
    /// Opens adapter `index` of the primary backends, or the preferred
    /// high-performance adapter when `index` is `None`.
    pub(crate) async fn new(index: Option<usize>) -> Result<Self, SolvCoreError> {
        let instance = storage_instance();
        let adapter = match index {
            #[cfg(not(target_arch = "wasm32"))]
            Some(index) => instance
                .enumerate_adapters(wgpu::Backends::PRIMARY)
                .into_iter()
                .nth(index)
                .ok_or_else(|| {
                    SolvCoreError::WgpuInitError(format!("No adapter with index {}", index))
                })?,
            _ => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|_| {
                    SolvCoreError::WgpuInitError("No suitable adapter found".to_string())
                })?,
        };
        log::info!("Residency device on adapter {:?}", adapter.get_info().name);

        // Arrays only live in storage buffers: no shader feature is needed.
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("solv_core residency device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            })
            .await
            .map_err(|e| SolvCoreError::WgpuInitError(format!("Failed to request device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            bytes_to_gpu: Arc::new(AtomicU64::new(0)),
            bytes_from_gpu: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Storage buffer of `size` bytes, readable and writable by copies.
    pub(crate) fn create_array_buffer(&self, label: &str, size: u64) -> wgpu::Buffer {
        log::trace!("Creating device buffer '{}' of {} bytes", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn check_range(buffer: &wgpu::Buffer, offset: u64, len: u64, what: &str) -> Result<(), SolvCoreError> {
        if offset + len > buffer.size() {
            return Err(SolvCoreError::Internal(format!(
                "{} of {} bytes at offset {} overflows a buffer of {} bytes",
                what,
                len,
                offset,
                buffer.size()
            )));
        }
        if offset % COPY_ALIGNMENT != 0 || len % COPY_ALIGNMENT != 0 {
            return Err(SolvCoreError::WgpuError(format!(
                "Unaligned {} ({} bytes at offset {})",
                what.to_lowercase(),
                len,
                offset
            )));
        }
        Ok(())
    }

    /// Host to device copy of `data` at byte `offset`.
    pub(crate) fn upload(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), SolvCoreError> {
        let len = data.len() as u64;
        if len == 0 {
            return Ok(());
        }
        Self::check_range(buffer, offset, len, "Upload")?;
        self.queue.write_buffer(buffer, offset, data);
        self.queue.submit(std::iter::empty());
        self.bytes_to_gpu.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Device to host copy filling `out` from byte `offset`, through a
    /// mappable staging buffer.
    pub(crate) async fn download(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), SolvCoreError> {
        let len = out.len() as u64;
        if len == 0 {
            return Ok(());
        }
        Self::check_range(buffer, offset, len, "Download")?;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("residency staging"),
            size: len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("residency download"),
            });
        encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, len);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if let Err(e) = sender.send(result) {
                log::error!("Failed to send map result back: {:?}", e);
            }
        });

        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                self.device
                    .poll(PollType::Wait)
                    .map_err(|e| SolvCoreError::WgpuError(format!("Device poll failed: {}", e)))?;
            }
        }

        match receiver.await {
            Ok(Ok(())) => {
                out.copy_from_slice(&slice.get_mapped_range());
                staging.unmap();
                self.bytes_from_gpu.fetch_add(len, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(e)) => Err(SolvCoreError::WgpuError(format!(
                "Buffer mapping failed: {}",
                e
            ))),
            Err(_) => Err(SolvCoreError::Internal(
                "Channel receive error during buffer mapping".to_string(),
            )),
        }
    }

    pub(crate) fn transfer_counts(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }
}
