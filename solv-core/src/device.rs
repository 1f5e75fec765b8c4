use crate::context::{GpuContext, COPY_ALIGNMENT};
use crate::error::SolvCoreError;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle of a buffer allocated by a [`DeviceRuntime`].
pub type BufferId = u64;

/// Accelerator runtime consumed by the residency manager.
///
/// Offsets and lengths are in bytes. A build or a machine without an
/// accelerator simply has no runtime: see [`crate::residency::ResidencyManager::host_only`].
pub trait DeviceRuntime: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn allocate(&self, bytes: u64, label: &str) -> Result<BufferId, SolvCoreError>;

    fn free(&self, id: BufferId) -> Result<(), SolvCoreError>;

    fn copy_to_device(&self, id: BufferId, offset: u64, data: &[u8])
        -> Result<(), SolvCoreError>;

    fn copy_from_device(
        &self,
        id: BufferId,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), SolvCoreError>;

    /// Free device memory in bytes, `None` when the runtime cannot tell.
    fn free_memory(&self) -> Option<u64>;
}

/// Picks the device of a rank among the ranks sharing a node.
///
/// With more ranks than devices, ranks are dealt in contiguous blocks and the
/// first `ranks % devices` devices receive one extra rank.
pub fn assign_device(rank: usize, ranks_on_node: usize, devices: usize) -> usize {
    if devices == 0 || ranks_on_node <= devices {
        return rank;
    }
    let basic = ranks_on_node / devices;
    let remain = ranks_on_node % devices;
    if rank < (basic + 1) * remain {
        rank / (basic + 1)
    } else {
        (rank - (basic + 1) * remain) / basic + remain
    }
}

/// Device runtime backed by host memory, with an optional capacity.
///
/// Useful on machines without an adapter and to observe residency behaviour.
#[derive(Debug, Default)]
pub struct HostMemoryDevice {
    buffers: Mutex<HashMap<BufferId, Vec<u8>>>,
    next_id: AtomicU64,
    capacity: Option<u64>,
    used: AtomicU64,
}

impl HostMemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime reporting `capacity - used` as free memory.
    pub fn with_capacity(capacity: u64) -> Self {
        HostMemoryDevice {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<BufferId, Vec<u8>>>, SolvCoreError> {
        self.buffers
            .lock()
            .map_err(|_| SolvCoreError::Internal("Device buffer table poisoned".to_string()))
    }
}

impl DeviceRuntime for HostMemoryDevice {
    fn name(&self) -> &str {
        "host-memory"
    }

    fn allocate(&self, bytes: u64, _label: &str) -> Result<BufferId, SolvCoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()?.insert(id, vec![0u8; bytes as usize]);
        self.used.fetch_add(bytes, Ordering::Relaxed);
        Ok(id)
    }

    fn free(&self, id: BufferId) -> Result<(), SolvCoreError> {
        match self.lock()?.remove(&id) {
            Some(buffer) => {
                self.used.fetch_sub(buffer.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            None => Err(SolvCoreError::Internal(format!("Unknown device buffer {}", id))),
        }
    }

    fn copy_to_device(
        &self,
        id: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), SolvCoreError> {
        let mut buffers = self.lock()?;
        let buffer = buffers
            .get_mut(&id)
            .ok_or_else(|| SolvCoreError::Internal(format!("Unknown device buffer {}", id)))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buffer.len() {
            return Err(SolvCoreError::Internal(format!(
                "Copy of {} bytes at offset {} overflows device buffer {}",
                data.len(),
                offset,
                id
            )));
        }
        buffer[start..end].copy_from_slice(data);
        Ok(())
    }

    fn copy_from_device(
        &self,
        id: BufferId,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), SolvCoreError> {
        let buffers = self.lock()?;
        let buffer = buffers
            .get(&id)
            .ok_or_else(|| SolvCoreError::Internal(format!("Unknown device buffer {}", id)))?;
        let start = offset as usize;
        let end = start + out.len();
        if end > buffer.len() {
            return Err(SolvCoreError::Internal(format!(
                "Copy of {} bytes at offset {} overflows device buffer {}",
                out.len(),
                offset,
                id
            )));
        }
        out.copy_from_slice(&buffer[start..end]);
        Ok(())
    }

    fn free_memory(&self) -> Option<u64> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.used.load(Ordering::Relaxed)))
    }
}

/// Represents a GPU device, holding the WGPU context and the buffers it owns.
#[derive(Debug)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
    buffers: Mutex<HashMap<BufferId, wgpu::Buffer>>,
    next_id: AtomicU64,
}

impl GpuDevice {
    /// Opens the preferred high-performance adapter.
    pub async fn new() -> Result<Self, SolvCoreError> {
        Self::from_context(GpuContext::new(None).await?)
    }

    /// Opens the adapter [`assign_device`] gives to `rank` among the
    /// `ranks_on_node` ranks sharing this node.
    #[cfg(not(target_arch = "wasm32"))]
    pub async fn for_rank(rank: usize, ranks_on_node: usize) -> Result<Self, SolvCoreError> {
        let devices = crate::context::adapter_count();
        if devices == 0 {
            return Err(SolvCoreError::WgpuInitError("No adapter on this node".to_string()));
        }
        let index = assign_device(rank, ranks_on_node, devices);
        log::info!("Rank {} of {} uses adapter {} of {}", rank, ranks_on_node, index, devices);
        Self::from_context(GpuContext::new(Some(index)).await?)
    }

    fn from_context(context: GpuContext) -> Result<Self, SolvCoreError> {
        Ok(Self {
            context: Arc::new(context),
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Blocking constructor for native builds.
    #[cfg(feature = "native")]
    pub fn new_blocking() -> Result<Self, SolvCoreError> {
        pollster::block_on(Self::new())
    }

    /// Returns (bytes_to_gpu, bytes_from_gpu) as counted by the context.
    pub fn get_transfer_stats(&self) -> (u64, u64) {
        self.context.transfer_counts()
    }

    fn buffer(&self, id: BufferId) -> Result<wgpu::Buffer, SolvCoreError> {
        let buffers = self
            .buffers
            .lock()
            .map_err(|_| SolvCoreError::Internal("GPU buffer table poisoned".to_string()))?;
        buffers
            .get(&id)
            .cloned()
            .ok_or_else(|| SolvCoreError::Internal(format!("Unknown GPU buffer {}", id)))
    }
}

/// Rounds a byte count up to the wgpu copy alignment.
fn aligned(bytes: u64) -> u64 {
    bytes.div_ceil(COPY_ALIGNMENT).max(1) * COPY_ALIGNMENT
}

#[cfg(feature = "native")]
impl DeviceRuntime for GpuDevice {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn allocate(&self, bytes: u64, label: &str) -> Result<BufferId, SolvCoreError> {
        let buffer = self.context.create_array_buffer(label, aligned(bytes));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers
            .lock()
            .map_err(|_| SolvCoreError::Internal("GPU buffer table poisoned".to_string()))?
            .insert(id, buffer);
        Ok(id)
    }

    fn free(&self, id: BufferId) -> Result<(), SolvCoreError> {
        let buffer = self
            .buffers
            .lock()
            .map_err(|_| SolvCoreError::Internal("GPU buffer table poisoned".to_string()))?
            .remove(&id)
            .ok_or_else(|| SolvCoreError::Internal(format!("Unknown GPU buffer {}", id)))?;
        buffer.destroy();
        Ok(())
    }

    fn copy_to_device(
        &self,
        id: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), SolvCoreError> {
        let buffer = self.buffer(id)?;
        self.context.upload(&buffer, offset, data)
    }

    fn copy_from_device(
        &self,
        id: BufferId,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), SolvCoreError> {
        let buffer = self.buffer(id)?;
        pollster::block_on(self.context.download(&buffer, offset, out))
    }

    fn free_memory(&self) -> Option<u64> {
        // wgpu exposes no free-memory query.
        None
    }
}
