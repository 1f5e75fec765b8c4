use crate::device::{BufferId, DeviceRuntime};
use crate::error::SolvCoreError;
use crate::traits::Vector;
use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;
use std::sync::Arc;

/// Where the authoritative contents of a [`DeviceArray`] live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLocation {
    /// Host only, nothing allocated on the device.
    #[default]
    HostOnly,
    /// Allocated on the device, but the host copy is the up-to-date one.
    Host,
    /// Host and device copies are identical.
    HostDevice,
    /// The device copy is authoritative, the host copy is stale.
    Device,
    /// Device authoritative, with some ranges copied back to the host.
    PartialHostDevice,
}

impl DataLocation {
    pub fn is_on_device(&self) -> bool {
        !matches!(self, DataLocation::HostOnly)
    }
}

/// A device buffer owned by one array, released when dropped.
#[derive(Debug)]
pub(crate) struct DeviceAllocation {
    pub(crate) runtime: Arc<dyn DeviceRuntime>,
    pub(crate) id: BufferId,
    pub(crate) bytes: u64,
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.free(self.id) {
            log::warn!("Failed to free device buffer {}: {}", self.id, e);
        }
    }
}

/// A typed host array with an optional device mirror.
///
/// The residency state and the device buffer are only mutated through
/// [`crate::residency::ResidencyManager`]. The host contents can be read unless
/// the device copy is authoritative.
#[derive(Debug)]
pub struct DeviceArray<T: Pod> {
    label: String,
    pub(crate) host: Vec<T>,
    pub(crate) location: DataLocation,
    pub(crate) allocation: Option<DeviceAllocation>,
}

impl<T: Pod + Zeroable> DeviceArray<T> {
    pub fn new(label: impl Into<String>, data: Vec<T>) -> Self {
        Self {
            label: label.into(),
            host: data,
            location: DataLocation::HostOnly,
            allocation: None,
        }
    }

    pub fn zeros(label: impl Into<String>, len: usize) -> Self {
        Self::new(label, vec![T::zeroed(); len])
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn location(&self) -> DataLocation {
        self.location
    }

    pub fn is_allocated_on_device(&self) -> bool {
        self.allocation.is_some()
    }

    /// Size of the array in bytes.
    pub fn size_bytes(&self) -> u64 {
        std::mem::size_of_val(self.host.as_slice()) as u64
    }

    /// Host contents.
    ///
    /// # Errors
    /// Fails in the `Device` state, where the host copy is stale.
    pub fn host(&self) -> Result<&[T], SolvCoreError> {
        match self.location {
            DataLocation::Device => Err(SolvCoreError::residency(
                &self.label,
                "host copy is stale, copy the array back to the host first",
            )),
            _ => Ok(&self.host),
        }
    }

    /// Mutable host contents, without any state change. Callers outside the
    /// crate go through [`crate::residency::ResidencyManager::host_mut`].
    pub(crate) fn host_mut(&mut self) -> Result<&mut [T], SolvCoreError> {
        match self.location {
            DataLocation::Device => Err(SolvCoreError::residency(
                &self.label,
                "host copy is stale, copy the array back to the host first",
            )),
            _ => Ok(&mut self.host),
        }
    }

    pub(crate) fn bytes(&self, range: std::ops::Range<usize>) -> &[u8] {
        bytemuck::cast_slice(&self.host[range])
    }

    pub(crate) fn bytes_mut(&mut self, range: std::ops::Range<usize>) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.host[range])
    }
}

impl<T: Pod + Debug + Default> Vector for DeviceArray<T> {
    type Value = T;

    fn len(&self) -> usize {
        self.host.len()
    }
}
