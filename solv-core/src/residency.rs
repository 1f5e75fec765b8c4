//! Host/device residency tracking.
//!
//! Every transfer of a [`DeviceArray`] goes through a [`ResidencyManager`],
//! which allocates, copies and frees device buffers only when the requested
//! transition needs it:
//!
//! | state | operation | action | next |
//! |---|---|---|---|
//! | HostOnly | readable on device | allocate, copy host→device | HostDevice |
//! | Host | readable on device | copy host→device | HostDevice |
//! | HostDevice, Device | readable on device | none | unchanged |
//! | any but PartialHostDevice | writable on device | as readable | Device |
//! | Device | copy to host | copy device→host | HostDevice |
//! | PartialHostDevice | readable on device, copy to host | error | |
//! | Device, PartialHostDevice | partial copy to host | copy the range | PartialHostDevice |
//! | PartialHostDevice | partial copy to device | copy the range | Device |
//! | HostDevice, Device | host write | copy device→host from Device | Host |
//! | Device | delete on device | copy device→host, free | HostOnly |
//! | PartialHostDevice | delete on device | free, host ranges kept | HostOnly |

use crate::device::DeviceRuntime;
use crate::error::SolvCoreError;
use crate::vector::{DataLocation, DeviceAllocation, DeviceArray};
use bytemuck::Pod;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Transfer telemetry accumulated by a [`ResidencyManager`] and its clones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_to_device: u64,
    pub bytes_from_device: u64,
    pub copies_to_device: u64,
    pub copies_from_device: u64,
    pub allocations: u64,
    pub bytes_allocated: u64,
    pub frees: u64,
}

/// Limits how often large arrays may travel between host and device.
///
/// Arrays with at least `threshold` items count against `max_copies`; going
/// over the limit is an error. Used to spot host loops that should run on the
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyBudget {
    pub threshold: usize,
    pub max_copies: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_to_device: AtomicU64,
    bytes_from_device: AtomicU64,
    copies_to_device: AtomicU64,
    copies_from_device: AtomicU64,
    allocations: AtomicU64,
    bytes_allocated: AtomicU64,
    frees: AtomicU64,
    large_copies: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToDevice,
    FromDevice,
}

/// Mediates every host/device transfer of [`DeviceArray`]s.
///
/// Without a runtime (`host_only`) every operation is a no-op and arrays stay
/// `HostOnly`. Clones share the runtime and the telemetry counters.
#[derive(Debug, Clone)]
pub struct ResidencyManager {
    runtime: Option<Arc<dyn DeviceRuntime>>,
    counters: Arc<Counters>,
    clock: bool,
    copy_budget: Option<CopyBudget>,
}

impl Default for ResidencyManager {
    fn default() -> Self {
        Self::host_only()
    }
}

impl ResidencyManager {
    pub fn host_only() -> Self {
        Self {
            runtime: None,
            counters: Arc::new(Counters::default()),
            clock: false,
            copy_budget: None,
        }
    }

    pub fn with_runtime(runtime: Arc<dyn DeviceRuntime>) -> Self {
        log::info!("Residency manager using device runtime '{}'", runtime.name());
        Self {
            runtime: Some(runtime),
            ..Self::host_only()
        }
    }

    /// Logs duration and size of every allocation, copy and free.
    pub fn with_clock(mut self, clock: bool) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_copy_budget(mut self, budget: CopyBudget) -> Self {
        self.copy_budget = Some(budget);
        self
    }

    pub fn has_device(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn runtime(&self) -> Option<&Arc<dyn DeviceRuntime>> {
        self.runtime.as_ref()
    }

    pub fn stats(&self) -> TransferStats {
        let c = &self.counters;
        TransferStats {
            bytes_to_device: c.bytes_to_device.load(Ordering::Relaxed),
            bytes_from_device: c.bytes_from_device.load(Ordering::Relaxed),
            copies_to_device: c.copies_to_device.load(Ordering::Relaxed),
            copies_from_device: c.copies_from_device.load(Ordering::Relaxed),
            allocations: c.allocations.load(Ordering::Relaxed),
            bytes_allocated: c.bytes_allocated.load(Ordering::Relaxed),
            frees: c.frees.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        let c = &self.counters;
        for counter in [
            &c.bytes_to_device,
            &c.bytes_from_device,
            &c.copies_to_device,
            &c.copies_from_device,
            &c.allocations,
            &c.bytes_allocated,
            &c.frees,
            &c.large_copies,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        log::info!("Device transfer counters reset.");
    }

    /// Makes the device copy valid for reading.
    pub fn ensure_readable_on_device<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
    ) -> Result<(), SolvCoreError> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Ok(());
        };
        match array.location {
            DataLocation::HostOnly => {
                self.allocate(runtime, array)?;
                let len = array.len();
                self.copy(array, 0..len, Direction::ToDevice)?;
                array.location = DataLocation::HostDevice;
            }
            DataLocation::Host => {
                let len = array.len();
                self.copy(array, 0..len, Direction::ToDevice)?;
                array.location = DataLocation::HostDevice;
            }
            DataLocation::HostDevice | DataLocation::Device => {}
            DataLocation::PartialHostDevice => {
                return Err(SolvCoreError::residency(
                    array.label(),
                    "a partially synchronized array cannot be mapped to the device",
                ));
            }
        }
        Ok(())
    }

    /// Makes the device copy valid and authoritative: the host copy becomes stale.
    pub fn ensure_writable_on_device<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
    ) -> Result<(), SolvCoreError> {
        if self.runtime.is_none() {
            return Ok(());
        }
        self.ensure_readable_on_device(array)?;
        array.location = DataLocation::Device;
        Ok(())
    }

    /// Brings the whole array back to the host when the device copy is authoritative.
    pub fn copy_to_host<T: Pod>(&self, array: &mut DeviceArray<T>) -> Result<(), SolvCoreError> {
        match array.location {
            DataLocation::Device => {
                let len = array.len();
                self.copy(array, 0..len, Direction::FromDevice)?;
                array.location = DataLocation::HostDevice;
                Ok(())
            }
            DataLocation::PartialHostDevice => Err(SolvCoreError::residency(
                array.label(),
                "cannot copy a partially synchronized array to the host, copy its ranges instead",
            )),
            DataLocation::HostOnly | DataLocation::Host | DataLocation::HostDevice => Ok(()),
        }
    }

    /// Copies `range` back to the host. Does nothing when the host copy is
    /// already authoritative.
    pub fn copy_partial_to_host<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
        range: Range<usize>,
    ) -> Result<(), SolvCoreError> {
        check_range(array, &range)?;
        if matches!(
            array.location,
            DataLocation::Device | DataLocation::PartialHostDevice
        ) {
            self.copy(array, range, Direction::FromDevice)?;
            array.location = DataLocation::PartialHostDevice;
        }
        Ok(())
    }

    /// Pushes a host range back to the device after it was copied out with
    /// [`ResidencyManager::copy_partial_to_host`]. Only acts in `PartialHostDevice`.
    pub fn copy_partial_to_device<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
        range: Range<usize>,
    ) -> Result<(), SolvCoreError> {
        check_range(array, &range)?;
        if array.location == DataLocation::PartialHostDevice {
            self.copy(array, range, Direction::ToDevice)?;
            array.location = DataLocation::Device;
        }
        Ok(())
    }

    /// Declares that the host copy is about to be written: the host becomes
    /// authoritative.
    pub fn mark_host_modified<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
    ) -> Result<(), SolvCoreError> {
        match array.location {
            DataLocation::Device => {
                let len = array.len();
                self.copy(array, 0..len, Direction::FromDevice)?;
                array.location = DataLocation::Host;
            }
            DataLocation::HostDevice => array.location = DataLocation::Host,
            DataLocation::HostOnly | DataLocation::Host => {}
            DataLocation::PartialHostDevice => {
                return Err(SolvCoreError::residency(
                    array.label(),
                    "partially synchronized, copy the range back to the device first",
                ));
            }
        }
        Ok(())
    }

    /// Mutable host contents. A mirrored array becomes `Host`, so the next
    /// [`ResidencyManager::ensure_readable_on_device`] uploads the writes. In
    /// `PartialHostDevice` the state is kept: only writes inside ranges pushed
    /// back with [`ResidencyManager::copy_partial_to_device`] reach the device.
    pub fn host_mut<'a, T: Pod>(
        &self,
        array: &'a mut DeviceArray<T>,
    ) -> Result<&'a mut [T], SolvCoreError> {
        if array.location != DataLocation::PartialHostDevice {
            self.mark_host_modified(array)?;
        }
        array.host_mut()
    }

    /// Replaces the host contents (same length) and marks the host authoritative.
    pub fn overwrite_host<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
        data: &[T],
    ) -> Result<(), SolvCoreError> {
        if data.len() != array.len() {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Cannot overwrite array '{}' of {} items with {} items",
                array.label(),
                array.len(),
                data.len()
            )));
        }
        if array.location == DataLocation::PartialHostDevice {
            return Err(SolvCoreError::residency(
                array.label(),
                "partially synchronized, copy the range back to the device first",
            ));
        }
        array.host.copy_from_slice(data);
        if array.allocation.is_some() {
            array.location = DataLocation::Host;
        }
        Ok(())
    }

    /// Releases the device buffer, bringing the data back first when the device
    /// copy is authoritative. In `PartialHostDevice` the host contents are kept
    /// as they are, ranges copied out and edited on the host included. Does
    /// nothing when nothing is allocated.
    pub fn delete_on_device<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
    ) -> Result<(), SolvCoreError> {
        if array.allocation.is_none() {
            return Ok(());
        }
        match array.location {
            DataLocation::Device => {
                let len = array.len();
                self.copy(array, 0..len, Direction::FromDevice)?;
            }
            DataLocation::PartialHostDevice => log::debug!(
                "Deleting partially synchronized array '{}', keeping its host ranges",
                array.label()
            ),
            DataLocation::HostOnly | DataLocation::Host | DataLocation::HostDevice => {}
        }
        let start = Instant::now();
        if let Some(allocation) = array.allocation.take() {
            let bytes = allocation.bytes;
            drop(allocation);
            self.counters.frees.fetch_add(1, Ordering::Relaxed);
            if self.clock {
                log::info!(
                    "[clock] {:.3} ms [Data] Delete on device array '{}' of {}",
                    start.elapsed().as_secs_f64() * 1e3,
                    array.label(),
                    human_bytes(bytes)
                );
            }
        }
        array.location = DataLocation::HostOnly;
        Ok(())
    }

    fn allocate<T: Pod>(
        &self,
        runtime: &Arc<dyn DeviceRuntime>,
        array: &mut DeviceArray<T>,
    ) -> Result<(), SolvCoreError> {
        let bytes = array.size_bytes();
        if let Some(free) = runtime.free_memory() {
            if bytes > free {
                return Err(SolvCoreError::DeviceOutOfMemory {
                    requested: bytes,
                    free,
                });
            }
        }
        let start = Instant::now();
        let id = runtime.allocate(bytes, array.label())?;
        array.allocation = Some(DeviceAllocation {
            runtime: Arc::clone(runtime),
            id,
            bytes,
        });
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_allocated
            .fetch_add(bytes, Ordering::Relaxed);
        if self.clock {
            log::info!(
                "[clock] {:.3} ms [Data] Allocate on device array '{}' of {}",
                start.elapsed().as_secs_f64() * 1e3,
                array.label(),
                human_bytes(bytes)
            );
        }
        Ok(())
    }

    fn copy<T: Pod>(
        &self,
        array: &mut DeviceArray<T>,
        range: Range<usize>,
        direction: Direction,
    ) -> Result<(), SolvCoreError> {
        let (runtime, id) = match array.allocation.as_ref() {
            Some(allocation) => (Arc::clone(&allocation.runtime), allocation.id),
            None => {
                return Err(SolvCoreError::residency(
                    array.label(),
                    "not allocated on the device",
                ))
            }
        };
        self.charge_copy_budget(array)?;
        if range.is_empty() {
            return Ok(());
        }
        let offset = (range.start * std::mem::size_of::<T>()) as u64;
        let start = Instant::now();
        let bytes = match direction {
            Direction::ToDevice => {
                let data = array.bytes(range);
                runtime.copy_to_device(id, offset, data)?;
                self.counters
                    .bytes_to_device
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                self.counters.copies_to_device.fetch_add(1, Ordering::Relaxed);
                data.len() as u64
            }
            Direction::FromDevice => {
                let out = array.bytes_mut(range);
                runtime.copy_from_device(id, offset, out)?;
                self.counters
                    .bytes_from_device
                    .fetch_add(out.len() as u64, Ordering::Relaxed);
                self.counters
                    .copies_from_device
                    .fetch_add(1, Ordering::Relaxed);
                out.len() as u64
            }
        };
        log::trace!(
            "{:?} copy of {} bytes for '{}'",
            direction,
            bytes,
            array.label()
        );
        if self.clock {
            let seconds = start.elapsed().as_secs_f64();
            let arrow = match direction {
                Direction::ToDevice => "host->device",
                Direction::FromDevice => "device->host",
            };
            log::info!(
                "[clock] {:.3} ms [Data] Copy {} of array '{}' of {} {:.1} GB/s",
                seconds * 1e3,
                arrow,
                array.label(),
                human_bytes(bytes),
                bytes as f64 / seconds.max(1e-12) / 1e9
            );
        }
        Ok(())
    }

    fn charge_copy_budget<T: Pod>(&self, array: &DeviceArray<T>) -> Result<(), SolvCoreError> {
        let Some(budget) = self.copy_budget else {
            return Ok(());
        };
        if array.len() < budget.threshold {
            return Ok(());
        }
        let copies = self.counters.large_copies.fetch_add(1, Ordering::Relaxed) + 1;
        if copies > budget.max_copies {
            return Err(SolvCoreError::CopyBudgetExceeded {
                label: array.label().to_string(),
                len: array.len(),
                threshold: budget.threshold,
            });
        }
        Ok(())
    }
}

fn check_range<T: Pod>(array: &DeviceArray<T>, range: &Range<usize>) -> Result<(), SolvCoreError> {
    if range.start > range.end || range.end > array.len() {
        return Err(SolvCoreError::InvalidDimensions(format!(
            "Range {:?} out of array '{}' of {} items",
            range,
            array.label(),
            array.len()
        )));
    }
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostMemoryDevice;

    fn manager() -> (Arc<HostMemoryDevice>, ResidencyManager) {
        let device = Arc::new(HostMemoryDevice::new());
        let manager = ResidencyManager::with_runtime(device.clone());
        (device, manager)
    }

    #[test]
    fn test_ensure_readable_twice_copies_once() {
        let (_, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1.0f64, 2.0, 3.0]);
        manager.ensure_readable_on_device(&mut array).unwrap();
        manager.ensure_readable_on_device(&mut array).unwrap();
        let stats = manager.stats();
        assert_eq!(stats.copies_to_device, 1);
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.bytes_to_device, 24);
        assert_eq!(array.location(), DataLocation::HostDevice);
    }

    #[test]
    fn test_delete_on_host_only_is_noop() {
        let (_, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1.0f64; 4]);
        manager.delete_on_device(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::HostOnly);
        assert_eq!(manager.stats(), TransferStats::default());
    }

    #[test]
    fn test_write_then_copy_back() {
        let (device, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1.0f64, 2.0]);
        manager.ensure_writable_on_device(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::Device);
        assert!(array.host().is_err());

        // Simulate a device kernel writing the buffer
        let id = array.allocation.as_ref().unwrap().id;
        device
            .copy_to_device(id, 8, bytemuck::cast_slice(&[5.0f64]))
            .unwrap();

        manager.copy_to_host(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::HostDevice);
        assert_eq!(array.host().unwrap(), &[1.0, 5.0]);
    }

    #[test]
    fn test_partial_round_trip() {
        let (_, manager) = manager();
        let mut array = DeviceArray::new("x", vec![0.0f64; 8]);
        manager.ensure_writable_on_device(&mut array).unwrap();
        manager.copy_partial_to_host(&mut array, 2..4).unwrap();
        assert_eq!(array.location(), DataLocation::PartialHostDevice);

        assert!(manager.copy_to_host(&mut array).is_err());
        assert!(manager.ensure_readable_on_device(&mut array).is_err());

        manager.host_mut(&mut array).unwrap()[3] = 7.0;
        manager.copy_partial_to_device(&mut array, 2..4).unwrap();
        assert_eq!(array.location(), DataLocation::Device);
        manager.copy_to_host(&mut array).unwrap();
        assert_eq!(array.host().unwrap()[3], 7.0);
    }

    #[test]
    fn test_partial_copies_ignored_when_host_is_current() {
        let (_, manager) = manager();
        let mut array = DeviceArray::new("x", vec![0.0f64; 4]);
        manager.copy_partial_to_host(&mut array, 0..2).unwrap();
        manager.copy_partial_to_device(&mut array, 0..2).unwrap();
        assert_eq!(array.location(), DataLocation::HostOnly);
        assert!(manager.copy_partial_to_host(&mut array, 3..5).is_err());
    }

    #[test]
    fn test_mark_host_modified_then_remap() {
        let (_, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1.0f64; 2]);
        manager.ensure_readable_on_device(&mut array).unwrap();
        manager.mark_host_modified(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::Host);
        manager.ensure_readable_on_device(&mut array).unwrap();
        assert_eq!(manager.stats().copies_to_device, 2);
        assert_eq!(manager.stats().allocations, 1);
    }

    #[test]
    fn test_delete_copies_back_and_frees() {
        let (device, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1u32, 2, 3]);
        manager.ensure_writable_on_device(&mut array).unwrap();
        manager.delete_on_device(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::HostOnly);
        assert_eq!(manager.stats().copies_from_device, 1);
        assert_eq!(manager.stats().frees, 1);
        assert_eq!(device.live_buffers(), 0);
        manager.delete_on_device(&mut array).unwrap();
        assert_eq!(manager.stats().frees, 1);
    }

    #[test]
    fn test_host_write_reaches_mirrored_device_copy() {
        let (device, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1.0f64, 2.0]);
        manager.ensure_readable_on_device(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::HostDevice);

        manager.host_mut(&mut array).unwrap()[0] = 9.0;
        assert_eq!(array.location(), DataLocation::Host);
        manager.ensure_readable_on_device(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::HostDevice);

        let id = array.allocation.as_ref().unwrap().id;
        let mut on_device = [0.0f64; 2];
        device
            .copy_from_device(id, 0, bytemuck::cast_slice_mut(&mut on_device))
            .unwrap();
        assert_eq!(on_device, [9.0, 2.0]);
    }

    #[test]
    fn test_host_mut_on_device_array_copies_back_first() {
        let (device, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1.0f64, 2.0]);
        manager.ensure_writable_on_device(&mut array).unwrap();
        let id = array.allocation.as_ref().unwrap().id;
        device
            .copy_to_device(id, 8, bytemuck::cast_slice(&[5.0f64]))
            .unwrap();

        manager.host_mut(&mut array).unwrap()[0] = 3.0;
        assert_eq!(array.location(), DataLocation::Host);
        assert_eq!(array.host().unwrap(), &[3.0, 5.0]);
    }

    #[test]
    fn test_delete_keeps_partial_host_edits() {
        let (device, manager) = manager();
        let mut array = DeviceArray::new("x", vec![1.0f64, 2.0, 3.0]);
        manager.ensure_writable_on_device(&mut array).unwrap();
        manager.copy_partial_to_host(&mut array, 0..1).unwrap();
        manager.host_mut(&mut array).unwrap()[0] = 42.0;
        assert_eq!(array.location(), DataLocation::PartialHostDevice);

        manager.delete_on_device(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::HostOnly);
        assert_eq!(array.host().unwrap()[0], 42.0);
        assert_eq!(manager.stats().copies_from_device, 1);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_drop_releases_device_buffer() {
        let (device, manager) = manager();
        {
            let mut array = DeviceArray::new("x", vec![1.0f64; 16]);
            manager.ensure_readable_on_device(&mut array).unwrap();
            assert_eq!(device.live_buffers(), 1);
        }
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_allocation_larger_than_free_memory_fails() {
        let device = Arc::new(HostMemoryDevice::with_capacity(16));
        let manager = ResidencyManager::with_runtime(device);
        let mut array = DeviceArray::new("big", vec![0.0f64; 4]);
        match manager.ensure_readable_on_device(&mut array) {
            Err(SolvCoreError::DeviceOutOfMemory { requested: 32, free: 16 }) => {}
            other => panic!("Expected DeviceOutOfMemory, got {:?}", other),
        }
        assert_eq!(array.location(), DataLocation::HostOnly);
    }

    #[test]
    fn test_copy_budget() {
        let (_, manager) = manager();
        let manager = manager.with_copy_budget(CopyBudget {
            threshold: 4,
            max_copies: 1,
        });
        let mut small = DeviceArray::new("small", vec![0.0f64; 2]);
        let mut large = DeviceArray::new("large", vec![0.0f64; 4]);
        manager.ensure_readable_on_device(&mut small).unwrap();
        manager.ensure_readable_on_device(&mut large).unwrap();
        manager.mark_host_modified(&mut large).unwrap();
        match manager.ensure_readable_on_device(&mut large) {
            Err(SolvCoreError::CopyBudgetExceeded { len: 4, .. }) => {}
            other => panic!("Expected CopyBudgetExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_host_only_manager_is_noop() {
        let manager = ResidencyManager::host_only();
        let mut array = DeviceArray::new("x", vec![1.0f64]);
        manager.ensure_readable_on_device(&mut array).unwrap();
        manager.ensure_writable_on_device(&mut array).unwrap();
        manager.copy_to_host(&mut array).unwrap();
        assert_eq!(array.location(), DataLocation::HostOnly);
        assert_eq!(array.host().unwrap(), &[1.0]);
        assert_eq!(manager.stats(), TransferStats::default());
    }
}
