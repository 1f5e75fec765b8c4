use crate::comm::Communicator;
use crate::parallel::ParallelManager;
use solv_core::{DeviceArray, Matrix, ResidencyManager, SolvCoreError, SparseMatrix, StorageKind};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

/// Device mirror of the two CSR blocks.
#[derive(Debug)]
struct CsrMirror {
    interior_row_ptr: DeviceArray<u32>,
    interior_cols: DeviceArray<u32>,
    interior_values: DeviceArray<f64>,
    ghost_row_ptr: DeviceArray<u32>,
    ghost_cols: DeviceArray<u32>,
    ghost_values: DeviceArray<f64>,
}

impl CsrMirror {
    fn new(interior: &SparseMatrix, ghost: &SparseMatrix) -> Result<Self, SolvCoreError> {
        Ok(Self {
            interior_row_ptr: DeviceArray::new("interior row_ptr", to_u32(interior.row_ptr())?),
            interior_cols: DeviceArray::new("interior col_indices", to_u32(interior.col_indices())?),
            interior_values: DeviceArray::new("interior values", interior.values().to_vec()),
            ghost_row_ptr: DeviceArray::new("ghost row_ptr", to_u32(ghost.row_ptr())?),
            ghost_cols: DeviceArray::new("ghost col_indices", to_u32(ghost.col_indices())?),
            ghost_values: DeviceArray::new("ghost values", ghost.values().to_vec()),
        })
    }

    fn map(&mut self, residency: &ResidencyManager) -> Result<(), SolvCoreError> {
        residency.ensure_readable_on_device(&mut self.interior_row_ptr)?;
        residency.ensure_readable_on_device(&mut self.interior_cols)?;
        residency.ensure_readable_on_device(&mut self.interior_values)?;
        residency.ensure_readable_on_device(&mut self.ghost_row_ptr)?;
        residency.ensure_readable_on_device(&mut self.ghost_cols)?;
        residency.ensure_readable_on_device(&mut self.ghost_values)
    }

    fn unmap(&mut self, residency: &ResidencyManager) -> Result<(), SolvCoreError> {
        residency.delete_on_device(&mut self.interior_row_ptr)?;
        residency.delete_on_device(&mut self.interior_cols)?;
        residency.delete_on_device(&mut self.interior_values)?;
        residency.delete_on_device(&mut self.ghost_row_ptr)?;
        residency.delete_on_device(&mut self.ghost_cols)?;
        residency.delete_on_device(&mut self.ghost_values)
    }
}

fn to_u32(indices: &[usize]) -> Result<Vec<u32>, SolvCoreError> {
    indices
        .iter()
        .map(|&i| {
            u32::try_from(i).map_err(|_| {
                SolvCoreError::UnsupportedOperation(format!(
                    "index {} does not fit the 32-bit device layout",
                    i
                ))
            })
        })
        .collect()
}

/// Distributed operator of one rank: the interior block (owned rows × owned
/// columns), the ghost block (owned rows × ghost columns) and the exchange
/// plan that fills the ghost values before every product.
#[derive(Debug)]
pub struct DistributedMatrix {
    interior: SparseMatrix,
    ghost: SparseMatrix,
    pm: ParallelManager,
    comm: Arc<dyn Communicator>,
    mirror: Option<CsrMirror>,
}

impl DistributedMatrix {
    /// Takes ownership of both blocks and sorts their rows.
    pub fn new(
        mut interior: SparseMatrix,
        mut ghost: SparseMatrix,
        pm: ParallelManager,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, SolvCoreError> {
        let n = pm.local_rows();
        if interior.dims() != (n, n) {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Interior block is {}x{}, expected {}x{}",
                interior.rows(),
                interior.cols(),
                n,
                n
            )));
        }
        if ghost.dims() != (n, pm.ghost_rows()) {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Ghost block is {}x{}, expected {}x{}",
                ghost.rows(),
                ghost.cols(),
                n,
                pm.ghost_rows()
            )));
        }
        if interior.kind() != StorageKind::General || ghost.kind() != StorageKind::General {
            return Err(SolvCoreError::UnsupportedOperation(
                "distributed blocks must use general storage".to_string(),
            ));
        }
        interior.compact(false);
        ghost.compact(false);
        Ok(Self {
            interior,
            ghost,
            pm,
            comm,
            mirror: None,
        })
    }

    /// Operator of a single rank owning every row.
    pub fn serial(matrix: SparseMatrix) -> Result<Self, SolvCoreError> {
        let n = matrix.rows();
        let matrix = matrix.to_general()?;
        Self::new(
            matrix,
            SparseMatrix::new(n, 0),
            ParallelManager::serial(n),
            Arc::new(crate::comm::SerialComm),
        )
    }

    pub fn local_rows(&self) -> usize {
        self.pm.local_rows()
    }

    pub fn ghost_rows(&self) -> usize {
        self.pm.ghost_rows()
    }

    pub fn global_rows(&self) -> usize {
        self.pm.global_rows()
    }

    pub fn interior(&self) -> &SparseMatrix {
        &self.interior
    }

    pub fn ghost(&self) -> &SparseMatrix {
        &self.ghost
    }

    pub fn parallel_manager(&self) -> &ParallelManager {
        &self.pm
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn is_on_device(&self) -> bool {
        self.mirror.is_some()
    }

    /// Diagonal of the interior block.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.local_rows())
            .map(|i| self.interior.get(i, i))
            .collect()
    }

    /// Replaces the coefficients, keeping the sparsity pattern.
    ///
    /// # Errors
    /// `InvalidDimensions` if either block's pattern differs from the current one.
    pub fn update_coefficients(
        &mut self,
        mut interior: SparseMatrix,
        mut ghost: SparseMatrix,
        residency: &ResidencyManager,
    ) -> Result<(), SolvCoreError> {
        interior.compact(false);
        ghost.compact(false);
        let same_pattern = |old: &SparseMatrix, new: &SparseMatrix| {
            old.dims() == new.dims()
                && old.row_ptr() == new.row_ptr()
                && old.col_indices() == new.col_indices()
        };
        if !same_pattern(&self.interior, &interior) || !same_pattern(&self.ghost, &ghost) {
            return Err(SolvCoreError::InvalidDimensions(
                "Sparsity pattern changed, the operator must be rebuilt".to_string(),
            ));
        }
        self.interior.values_mut().copy_from_slice(interior.values());
        self.ghost.values_mut().copy_from_slice(ghost.values());
        if let Some(mirror) = self.mirror.as_mut() {
            residency.overwrite_host(&mut mirror.interior_values, interior.values())?;
            residency.overwrite_host(&mut mirror.ghost_values, ghost.values())?;
            mirror.map(residency)?;
        }
        Ok(())
    }

    /// `y = A x` over the owned rows. Ghost values of `x` are fetched from the
    /// neighbors first.
    pub fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), SolvCoreError> {
        let mut ghost_values = vec![0.0; self.ghost_rows()];
        self.pm.exchange(self.comm.as_ref(), x, &mut ghost_values)?;
        self.apply_with_ghosts(x, &ghost_values, y)
    }

    /// `y = A x` with ghost values already known.
    pub fn apply_with_ghosts(
        &self,
        x: &[f64],
        ghost_values: &[f64],
        y: &mut [f64],
    ) -> Result<(), SolvCoreError> {
        self.interior.multvect(x, y)?;
        self.ghost.multvect_add(ghost_values, y)
    }

    /// Global dot product over owned entries.
    pub fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, SolvCoreError> {
        self.comm.all_reduce_sum(crate::blas::dot(a, b))
    }

    /// Mirrors both CSR blocks on the device.
    pub fn move_to_device(&mut self, residency: &ResidencyManager) -> Result<(), SolvCoreError> {
        if !residency.has_device() {
            return Ok(());
        }
        let start = Instant::now();
        let mut mirror = match self.mirror.take() {
            Some(mirror) => mirror,
            None => CsrMirror::new(&self.interior, &self.ghost)?,
        };
        mirror.map(residency)?;
        self.mirror = Some(mirror);
        log::info!(
            "Time to copy matrix on device: {:.3} s",
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Releases the device mirror.
    pub fn move_to_host(&mut self, residency: &ResidencyManager) -> Result<(), SolvCoreError> {
        if let Some(mut mirror) = self.mirror.take() {
            mirror.unmap(residency)?;
        }
        Ok(())
    }

    /// Checks both blocks are sorted, duplicate free and in range.
    pub fn check(&self) -> Result<(), SolvCoreError> {
        self.interior.check_sorted_structure()?;
        self.ghost.check_sorted_structure()
    }

    /// Writes the interior block in Matrix Market format.
    pub fn write_matrix_market<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.interior.write_matrix_market(writer)
    }

    /// Short summary line, as logged after a build.
    pub fn info(&self) -> String {
        format!(
            "DistributedMatrix rows={} (global {}) ghost={} nnz(interior)={} nnz(ghost)={}{}",
            self.local_rows(),
            self.global_rows(),
            self.ghost_rows(),
            self.interior.nnz(),
            self.ghost.nnz(),
            if self.is_on_device() { " [device]" } else { "" }
        )
    }
}

impl Matrix for DistributedMatrix {
    type Value = f64;

    fn dims(&self) -> (usize, usize) {
        (self.local_rows(), self.local_rows() + self.ghost_rows())
    }

    fn nnz(&self) -> usize {
        self.interior.nnz() + self.ghost.nnz()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solv_core::{DataLocation, HostMemoryDevice};

    fn laplacian(n: usize) -> SparseMatrix {
        let dense: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| match i.abs_diff(j) {
                        0 => 2.0,
                        1 => -1.0,
                        _ => 0.0,
                    })
                    .collect()
            })
            .collect();
        SparseMatrix::from_dense(&dense).unwrap()
    }

    #[test]
    fn test_serial_apply() {
        let op = DistributedMatrix::serial(laplacian(3)).unwrap();
        let mut y = [0.0; 3];
        op.apply(&[1.0, 1.0, 1.0], &mut y).unwrap();
        assert_eq!(y, [1.0, 0.0, 1.0]);
        assert_eq!(op.diagonal(), vec![2.0, 2.0, 2.0]);
        op.check().unwrap();
    }

    #[test]
    fn test_ghost_block_dimensions_checked() {
        let result = DistributedMatrix::new(
            laplacian(2),
            SparseMatrix::new(2, 1),
            ParallelManager::serial(2),
            Arc::new(crate::comm::SerialComm),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_device_mirror_and_update() {
        let device = Arc::new(HostMemoryDevice::new());
        let residency = ResidencyManager::with_runtime(device.clone());
        let mut op = DistributedMatrix::serial(laplacian(3)).unwrap();
        op.move_to_device(&residency).unwrap();
        assert!(op.is_on_device());
        assert_eq!(residency.stats().allocations, 6);

        let mut scaled = laplacian(3);
        scaled.scale(2.0);
        op.update_coefficients(scaled, SparseMatrix::new(3, 0), &residency)
            .unwrap();
        assert_eq!(op.diagonal(), vec![4.0, 4.0, 4.0]);
        let mirror = op.mirror.as_ref().unwrap();
        assert_eq!(mirror.interior_values.location(), DataLocation::HostDevice);

        op.move_to_host(&residency).unwrap();
        assert!(!op.is_on_device());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_update_with_new_pattern_fails() {
        let residency = ResidencyManager::host_only();
        let mut op = DistributedMatrix::serial(laplacian(3)).unwrap();
        let result = op.update_coefficients(
            SparseMatrix::identity(3),
            SparseMatrix::new(3, 0),
            &residency,
        );
        assert!(result.is_err());
    }
}
