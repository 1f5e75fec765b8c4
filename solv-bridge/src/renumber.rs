use crate::error::{BridgeError, Result};
use crate::partition::PartitionDescriptor;
use solv_core::{SparseMatrix, StorageKind};

/// Solver-local numbering: owned items first, ghosts after.
///
/// `renum[i]` is the rank of item `i` among the items of its own class, so
/// an owned item lands at solver row `renum[i]` and a ghost item at ghost
/// slot `renum[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRenumbering {
    keep: Vec<bool>,
    renum: Vec<usize>,
    owned_items: Vec<usize>,
    ghost_items: Vec<usize>,
}

impl LocalRenumbering {
    pub fn new(keep_flags: &[bool]) -> Self {
        let mut renum = Vec::with_capacity(keep_flags.len());
        let mut owned_items = Vec::new();
        let mut ghost_items = Vec::new();
        for (i, &keep) in keep_flags.iter().enumerate() {
            if keep {
                renum.push(owned_items.len());
                owned_items.push(i);
            } else {
                renum.push(ghost_items.len());
                ghost_items.push(i);
            }
        }
        Self {
            keep: keep_flags.to_vec(),
            renum,
            owned_items,
            ghost_items,
        }
    }

    pub fn from_partition(partition: &PartitionDescriptor) -> Self {
        Self::new(partition.keep_flags())
    }

    pub fn len(&self) -> usize {
        self.keep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    pub fn owned_count(&self) -> usize {
        self.owned_items.len()
    }

    pub fn ghost_count(&self) -> usize {
        self.ghost_items.len()
    }

    pub fn is_owned(&self, item: usize) -> bool {
        self.keep[item]
    }

    /// Rank of `item` within its class.
    pub fn renum(&self, item: usize) -> usize {
        self.renum[item]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.renum
    }

    /// Local index of each owned solver row.
    pub fn owned_items(&self) -> &[usize] {
        &self.owned_items
    }

    /// Local index of each ghost slot.
    pub fn ghost_items(&self) -> &[usize] {
        &self.ghost_items
    }

    fn check_len(&self, label: &'static str, len: usize, expected: usize) -> Result<()> {
        if len != expected {
            return Err(BridgeError::VectorSize {
                label,
                len,
                expected,
            });
        }
        Ok(())
    }

    /// Owned entries of `v`, in solver order.
    pub fn gather_owned(&self, v: &[f64]) -> Result<Vec<f64>> {
        self.check_len("to renumber", v.len(), self.len())?;
        Ok(self.owned_items.iter().map(|&i| v[i]).collect())
    }

    /// Splits `v` into its owned part and its ghost part.
    pub fn split_vector(&self, v: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        let owned = self.gather_owned(v)?;
        let ghost = self.ghost_items.iter().map(|&i| v[i]).collect();
        Ok((owned, ghost))
    }

    /// Inverse of [`LocalRenumbering::split_vector`].
    pub fn merge_vector(&self, owned: &[f64], ghost: &[f64]) -> Result<Vec<f64>> {
        let mut v = vec![0.0; self.len()];
        self.scatter_owned(owned, &mut v)?;
        self.scatter_ghost(ghost, &mut v)?;
        Ok(v)
    }

    /// Writes solver-ordered owned values back to their local positions.
    pub fn scatter_owned(&self, owned: &[f64], v: &mut [f64]) -> Result<()> {
        self.check_len("owned part", owned.len(), self.owned_count())?;
        self.check_len("to un-renumber", v.len(), self.len())?;
        for (&i, &value) in self.owned_items.iter().zip(owned) {
            v[i] = value;
        }
        Ok(())
    }

    pub fn scatter_ghost(&self, ghost: &[f64], v: &mut [f64]) -> Result<()> {
        self.check_len("ghost part", ghost.len(), self.ghost_count())?;
        self.check_len("to un-renumber", v.len(), self.len())?;
        for (&i, &value) in self.ghost_items.iter().zip(ghost) {
            v[i] = value;
        }
        Ok(())
    }

    /// Splits the owned rows of `matrix` into the interior block (owned
    /// columns) and the ghost block (ghost columns), both in solver
    /// numbering. Ghost rows are dropped.
    ///
    /// Symmetric storage is expanded first; an uncompacted matrix is
    /// compacted on a copy.
    ///
    /// # Errors
    /// `KeepFlagsMismatch` if the matrix is not `len() x len()`.
    pub fn split_matrix(&self, matrix: &SparseMatrix) -> Result<(SparseMatrix, SparseMatrix)> {
        let (rows, cols) = matrix.dims();
        if rows != self.len() || cols != self.len() {
            return Err(BridgeError::KeepFlagsMismatch {
                flags: self.len(),
                rows,
                cols,
            });
        }
        let expanded;
        let matrix = if matrix.kind() == StorageKind::Symmetric || !matrix.is_compact() {
            expanded = matrix.to_general()?;
            &expanded
        } else {
            matrix
        };

        let n = self.owned_count();
        let mut interior_ptr = Vec::with_capacity(n + 1);
        let mut interior_cols = Vec::new();
        let mut interior_values = Vec::new();
        let mut ghost_ptr = Vec::with_capacity(n + 1);
        let mut ghost_cols = Vec::new();
        let mut ghost_values = Vec::new();
        interior_ptr.push(0);
        ghost_ptr.push(0);
        for &i in &self.owned_items {
            let (row_cols, row_values) = matrix.row(i)?;
            for (&j, &value) in row_cols.iter().zip(row_values) {
                if self.keep[j] {
                    interior_cols.push(self.renum[j]);
                    interior_values.push(value);
                } else {
                    ghost_cols.push(self.renum[j]);
                    ghost_values.push(value);
                }
            }
            interior_ptr.push(interior_cols.len());
            ghost_ptr.push(ghost_cols.len());
        }
        let interior =
            SparseMatrix::from_csr(n, n, interior_values, interior_cols, interior_ptr)?;
        let ghost =
            SparseMatrix::from_csr(n, self.ghost_count(), ghost_values, ghost_cols, ghost_ptr)?;
        Ok((interior, ghost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solv_core::Triplete;

    #[test]
    fn test_renum_ranks_within_class() {
        let renum = LocalRenumbering::new(&[false, true, true, false, true]);
        assert_eq!(renum.as_slice(), &[0, 0, 1, 1, 2]);
        assert_eq!(renum.owned_items(), &[1, 2, 4]);
        assert_eq!(renum.ghost_items(), &[0, 3]);
    }

    #[test]
    fn test_split_merge_round_trip_random() {
        let mut rng = fastrand::Rng::with_seed(17);
        for _ in 0..50 {
            let len = rng.usize(0..40);
            let keep: Vec<bool> = (0..len).map(|_| rng.bool()).collect();
            let renum = LocalRenumbering::new(&keep);
            let v: Vec<f64> = (0..len).map(|_| rng.f64() * 100.0 - 50.0).collect();
            let (owned, ghost) = renum.split_vector(&v).unwrap();
            assert_eq!(owned.len() + ghost.len(), len);
            assert_eq!(renum.merge_vector(&owned, &ghost).unwrap(), v);
        }
    }

    #[test]
    fn test_split_matrix_routes_columns() {
        // local order: ghost 0, owned 1 2, ghost 3
        let keep = [false, true, true, false];
        let a = SparseMatrix::from_triplets(
            4,
            4,
            vec![
                Triplete::new(1, 0, -1.0),
                Triplete::new(1, 1, 2.0),
                Triplete::new(1, 2, -1.0),
                Triplete::new(2, 1, -1.0),
                Triplete::new(2, 2, 2.0),
                Triplete::new(2, 3, -1.0),
                // rows of ghost items are never solved
                Triplete::new(0, 0, 9.0),
                Triplete::new(3, 3, 9.0),
            ],
        )
        .unwrap();
        let (interior, ghost) = LocalRenumbering::new(&keep).split_matrix(&a).unwrap();
        assert_eq!(interior.dims(), (2, 2));
        assert_eq!(ghost.dims(), (2, 2));
        assert_eq!(interior.get(0, 0), 2.0);
        assert_eq!(interior.get(0, 1), -1.0);
        assert_eq!(interior.get(1, 0), -1.0);
        assert_eq!(ghost.get(0, 0), -1.0);
        assert_eq!(ghost.get(0, 1), 0.0);
        assert_eq!(ghost.get(1, 1), -1.0);
        assert_eq!(interior.nnz() + ghost.nnz(), 6);
    }

    #[test]
    fn test_rows_without_ghost_references_keep_ghost_block_rectangular() {
        let keep = [true, true, true, false];
        let a = SparseMatrix::from_dense(&[
            vec![2.0, -1.0, 0.0, 0.0],
            vec![-1.0, 2.0, -1.0, 0.0],
            vec![0.0, -1.0, 2.0, -1.0],
            vec![0.0, 0.0, 0.0, 0.0],
        ])
        .unwrap();
        let (_, ghost) = LocalRenumbering::new(&keep).split_matrix(&a).unwrap();
        assert_eq!(ghost.dims(), (3, 1));
        assert_eq!(ghost.row_ptr(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_symmetric_storage_is_expanded() {
        let upper = SparseMatrix::from_dense(&[vec![4.0, 1.0], vec![1.0, 3.0]])
            .unwrap()
            .upper_part()
            .unwrap();
        let (interior, ghost) = LocalRenumbering::new(&[true, true]).split_matrix(&upper).unwrap();
        assert_eq!(interior.get(1, 0), 1.0);
        assert_eq!(interior.kind(), StorageKind::General);
        assert_eq!(interior.nnz(), 4);
        assert_eq!(ghost.nnz(), 0);
    }

    #[test]
    fn test_keep_flags_size_mismatch() {
        let a = SparseMatrix::identity(3);
        match LocalRenumbering::new(&[true, true]).split_matrix(&a) {
            Err(BridgeError::KeepFlagsMismatch { flags, rows, cols }) => {
                assert_eq!((flags, rows, cols), (2, 3, 3))
            }
            other => panic!("Expected a keep flags mismatch, got {:?}", other),
        }
    }
}
