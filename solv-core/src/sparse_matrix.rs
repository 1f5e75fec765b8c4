use crate::error::SolvCoreError;
use crate::traits::Matrix;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Storage variant of a [`SparseMatrix`].
///
/// The variant is a stored tag: every access dispatches on it instead of on the
/// concrete type of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageKind {
    /// Every nonzero is stored.
    #[default]
    General,
    /// Only entries with `row <= col` are stored. Access to `(i, j)` with `i > j`
    /// is redirected to `(j, i)`, for reads and writes alike.
    Symmetric,
    /// Missing entries read as zero and writes to them are silently discarded.
    DiagonalOnly,
}

/// Represents a sparse matrix in compressed-row ("Morse") format on the CPU.
///
/// Indices are 0-based. `row_ptr[i]..row_ptr[i + 1]` is the range of row `i` in
/// `col_indices`/`values`, and `row_ptr[rows]` is the number of stored entries.
/// Column order within a row is only guaranteed after [`SparseMatrix::compact`].
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    /// Number of rows.
    rows: usize,
    /// Number of columns (may exceed `rows` for rectangular matrices).
    cols: usize,
    kind: StorageKind,
    /// Coefficients, positionally aligned with `col_indices`.
    pub(crate) values: Vec<f64>,
    /// Column index of every stored entry.
    pub(crate) col_indices: Vec<usize>,
    /// Row offsets, `rows + 1` entries.
    pub(crate) row_ptr: Vec<usize>,
    /// Raised by any mutation that alters the sparsity pattern.
    structure_changed: bool,
    /// Sink for writes to unallocated entries of a `DiagonalOnly` matrix.
    discarded: f64,
}

impl PartialEq for SparseMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.kind == other.kind
            && self.row_ptr == other.row_ptr
            && self.col_indices == other.col_indices
            && self.values == other.values
    }
}

impl SparseMatrix {
    /// Creates a new empty general SparseMatrix with given dimensions.
    pub fn new(rows: usize, cols: usize) -> Self {
        SparseMatrix {
            rows,
            cols,
            kind: StorageKind::General,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptr: vec![0; rows + 1], // Initialize row_ptr with zeros
            structure_changed: true,
            discarded: 0.0,
        }
    }

    /// Returns the same matrix tagged with another storage kind.
    /// The stored entries are not touched; use [`SparseMatrix::upper_part`] or
    /// [`SparseMatrix::to_general`] to convert between layouts.
    pub fn with_kind(mut self, kind: StorageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: Vec<Triplete>,
    ) -> Result<Self, SolvCoreError> {
        // Sort the triplets by row and then by column
        let mut coords = triplets;
        coords.sort_by_key(|&Triplete { row, col, .. }| (row, col));

        // Count non-zeros per row
        let mut row_ptr = vec![0usize; rows + 1];
        for &Triplete { row, .. } in &coords {
            if row >= rows {
                return Err(SolvCoreError::InvalidDimensions(
                    "Row index out of bounds".to_string(),
                ));
            }
            row_ptr[row + 1] += 1;
        }
        // Convert counts to cumulative row pointers
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        let nnz = coords.len();
        let mut values = vec![0.0; nnz];
        let mut col_indices = vec![0usize; nnz];
        let mut next = row_ptr.clone();
        for &Triplete { row, col, value } in &coords {
            if col >= cols {
                return Err(SolvCoreError::InvalidDimensions(
                    "Column index out of bounds".to_string(),
                ));
            }
            let pos = next[row];
            values[pos] = value;
            col_indices[pos] = col;
            next[row] += 1;
        }

        Ok(SparseMatrix {
            rows,
            cols,
            kind: StorageKind::General,
            values,
            col_indices,
            row_ptr,
            structure_changed: true,
            discarded: 0.0,
        })
    }

    /// Creates a SparseMatrix from CSR components.
    /// Performs basic validation.
    pub fn from_csr(
        rows: usize,
        cols: usize,
        values: Vec<f64>,
        col_indices: Vec<usize>,
        row_ptr: Vec<usize>,
    ) -> Result<Self, SolvCoreError> {
        if row_ptr.len() != rows + 1 {
            return Err(SolvCoreError::InvalidDimensions(
                "row_ptr length must be rows + 1".to_string(),
            ));
        }
        if values.len() != col_indices.len() {
            return Err(SolvCoreError::InvalidDimensions(
                "values and col_indices must have the same length".to_string(),
            ));
        }
        if row_ptr.first().copied().unwrap_or(0) != 0 {
            return Err(SolvCoreError::InvalidDimensions(
                "First element of row_ptr must be 0".to_string(),
            ));
        }
        if let Some(&last_ptr) = row_ptr.last() {
            if last_ptr != values.len() {
                return Err(SolvCoreError::InvalidDimensions(
                    "Last element of row_ptr must equal the number of non-zero values".to_string(),
                ));
            }
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(SolvCoreError::InvalidDimensions(
                "row_ptr must be non-decreasing".to_string(),
            ));
        }
        if col_indices.iter().any(|&c| c >= cols) {
            return Err(SolvCoreError::InvalidDimensions(
                "Column index out of bounds".to_string(),
            ));
        }

        Ok(SparseMatrix {
            rows,
            cols,
            kind: StorageKind::General,
            values,
            col_indices,
            row_ptr,
            structure_changed: true,
            discarded: 0.0,
        })
    }

    /// Creates a zero-valued matrix whose sparsity pattern is given row by row.
    /// Assembly code then fills the coefficients through [`SparseMatrix::get_mut`].
    pub fn from_pattern(
        rows: usize,
        cols: usize,
        pattern: &[Vec<usize>],
    ) -> Result<Self, SolvCoreError> {
        if pattern.len() != rows {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Pattern has {} rows, expected {}",
                pattern.len(),
                rows
            )));
        }
        let mut row_ptr = Vec::with_capacity(rows + 1);
        row_ptr.push(0);
        let mut col_indices = Vec::new();
        for row_cols in pattern {
            col_indices.extend_from_slice(row_cols);
            row_ptr.push(col_indices.len());
        }
        let values = vec![0.0; col_indices.len()];
        SparseMatrix::from_csr(rows, cols, values, col_indices, row_ptr)
    }

    /// Creates a SparseMatrix from a dense 2D representation, skipping zeros.
    pub fn from_dense(dense: &[Vec<f64>]) -> Result<Self, SolvCoreError> {
        let rows = dense.len();
        let cols = dense.first().map_or(0, |row| row.len());
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptr = vec![0; rows + 1];

        for (r, row_vec) in dense.iter().enumerate() {
            if row_vec.len() != cols {
                return Err(SolvCoreError::InvalidDimensions(
                    "Input dense matrix must be rectangular".to_string(),
                ));
            }
            for (c, &val) in row_vec.iter().enumerate() {
                if val != 0.0 {
                    values.push(val);
                    col_indices.push(c);
                }
            }
            row_ptr[r + 1] = values.len();
        }
        SparseMatrix::from_csr(rows, cols, values, col_indices, row_ptr)
    }

    /// Square identity matrix of order `n`.
    pub fn identity(n: usize) -> Self {
        SparseMatrix {
            rows: n,
            cols: n,
            kind: StorageKind::General,
            values: vec![1.0; n],
            col_indices: (0..n).collect(),
            row_ptr: (0..=n).collect(),
            structure_changed: true,
            discarded: 0.0,
        }
    }

    /// Returns the dimensions of the matrix (rows, cols).
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Returns the number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    fn check_row(&self, row: usize) -> Result<(), SolvCoreError> {
        if row >= self.rows {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Row {} out of a matrix with {} rows",
                row, self.rows
            )));
        }
        Ok(())
    }

    /// Number of stored entries in `row`.
    pub fn row_nnz(&self, row: usize) -> Result<usize, SolvCoreError> {
        self.check_row(row)?;
        Ok(self.row_ptr[row + 1] - self.row_ptr[row])
    }

    /// Column indices and coefficients of one row.
    pub fn row(&self, row: usize) -> Result<(&[usize], &[f64]), SolvCoreError> {
        self.check_row(row)?;
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        Ok((&self.col_indices[range.clone()], &self.values[range]))
    }

    /// Returns a slice containing the stored coefficients.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns a mutable slice containing the stored coefficients.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Returns a slice containing the column indices.
    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// Returns a slice containing the row pointers.
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// True when the sparsity pattern changed since the last
    /// [`SparseMatrix::acknowledge_structure`].
    pub fn structure_changed(&self) -> bool {
        self.structure_changed
    }

    pub fn acknowledge_structure(&mut self) {
        self.structure_changed = false;
    }

    fn canonical(&self, row: usize, col: usize) -> (usize, usize) {
        if self.kind == StorageKind::Symmetric && col < row {
            (col, row)
        } else {
            (row, col)
        }
    }

    fn position(&self, row: usize, col: usize) -> Option<usize> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        (self.row_ptr[row]..self.row_ptr[row + 1]).find(|&k| self.col_indices[k] == col)
    }

    /// Gets the coefficient at `(row, col)`; entries absent from the pattern
    /// (or out of range) read as zero.
    /// Lookup is a linear scan of the row, so it is meant for assembly and tests.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (row, col) = self.canonical(row, col);
        self.position(row, col).map_or(0.0, |k| self.values[k])
    }

    /// Mutable access to a coefficient already present in the sparsity pattern.
    ///
    /// # Errors
    /// Returns `UnallocatedEntry` if `(row, col)` is not part of the pattern,
    /// except for `DiagonalOnly` storage where the write is discarded.
    pub fn get_mut(&mut self, row: usize, col: usize) -> Result<&mut f64, SolvCoreError> {
        let (row, col) = self.canonical(row, col);
        match self.position(row, col) {
            Some(k) => Ok(&mut self.values[k]),
            None if self.kind == StorageKind::DiagonalOnly => {
                self.discarded = 0.0;
                Ok(&mut self.discarded)
            }
            None => {
                if cfg!(debug_assertions) {
                    log::error!(
                        "i or j are not suitable: i={} j={} n_rows={} n_cols={}",
                        row,
                        col,
                        self.rows,
                        self.cols
                    );
                }
                Err(SolvCoreError::UnallocatedEntry {
                    row,
                    col,
                    rows: self.rows,
                    cols: self.cols,
                })
            }
        }
    }

    /// Adds `value` to an entry of the pattern.
    pub fn add(&mut self, row: usize, col: usize, value: f64) -> Result<(), SolvCoreError> {
        *self.get_mut(row, col)? += value;
        Ok(())
    }

    /// Sets an entry, extending the sparsity pattern when it is absent.
    pub fn insert(&mut self, row: usize, col: usize, value: f64) -> Result<(), SolvCoreError> {
        let (row, col) = self.canonical(row, col);
        if row >= self.rows || col >= self.cols {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Entry ({},{}) outside a {}x{} matrix",
                row, col, self.rows, self.cols
            )));
        }
        if let Some(k) = self.position(row, col) {
            self.values[k] = value;
            return Ok(());
        }
        let pos = self.row_ptr[row + 1];
        self.values.insert(pos, value);
        self.col_indices.insert(pos, col);
        for ptr in &mut self.row_ptr[row + 1..] {
            *ptr += 1;
        }
        self.structure_changed = true;
        Ok(())
    }

    /// Sorts every row by column, merges duplicated columns by summing their
    /// coefficients and, if `eliminate_zeros` is set, drops zero coefficients.
    ///
    /// Calling it twice is the same as calling it once.
    pub fn compact(&mut self, eliminate_zeros: bool) {
        let nnz_before = self.nnz();
        let mut new_values = Vec::with_capacity(nnz_before);
        let mut new_cols = Vec::with_capacity(nnz_before);
        let mut new_ptr = Vec::with_capacity(self.rows + 1);
        new_ptr.push(0);

        let mut entries: Vec<(usize, f64)> = Vec::new();
        let mut merged: Vec<(usize, f64)> = Vec::new();
        for row in 0..self.rows {
            entries.clear();
            merged.clear();
            entries.extend(
                (self.row_ptr[row]..self.row_ptr[row + 1])
                    .map(|k| (self.col_indices[k], self.values[k])),
            );
            // Stable: duplicates are summed in their assembly order.
            entries.sort_by_key(|&(col, _)| col);
            for &(col, value) in &entries {
                match merged.last_mut() {
                    Some((last_col, acc)) if *last_col == col => *acc += value,
                    _ => merged.push((col, value)),
                }
            }
            for &(col, value) in &merged {
                if eliminate_zeros && value == 0.0 {
                    continue;
                }
                new_cols.push(col);
                new_values.push(value);
            }
            new_ptr.push(new_cols.len());
        }

        if new_cols.len() != nnz_before {
            self.structure_changed = true;
        }
        self.values = new_values;
        self.col_indices = new_cols;
        self.row_ptr = new_ptr;
    }

    /// Validates the CSR invariants: row pointers, column bounds and unique
    /// columns within each row.
    pub fn check_structure(&self) -> Result<(), SolvCoreError> {
        self.check(false)
    }

    /// Same as [`SparseMatrix::check_structure`] and additionally requires
    /// strictly increasing columns within each row.
    pub fn check_sorted_structure(&self) -> Result<(), SolvCoreError> {
        self.check(true)
    }

    pub fn is_compact(&self) -> bool {
        self.check_sorted_structure().is_ok()
    }

    fn check(&self, sorted: bool) -> Result<(), SolvCoreError> {
        if self.row_ptr.len() != self.rows + 1 || self.row_ptr[0] != 0 {
            return Err(SolvCoreError::InvalidDimensions(
                "Malformed row_ptr".to_string(),
            ));
        }
        if self.row_ptr[self.rows] != self.values.len()
            || self.values.len() != self.col_indices.len()
        {
            return Err(SolvCoreError::InvalidDimensions(
                "row_ptr does not match the number of stored entries".to_string(),
            ));
        }
        let mut seen: Vec<usize> = Vec::new();
        for row in 0..self.rows {
            let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
            if start > end {
                return Err(SolvCoreError::InvalidDimensions(format!(
                    "row_ptr decreases at row {}",
                    row
                )));
            }
            let cols = &self.col_indices[start..end];
            if let Some(&bad) = cols.iter().find(|&&c| c >= self.cols) {
                return Err(SolvCoreError::InvalidDimensions(format!(
                    "Column {} out of bounds in row {}",
                    bad, row
                )));
            }
            if sorted {
                if cols.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(SolvCoreError::InvalidDimensions(format!(
                        "Row {} is not sorted or holds duplicated columns",
                        row
                    )));
                }
            } else {
                seen.clear();
                seen.extend_from_slice(cols);
                seen.sort_unstable();
                if seen.windows(2).any(|w| w[0] == w[1]) {
                    return Err(SolvCoreError::InvalidDimensions(format!(
                        "Row {} holds duplicated columns",
                        row
                    )));
                }
            }
        }
        Ok(())
    }

    /// `y += A * x`. Symmetric storage contributes both triangles.
    pub fn multvect_add(&self, x: &[f64], y: &mut [f64]) -> Result<(), SolvCoreError> {
        if x.len() != self.cols || y.len() != self.rows {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "multvect: matrix {}x{} with x={} and y={}",
                self.rows,
                self.cols,
                x.len(),
                y.len()
            )));
        }
        let symmetric = self.kind == StorageKind::Symmetric;
        for row in 0..self.rows {
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                let col = self.col_indices[k];
                let a = self.values[k];
                y[row] += a * x[col];
                if symmetric && col != row {
                    y[col] += a * x[row];
                }
            }
        }
        Ok(())
    }

    /// `y = A * x`.
    pub fn multvect(&self, x: &[f64], y: &mut [f64]) -> Result<(), SolvCoreError> {
        y.iter_mut().for_each(|v| *v = 0.0);
        self.multvect_add(x, y)
    }

    /// `y += transpose(A) * x`.
    pub fn multvect_transpose_add(&self, x: &[f64], y: &mut [f64]) -> Result<(), SolvCoreError> {
        if self.kind == StorageKind::Symmetric {
            return self.multvect_add(x, y);
        }
        if x.len() != self.rows || y.len() != self.cols {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "multvect_transpose: matrix {}x{} with x={} and y={}",
                self.rows,
                self.cols,
                x.len(),
                y.len()
            )));
        }
        for row in 0..self.rows {
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                y[self.col_indices[k]] += self.values[k] * x[row];
            }
        }
        Ok(())
    }

    /// Multiplies every coefficient by `alpha`.
    pub fn scale(&mut self, alpha: f64) {
        self.values.iter_mut().for_each(|v| *v *= alpha);
    }

    /// Sets every coefficient to zero, keeping the pattern.
    pub fn clean(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Largest `|row - col|` over the stored entries.
    pub fn bandwidth(&self) -> usize {
        (0..self.rows)
            .flat_map(|row| {
                self.col_indices[self.row_ptr[row]..self.row_ptr[row + 1]]
                    .iter()
                    .map(move |&col| row.abs_diff(col))
            })
            .max()
            .unwrap_or(0)
    }

    /// Upper triangle (`row <= col`) of a square matrix, tagged `Symmetric`.
    pub fn upper_part(&self) -> Result<Self, SolvCoreError> {
        if !self.is_square() {
            return Err(SolvCoreError::InvalidDimensions(
                "upper_part requires a square matrix".to_string(),
            ));
        }
        let triplets = self
            .iter()
            .filter(|t| t.row <= t.col)
            .collect::<Vec<_>>();
        Ok(SparseMatrix::from_triplets(self.rows, self.cols, triplets)?
            .with_kind(StorageKind::Symmetric))
    }

    /// General-storage copy of this matrix. Symmetric storage is expanded to
    /// both triangles; the result is compacted.
    pub fn to_general(&self) -> Result<Self, SolvCoreError> {
        if self.kind != StorageKind::Symmetric {
            let mut general = self.clone().with_kind(StorageKind::General);
            general.compact(false);
            return Ok(general);
        }
        let mut triplets = Vec::with_capacity(2 * self.nnz());
        for t in self.iter() {
            if t.row != t.col {
                triplets.push(Triplete::new(t.col, t.row, t.value));
            }
            triplets.push(t);
        }
        let mut general = SparseMatrix::from_triplets(self.rows, self.cols, triplets)?;
        general.compact(false);
        Ok(general)
    }

    /// Transposed copy. Symmetric and diagonal storages are their own transpose.
    pub fn transpose(&self) -> Result<Self, SolvCoreError> {
        if self.kind != StorageKind::General {
            return Ok(self.clone());
        }
        let triplets = self
            .iter()
            .map(|t| Triplete::new(t.col, t.row, t.value))
            .collect();
        SparseMatrix::from_triplets(self.cols, self.rows, triplets)
    }

    /// Writes the matrix in Matrix Market coordinate format (1-based indices).
    /// Symmetric storage is written as the lower triangle, as the format expects.
    pub fn write_matrix_market<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let symmetry = match self.kind {
            StorageKind::Symmetric => "symmetric",
            _ => "general",
        };
        writeln!(writer, "%%MatrixMarket matrix coordinate real {}", symmetry)?;
        writeln!(writer, "{} {} {}", self.rows, self.cols, self.nnz())?;
        for t in self.iter() {
            let (i, j) = match self.kind {
                StorageKind::Symmetric => (t.col, t.row),
                _ => (t.row, t.col),
            };
            writeln!(writer, "{} {} {:.17e}", i + 1, j + 1, t.value)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> SparseMatrixIter<'_> {
        SparseMatrixIter {
            matrix: self,
            row: 0,
            pos: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplete {
    row: usize,
    col: usize,
    value: f64,
}

impl Triplete {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Triplete { row, col, value }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Iterates over the stored entries in row order.
pub struct SparseMatrixIter<'a> {
    matrix: &'a SparseMatrix,
    row: usize,
    pos: usize,
}

impl Iterator for SparseMatrixIter<'_> {
    type Item = Triplete;

    fn next(&mut self) -> Option<Self::Item> {
        while self.row < self.matrix.rows && self.pos >= self.matrix.row_ptr[self.row + 1] {
            self.row += 1;
        }
        if self.row >= self.matrix.rows {
            return None;
        }
        let index = self.pos;
        self.pos += 1;
        Some(Triplete {
            row: self.row,
            col: self.matrix.col_indices[index],
            value: self.matrix.values[index],
        })
    }
}

impl Matrix for SparseMatrix {
    type Value = f64;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nnz(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{SparseMatrix, StorageKind, Triplete};
    use crate::SolvCoreError;

    fn example_matrix() -> SparseMatrix {
        // [ 1.0, 0.0, 2.0, 0.0 ]
        // [ 0.0, 3.0, 0.0, 4.0 ]
        // [ 0.0, 0.0, 5.0, 0.0 ]
        SparseMatrix::from_csr(
            3,
            4,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![0, 2, 1, 3, 2],
            vec![0, 2, 4, 5],
        )
        .unwrap()
    }

    #[test]
    fn test_sparse_matrix_new() {
        let matrix = SparseMatrix::new(3, 4);
        assert_eq!(matrix.dims(), (3, 4));
        assert_eq!(matrix.nnz(), 0);
        assert_eq!(matrix.row_ptr, vec![0, 0, 0, 0]);
        assert_eq!(matrix.kind(), StorageKind::General);
    }

    #[test]
    fn test_sparse_matrix_from_csr_invalid_row_ptr_len() {
        let matrix = SparseMatrix::from_csr(3, 4, vec![1.0], vec![0], vec![0, 1]);
        match matrix.err().unwrap() {
            SolvCoreError::InvalidDimensions(msg) => assert!(msg.contains("row_ptr length")),
            _ => panic!("Expected InvalidDimensions error"),
        }
    }

    #[test]
    fn test_sparse_matrix_from_csr_invalid_last_row_ptr() {
        let matrix = SparseMatrix::from_csr(3, 4, vec![1.0, 2.0], vec![0, 1], vec![0, 1, 1, 1]);
        match matrix.err().unwrap() {
            SolvCoreError::InvalidDimensions(msg) => {
                assert!(msg.contains("Last element of row_ptr"))
            }
            _ => panic!("Expected InvalidDimensions error"),
        }
    }

    #[test]
    fn test_sparse_matrix_from_csr_invalid_col_index() {
        let matrix = SparseMatrix::from_csr(2, 3, vec![1.0, 2.0], vec![0, 3], vec![0, 1, 2]);
        match matrix.err().unwrap() {
            SolvCoreError::InvalidDimensions(msg) => {
                assert!(msg.contains("Column index out of bounds"))
            }
            _ => panic!("Expected InvalidDimensions error"),
        }
    }

    #[test]
    fn test_sparse_matrix_get() {
        let matrix = example_matrix();
        assert_eq!(matrix.get(0, 0), 1.0);
        assert_eq!(matrix.get(0, 2), 2.0);
        assert_eq!(matrix.get(1, 3), 4.0);
        assert_eq!(matrix.get(2, 2), 5.0);
        // Absent and out-of-range entries read as zero
        assert_eq!(matrix.get(0, 1), 0.0);
        assert_eq!(matrix.get(2, 3), 0.0);
        assert_eq!(matrix.get(3, 0), 0.0);
        assert_eq!(matrix.get(0, 4), 0.0);
    }

    #[test]
    fn test_get_mut_unallocated_entry_fails() {
        let mut matrix = example_matrix();
        *matrix.get_mut(1, 1).unwrap() = 7.0;
        assert_eq!(matrix.get(1, 1), 7.0);
        match matrix.get_mut(0, 1) {
            Err(SolvCoreError::UnallocatedEntry { row: 0, col: 1, .. }) => {}
            other => panic!("Expected UnallocatedEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_diagonal_only_discards_missing_entries() {
        let mut diag = SparseMatrix::identity(3).with_kind(StorageKind::DiagonalOnly);
        *diag.get_mut(0, 2).unwrap() = 42.0;
        assert_eq!(diag.get(0, 2), 0.0);
        assert_eq!(diag.nnz(), 3);
        diag.add(1, 1, 1.0).unwrap();
        assert_eq!(diag.get(1, 1), 2.0);
    }

    #[test]
    fn test_symmetric_access_is_redirected() {
        let upper = SparseMatrix::from_dense(&[
            vec![4.0, -1.0, 0.0],
            vec![0.0, 4.0, -2.0],
            vec![0.0, 0.0, 4.0],
        ])
        .unwrap()
        .with_kind(StorageKind::Symmetric);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(upper.get(i, j), upper.get(j, i));
            }
        }

        let mut a = upper.clone();
        let mut b = upper.clone();
        *a.get_mut(2, 1).unwrap() = 9.0;
        *b.get_mut(1, 2).unwrap() = 9.0;
        assert_eq!(a, b);
        assert_eq!(a.get(2, 1), 9.0);
        // The lower triangle is never allocated
        assert_eq!(a.nnz(), upper.nnz());
    }

    #[test]
    fn test_symmetric_multvect_matches_general() {
        let general = SparseMatrix::from_dense(&[
            vec![4.0, -1.0, 0.0],
            vec![-1.0, 4.0, -2.0],
            vec![0.0, -2.0, 4.0],
        ])
        .unwrap();
        let symmetric = general.upper_part().unwrap();
        assert_eq!(symmetric.kind(), StorageKind::Symmetric);
        assert_eq!(symmetric.nnz(), 5);

        let x = [1.0, 2.0, 3.0];
        let mut y_general = [0.0; 3];
        let mut y_symmetric = [0.0; 3];
        general.multvect(&x, &mut y_general).unwrap();
        symmetric.multvect(&x, &mut y_symmetric).unwrap();
        assert_eq!(y_general, y_symmetric);

        assert_eq!(symmetric.to_general().unwrap(), general);
    }

    #[test]
    fn test_compact_merges_sorts_and_is_idempotent() {
        let mut matrix = SparseMatrix::from_csr(
            2,
            3,
            vec![1.0, 2.0, 0.5, 0.0, 3.0],
            vec![2, 0, 2, 1, 0],
            vec![0, 3, 5],
        )
        .unwrap();
        matrix.acknowledge_structure();
        matrix.compact(true);
        assert_eq!(matrix.row_ptr(), &[0, 2, 3]);
        assert_eq!(matrix.col_indices(), &[0, 2, 0]);
        assert_eq!(matrix.values(), &[2.0, 1.5, 3.0]);
        assert!(matrix.structure_changed());
        assert!(matrix.is_compact());

        let once = matrix.clone();
        matrix.compact(true);
        assert_eq!(matrix, once);
    }

    #[test]
    fn test_insert_extends_pattern() {
        let mut matrix = SparseMatrix::new(2, 2);
        matrix.acknowledge_structure();
        matrix.insert(1, 0, 3.0).unwrap();
        matrix.insert(0, 1, 2.0).unwrap();
        matrix.insert(1, 0, 4.0).unwrap();
        assert!(matrix.structure_changed());
        assert_eq!(matrix.nnz(), 2);
        assert_eq!(matrix.get(1, 0), 4.0);
        assert_eq!(matrix.row_ptr(), &[0, 1, 2]);
        matrix.check_structure().unwrap();
    }

    #[test]
    fn test_transpose_and_bandwidth() {
        let matrix = example_matrix();
        let t = matrix.transpose().unwrap();
        assert_eq!(t.dims(), (4, 3));
        assert_eq!(t.get(3, 1), 4.0);
        assert_eq!(matrix.bandwidth(), 2);

        let x = [1.0, 1.0, 1.0];
        let mut y = [0.0; 4];
        matrix.multvect_transpose_add(&x, &mut y).unwrap();
        assert_eq!(y, [1.0, 3.0, 7.0, 4.0]);
    }

    #[test]
    fn test_iter_skips_empty_rows() {
        let matrix = SparseMatrix::from_triplets(
            3,
            3,
            vec![Triplete::new(2, 1, 5.0), Triplete::new(0, 0, 1.0)],
        )
        .unwrap();
        let entries: Vec<_> = matrix.iter().map(|t| (t.row(), t.col(), t.value())).collect();
        assert_eq!(entries, vec![(0, 0, 1.0), (2, 1, 5.0)]);
    }

    #[test]
    fn test_write_matrix_market() {
        let matrix = SparseMatrix::from_dense(&[vec![2.0, 1.0], vec![0.0, 3.0]])
            .unwrap()
            .with_kind(StorageKind::Symmetric);
        let mut out = Vec::new();
        matrix.write_matrix_market(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "%%MatrixMarket matrix coordinate real symmetric");
        assert_eq!(lines[1], "2 2 3");
        assert!(lines[3].starts_with("2 1 "));
    }

    #[test]
    fn test_row_access_checks_bounds() {
        let matrix = example_matrix();
        assert_eq!(matrix.row_nnz(1).unwrap(), 2);
        let (cols, values) = matrix.row(1).unwrap();
        assert_eq!(cols, &[1, 3]);
        assert_eq!(values, &[3.0, 4.0]);

        match matrix.row(3) {
            Err(SolvCoreError::InvalidDimensions(msg)) => assert!(msg.contains("Row 3")),
            other => panic!("Expected InvalidDimensions, got {:?}", other),
        }
        match matrix.row_nnz(10) {
            Err(SolvCoreError::InvalidDimensions(_)) => {}
            other => panic!("Expected InvalidDimensions, got {:?}", other),
        }
    }

    #[test]
    fn test_matrix_trait_fill() {
        use crate::traits::Matrix;
        let matrix = example_matrix();
        assert_eq!(Matrix::nnz(&matrix), 5);
        assert!((matrix.fill_per_row() - 5.0 / 3.0).abs() < 1e-15);
        assert_eq!(SparseMatrix::new(0, 0).fill_per_row(), 0.0);
    }
}
