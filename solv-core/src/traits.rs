use bytemuck::Pod;
use std::fmt::Debug;

/// Shape and storage size of a sparse operator, host store or distributed
/// interior + ghost pair alike.
pub trait Matrix: Debug {
    type Value: Pod + Default + Debug;

    /// (rows, columns). A distributed operator counts its ghost columns.
    fn dims(&self) -> (usize, usize);

    /// Stored coefficients.
    fn nnz(&self) -> usize;

    fn rows(&self) -> usize {
        self.dims().0
    }

    fn cols(&self) -> usize {
        self.dims().1
    }

    fn is_square(&self) -> bool {
        let (rows, cols) = self.dims();
        rows == cols
    }

    /// Mean stored coefficients per row, 0 for an empty matrix.
    fn fill_per_row(&self) -> f64 {
        match self.rows() {
            0 => 0.0,
            rows => self.nnz() as f64 / rows as f64,
        }
    }
}

/// Array that can be mirrored on a device.
pub trait Vector: Debug {
    type Value: Pod + Default + Debug;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes moved by a full copy between host and device.
    fn byte_len(&self) -> u64 {
        (self.len() * std::mem::size_of::<Self::Value>()) as u64
    }
}
