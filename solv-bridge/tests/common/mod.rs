#![allow(dead_code)]

use solv_bridge::{IndexLists, PartitionDescriptor};
use solv_core::{SparseMatrix, Triplete};

// Helper for float comparison in tests
pub fn assert_approx_eq_vec(a: &[f64], b: &[f64], tolerance: f64) {
    assert_eq!(a.len(), b.len(), "Vector lengths differ");
    for i in 0..a.len() {
        let diff = (a[i] - b[i]).abs();
        assert!(
            diff <= tolerance,
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            b[i],
            a[i],
            diff
        );
    }
}

pub const DIAGONAL: f64 = 2.5;

/// One rank of a 1D chain of `ranks * chunk` unknowns carrying
/// `tridiag(-1, DIAGONAL, -1)`.
///
/// Local layout: `[left ghost] owned... [right ghost]`. The left ghost is
/// received as a single item, the right one as a block, and ghost rows are
/// left empty.
pub struct ChainRank {
    pub rank: usize,
    pub chunk: usize,
    pub partition: PartitionDescriptor,
    pub matrix: SparseMatrix,
    /// Global index of every local item.
    pub global: Vec<usize>,
}

impl ChainRank {
    pub fn new(rank: usize, ranks: usize, chunk: usize) -> Self {
        let has_left = rank > 0;
        let has_right = rank + 1 < ranks;
        let first_owned = usize::from(has_left);
        let len = chunk + first_owned + usize::from(has_right);

        let mut keep = vec![true; len];
        let mut global = Vec::with_capacity(len);
        if has_left {
            keep[0] = false;
            global.push(rank * chunk - 1);
        }
        global.extend(rank * chunk..(rank + 1) * chunk);
        if has_right {
            keep[len - 1] = false;
            global.push((rank + 1) * chunk);
        }

        let mut neighbors = Vec::new();
        let mut sends = Vec::new();
        let mut items = Vec::new();
        let mut blocks = Vec::new();
        if has_left {
            neighbors.push(rank - 1);
            sends.push(vec![first_owned, first_owned]);
            items.push(vec![0]);
            blocks.push(vec![]);
        }
        if has_right {
            neighbors.push(rank + 1);
            sends.push(vec![first_owned + chunk - 1]);
            items.push(vec![]);
            blocks.push(vec![len - 1, len]);
        }
        let partition = PartitionDescriptor::new(
            keep.clone(),
            neighbors,
            IndexLists::from_lists(&sends),
            IndexLists::from_lists(&items),
            IndexLists::from_lists(&blocks),
        )
        .unwrap();

        let mut triplets = Vec::new();
        for i in (0..len).filter(|&i| keep[i]) {
            triplets.push(Triplete::new(i, i, DIAGONAL));
            if i > 0 {
                triplets.push(Triplete::new(i, i - 1, -1.0));
            }
            if i + 1 < len {
                triplets.push(Triplete::new(i, i + 1, -1.0));
            }
        }
        let matrix = SparseMatrix::from_triplets(len, len, triplets).unwrap();
        Self {
            rank,
            chunk,
            partition,
            matrix,
            global,
        }
    }

    /// Local view of a global vector, ghosts included.
    pub fn local(&self, global: &[f64]) -> Vec<f64> {
        self.global.iter().map(|&g| global[g]).collect()
    }
}

/// `tridiag(-1, DIAGONAL, -1) * x` over the whole chain.
pub fn chain_product(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            let mut v = DIAGONAL * x[i];
            if i > 0 {
                v -= x[i - 1];
            }
            if i + 1 < n {
                v -= x[i + 1];
            }
            v
        })
        .collect()
}

pub fn smooth_solution(n: usize) -> Vec<f64> {
    (0..n).map(|i| (i as f64 * 0.2).cos() + 0.5).collect()
}
