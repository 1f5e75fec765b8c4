//! # Solver Core Library
//!
//! Provides the compressed-row sparse matrix store, the device runtime
//! abstraction (with a wgpu runtime) and the host/device residency manager.

pub(crate) mod context;
pub mod device;
pub mod error;
pub mod residency;
pub mod sparse_matrix;
pub mod traits;
pub mod vector;

pub use device::{assign_device, BufferId, DeviceRuntime, GpuDevice, HostMemoryDevice};
pub use error::SolvCoreError;
pub use residency::{CopyBudget, ResidencyManager, TransferStats};
pub use sparse_matrix::{SparseMatrix, SparseMatrixIter, StorageKind, Triplete};
pub use traits::{Matrix, Vector};
pub use vector::{DataLocation, DeviceArray};
