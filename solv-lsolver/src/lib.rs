//! `solv-lsolver`: distributed Krylov solvers over a local interior block and
//! a ghost block.
//!
//! Each rank owns a contiguous set of rows. Products exchange ghost values
//! with the neighbors first, dot products are reduced across all ranks.

// Core modules
pub mod algorithms;
pub mod backend;
pub mod blas;
pub mod comm;
#[cfg(feature = "mpi")]
pub mod mpi_comm;
pub mod operator;
pub mod parallel;
pub mod precond;

pub use algorithms::{IterationControl, SolveInfo, SolverKind, SolverStatus, DEFAULT_GMRES_RESTART};
pub use backend::{KrylovBackend, LinearSolverBackend};
pub use comm::{ChannelComm, Communicator, SerialComm};
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
pub use operator::DistributedMatrix;
pub use parallel::ParallelManager;
pub use precond::{Preconditioner, PreconditionerKind};

// Re-export from solv_core
pub use solv_core::{
    DataLocation, DeviceArray, DeviceRuntime, GpuDevice, HostMemoryDevice, ResidencyManager,
    SolvCoreError, SparseMatrix, StorageKind, Vector,
};
