use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolvCoreError {
    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Matrix entry ({row},{col}) is not allocated in the sparsity pattern of a {rows}x{cols} matrix")]
    UnallocatedEntry {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Residency error on array '{label}': {message}")]
    Residency { label: String, message: String },

    #[error("Trying to allocate {requested} bytes on device memory whereas only {free} bytes are available")]
    DeviceOutOfMemory { requested: u64, free: u64 },

    #[error("Copy budget exhausted: array '{label}' of {len} items (threshold {threshold}) copied between host and device")]
    CopyBudgetExceeded {
        label: String,
        len: usize,
        threshold: usize,
    },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Algorithm did not converge")]
    NonConvergence,

    #[error("{solver} breakdown at iteration {iteration}: {value_name} ({value:e}) is near zero")]
    Breakdown {
        solver: &'static str,
        iteration: usize,
        value_name: &'static str,
        value: f64,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SolvCoreError {
    pub(crate) fn residency(label: &str, message: impl Into<String>) -> Self {
        SolvCoreError::Residency {
            label: label.to_string(),
            message: message.into(),
        }
    }
}
