mod config_error;

pub use config_error::ConfigError;
use derive_more::From;

use solv_core::SolvCoreError;

pub type Result<T> = core::result::Result<T, BridgeError>;

/// Category of a bridge failure. Every category terminates the process at
/// the top-level handler; they differ in what the diagnostic points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad keyword, size mismatch between inputs.
    Configuration,
    /// A structural invariant of the matrix, the partition or the residency
    /// state machine was violated.
    StructuralInvariant,
    /// Divergence, breakdown or a residual above the absolute tolerance.
    NumericalDivergence,
    /// Device, communication or I/O failure.
    Runtime,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::StructuralInvariant => "structural invariant",
            ErrorKind::NumericalDivergence => "numerical divergence",
            ErrorKind::Runtime => "runtime",
        };
        fmt.write_str(name)
    }
}

#[derive(Debug, From)]
pub enum BridgeError {
    // -- Externals
    #[from]
    Io(std::io::Error),

    #[from]
    Config(ConfigError),

    #[from]
    Core(SolvCoreError),

    // -- Structure
    KeepFlagsMismatch {
        flags: usize,
        rows: usize,
        cols: usize,
    },

    Partition(String),

    Schedule(String),

    VectorSize {
        label: &'static str,
        len: usize,
        expected: usize,
    },

    // -- Numerics
    Divergence {
        iterations: usize,
        residual: f64,
    },

    ResidualExceeded {
        residual: f64,
        tolerance: f64,
    },

    NormMismatch {
        label: String,
        host: f64,
        backend: f64,
    },
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Io(_) => ErrorKind::Runtime,
            BridgeError::Config(_) | BridgeError::VectorSize { .. } => ErrorKind::Configuration,
            BridgeError::KeepFlagsMismatch { .. } => ErrorKind::Configuration,
            BridgeError::Partition(_) | BridgeError::Schedule(_) => {
                ErrorKind::StructuralInvariant
            }
            BridgeError::Divergence { .. }
            | BridgeError::ResidualExceeded { .. }
            | BridgeError::NormMismatch { .. } => ErrorKind::NumericalDivergence,
            BridgeError::Core(core) => match core {
                SolvCoreError::InvalidDimensions(_)
                | SolvCoreError::Configuration(_)
                | SolvCoreError::UnsupportedOperation(_) => ErrorKind::Configuration,
                SolvCoreError::UnallocatedEntry { .. } | SolvCoreError::Residency { .. } => {
                    ErrorKind::StructuralInvariant
                }
                SolvCoreError::NonConvergence | SolvCoreError::Breakdown { .. } => {
                    ErrorKind::NumericalDivergence
                }
                _ => ErrorKind::Runtime,
            },
        }
    }
}

// region:    --- Error Boilerplate

impl core::fmt::Display for BridgeError {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            BridgeError::Io(err) => write!(fmt, "I/O error: {err}"),
            BridgeError::Config(err) => write!(fmt, "{err}"),
            BridgeError::Core(err) => write!(fmt, "{err}"),
            BridgeError::KeepFlagsMismatch { flags, rows, cols } => write!(
                fmt,
                "{flags} keep flags for a {rows}x{cols} matrix, one flag per row and column expected"
            ),
            BridgeError::Partition(msg) => write!(fmt, "Invalid partition: {msg}"),
            BridgeError::Schedule(msg) => write!(fmt, "Invalid communication schedule: {msg}"),
            BridgeError::VectorSize {
                label,
                len,
                expected,
            } => write!(fmt, "Vector {label} has {len} entries, expected {expected}"),
            BridgeError::Divergence {
                iterations,
                residual,
            } => write!(
                fmt,
                "Divergence for solver after {iterations} iterations (residual {residual:e})"
            ),
            BridgeError::ResidualExceeded {
                residual,
                tolerance,
            } => write!(
                fmt,
                "Solution not correct ! ||Ax-b|| = {residual:e} > atol = {tolerance:e}"
            ),
            BridgeError::NormMismatch {
                label,
                host,
                backend,
            } => write!(
                fmt,
                "{label} : host value={host:e} is different than backend value={backend:e}"
            ),
        }
    }
}

impl std::error::Error for BridgeError {}

// endregion: --- Error Boilerplate

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_convert_and_classify() {
        fn fails() -> Result<()> {
            Err(SolvCoreError::Residency {
                label: "x".to_string(),
                message: "partially synchronized".to_string(),
            })?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralInvariant);
        assert!(err.to_string().contains("partially synchronized"));
    }

    #[test]
    fn test_residual_exceeded_message_names_values() {
        let err = BridgeError::ResidualExceeded {
            residual: 0.3,
            tolerance: 1e-6,
        };
        assert_eq!(err.kind(), ErrorKind::NumericalDivergence);
        let msg = err.to_string();
        assert!(msg.contains("||Ax-b||"));
        assert!(msg.contains("3e-1"));
    }

    #[test]
    fn test_config_error_is_configuration() {
        let err: BridgeError = ConfigError::UnknownSolver("FOO".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "FOO solver not recognized");
    }
}
