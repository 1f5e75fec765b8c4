use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} solver not recognized")]
    UnknownSolver(String),

    #[error("Unknown preconditioner: {0}")]
    UnknownPreconditioner(String),

    #[error("{keyword} keyword not recognized for solver {solver}")]
    UnknownKeyword { keyword: String, solver: String },

    #[error("We expected '{expected}' instead of '{found}'")]
    Expected { expected: String, found: String },

    #[error("Keyword '{keyword}' expects a number, found '{value}'")]
    InvalidNumber { keyword: String, value: String },

    #[error("Solver block ended while reading '{0}'")]
    UnexpectedEnd(String),

    #[error("Tolerance {name} must be finite and positive, got {value}")]
    InvalidTolerance { name: &'static str, value: f64 },

    #[error("mixed_precision: not implemented in parallel")]
    MixedPrecision,

    #[error("Invalid JSON solver configuration: {0}")]
    Json(#[from] serde_json::Error),
}
