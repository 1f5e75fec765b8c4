use crate::operator::DistributedMatrix;
use serde::{Deserialize, Serialize};
use solv_core::SolvCoreError;

pub mod bicgstab;
pub mod cg;
pub mod gmres;

/// Krylov space kept by GMRES between restarts, unless configured otherwise.
pub const DEFAULT_GMRES_RESTART: usize = 30;

// --- Algorithm Trait Definition ---
/// Operator seen by the Krylov methods: a product and a global dot product
/// over owned entries.
pub trait KrylovOperator {
    fn local_rows(&self) -> usize;

    /// `y = A x`.
    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), SolvCoreError>;

    /// Dot product summed over all ranks.
    fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, SolvCoreError>;

    fn norm(&self, a: &[f64]) -> Result<f64, SolvCoreError> {
        Ok(self.dot(a, a)?.sqrt())
    }
}

impl KrylovOperator for DistributedMatrix {
    fn local_rows(&self) -> usize {
        DistributedMatrix::local_rows(self)
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), SolvCoreError> {
        DistributedMatrix::apply(self, x, y)
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, SolvCoreError> {
        DistributedMatrix::dot(self, a, b)
    }
}

/// Iterative method, resolved from the configuration keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    /// Conjugate gradient, for symmetric positive definite operators.
    Cg,
    BiCgStab,
    /// Restarted GMRES with a Krylov space of `restart` vectors.
    Gmres { restart: usize },
}

impl SolverKind {
    pub fn name(&self) -> &'static str {
        match self {
            SolverKind::Cg => "CG",
            SolverKind::BiCgStab => "BiCGStab",
            SolverKind::Gmres { .. } => "GMRES",
        }
    }
}

/// Outcome of the last solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverStatus {
    #[default]
    NotSolved,
    Converged,
    Diverged,
    MaxIterationsReached,
}

/// Stopping criteria shared by the Krylov methods.
///
/// With `r0` the initial residual norm, iterations stop when the residual
/// `r` satisfies `r <= atol` or `r <= rtol * r0` (converged), when
/// `r > divtol * r0` or `r` is not finite (diverged), or after
/// `max_iterations`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationControl {
    pub atol: f64,
    pub rtol: f64,
    pub divtol: f64,
    pub max_iterations: usize,
    /// 0 is silent, 1 logs a summary, 2 logs every iteration.
    pub verbose: u8,
}

impl Default for IterationControl {
    fn default() -> Self {
        Self {
            atol: 1e-12,
            rtol: 1e-12,
            divtol: 1e3,
            max_iterations: 1000,
            verbose: 0,
        }
    }
}

impl IterationControl {
    pub fn converged(&self, residual: f64, initial: f64) -> bool {
        residual <= self.atol || residual <= self.rtol * initial
    }

    /// Status reached at `iteration`, `None` to keep iterating.
    pub fn check(&self, iteration: usize, residual: f64, initial: f64) -> Option<SolverStatus> {
        if !residual.is_finite() {
            return Some(SolverStatus::Diverged);
        }
        if self.converged(residual, initial) {
            return Some(SolverStatus::Converged);
        }
        if residual > self.divtol * initial {
            return Some(SolverStatus::Diverged);
        }
        if iteration >= self.max_iterations {
            return Some(SolverStatus::MaxIterationsReached);
        }
        None
    }

    pub(crate) fn log_iteration(&self, solver: &str, iteration: usize, residual: f64) {
        if self.verbose >= 2 {
            log::info!("{} iteration {}: residual norm = {:e}", solver, iteration, residual);
        } else {
            log::trace!("{} iteration {}: residual norm = {:e}", solver, iteration, residual);
        }
    }

    pub(crate) fn finish(&self, solver: &str, info: SolveInfo) -> SolveInfo {
        if self.verbose >= 1 {
            log::info!(
                "{} {:?} after {} iterations, residual {:e} (initial {:e})",
                solver,
                info.status,
                info.iterations,
                info.final_residual,
                info.initial_residual
            );
        }
        info
    }
}

/// Information about the solve process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveInfo {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub status: SolverStatus,
}

/// Runs `kind` on `op`, improving `x` in place.
pub fn solve(
    kind: SolverKind,
    op: &dyn KrylovOperator,
    precond: &dyn crate::precond::Preconditioner,
    b: &[f64],
    x: &mut [f64],
    control: &IterationControl,
) -> Result<SolveInfo, SolvCoreError> {
    let n = op.local_rows();
    if b.len() != n || x.len() != n {
        return Err(SolvCoreError::InvalidDimensions(format!(
            "Operator has {} local rows, rhs has {} and solution has {}",
            n,
            b.len(),
            x.len()
        )));
    }
    match kind {
        SolverKind::Cg => cg::solve_cg(op, precond, b, x, control),
        SolverKind::BiCgStab => bicgstab::solve_bicgstab(op, precond, b, x, control),
        SolverKind::Gmres { restart } => gmres::solve_gmres(op, precond, b, x, restart, control),
    }
}

/// r = b - A x, returns ||r||.
pub(crate) fn residual(
    op: &dyn KrylovOperator,
    b: &[f64],
    x: &[f64],
    r: &mut [f64],
) -> Result<f64, SolvCoreError> {
    let mut ax = vec![0.0; b.len()];
    op.apply(x, &mut ax)?;
    crate::blas::sub(b, &ax, r);
    op.norm(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_control_check() {
        let control = IterationControl {
            atol: 1e-8,
            rtol: 1e-6,
            divtol: 1e3,
            max_iterations: 10,
            verbose: 0,
        };
        assert_eq!(control.check(1, 1e-9, 1.0), Some(SolverStatus::Converged));
        assert_eq!(control.check(1, 1e-7, 1.0), Some(SolverStatus::Converged));
        assert_eq!(control.check(1, 1e-3, 1.0), None);
        assert_eq!(control.check(1, 2e3, 1.0), Some(SolverStatus::Diverged));
        assert_eq!(control.check(1, f64::NAN, 1.0), Some(SolverStatus::Diverged));
        assert_eq!(
            control.check(10, 1e-3, 1.0),
            Some(SolverStatus::MaxIterationsReached)
        );
        // A zero initial residual is converged before any iteration
        assert_eq!(control.check(0, 0.0, 0.0), Some(SolverStatus::Converged));
    }
}
