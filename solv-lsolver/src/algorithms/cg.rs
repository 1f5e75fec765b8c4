use super::{residual, IterationControl, KrylovOperator, SolveInfo};
use crate::blas;
use crate::precond::Preconditioner;
use solv_core::SolvCoreError;

/// Preconditioned conjugate gradient. The operator and the preconditioner
/// must be symmetric positive definite.
pub fn solve_cg(
    op: &dyn KrylovOperator,
    precond: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    control: &IterationControl,
) -> Result<SolveInfo, SolvCoreError> {
    let n = b.len();
    let mut r = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];

    let initial_residual = residual(op, b, x, &mut r)?;
    control.log_iteration("CG", 0, initial_residual);
    if let Some(status) = control.check(0, initial_residual, initial_residual) {
        return Ok(control.finish(
            "CG",
            SolveInfo {
                iterations: 0,
                initial_residual,
                final_residual: initial_residual,
                status,
            },
        ));
    }

    precond.apply(&r, &mut z);
    p.copy_from_slice(&z);
    let mut rz = op.dot(&r, &z)?;

    let mut iteration = 0;
    loop {
        iteration += 1;

        // q = A p
        op.apply(&p, &mut q)?;
        let pq = op.dot(&p, &q)?;
        if pq == 0.0 || !pq.is_finite() {
            log::warn!("CG breakdown: p^T * Ap = {:e}", pq);
            return Err(SolvCoreError::Breakdown {
                solver: "CG",
                iteration,
                value_name: "p^T * Ap",
                value: pq,
            });
        }
        let alpha = rz / pq;

        blas::axpy(alpha, &p, x);
        blas::axpy(-alpha, &q, &mut r);

        let residual_norm = op.norm(&r)?;
        control.log_iteration("CG", iteration, residual_norm);
        if let Some(status) = control.check(iteration, residual_norm, initial_residual) {
            return Ok(control.finish(
                "CG",
                SolveInfo {
                    iterations: iteration,
                    initial_residual,
                    final_residual: residual_norm,
                    status,
                },
            ));
        }

        precond.apply(&r, &mut z);
        let rz_new = op.dot(&r, &z)?;
        let beta = rz_new / rz;
        rz = rz_new;
        // p = z + beta * p
        blas::xpay(&z, beta, &mut p);
    }
}
