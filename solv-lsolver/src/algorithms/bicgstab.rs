use super::{residual, IterationControl, KrylovOperator, SolveInfo, SolverStatus};
use crate::blas;
use crate::precond::Preconditioner;
use solv_core::SolvCoreError;

fn breakdown(iteration: usize, value_name: &'static str, value: f64) -> SolvCoreError {
    log::warn!("BiCGStab breakdown: {} = {:e}", value_name, value);
    SolvCoreError::Breakdown {
        solver: "BiCGStab",
        iteration,
        value_name,
        value,
    }
}

/// Right-preconditioned BiCGStab.
pub fn solve_bicgstab(
    op: &dyn KrylovOperator,
    precond: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    control: &IterationControl,
) -> Result<SolveInfo, SolvCoreError> {
    let n = b.len();
    let mut r = vec![0.0; n];
    let initial_residual = residual(op, b, x, &mut r)?;
    control.log_iteration("BiCGStab", 0, initial_residual);
    let done = |iterations: usize, final_residual: f64, status: SolverStatus| {
        control.finish(
            "BiCGStab",
            SolveInfo {
                iterations,
                initial_residual,
                final_residual,
                status,
            },
        )
    };
    if let Some(status) = control.check(0, initial_residual, initial_residual) {
        return Ok(done(0, initial_residual, status));
    }

    let r_hat = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s_hat = vec![0.0; n];

    let mut rho = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;

    let mut iteration = 0;
    loop {
        iteration += 1;

        let rho_new = op.dot(&r_hat, &r)?;
        if rho_new == 0.0 {
            return Err(breakdown(iteration, "rho", rho_new));
        }
        if iteration == 1 {
            p.copy_from_slice(&r);
        } else {
            // p = r + beta * (p - omega * v)
            let beta = (rho_new / rho) * (alpha / omega);
            blas::axpy(-omega, &v, &mut p);
            blas::xpay(&r, beta, &mut p);
        }
        rho = rho_new;

        precond.apply(&p, &mut p_hat);
        op.apply(&p_hat, &mut v)?;
        let r_hat_v = op.dot(&r_hat, &v)?;
        if r_hat_v == 0.0 {
            return Err(breakdown(iteration, "r_hat.v", r_hat_v));
        }
        alpha = rho / r_hat_v;

        // s = r - alpha * v
        s.copy_from_slice(&r);
        blas::axpy(-alpha, &v, &mut s);
        let s_norm = op.norm(&s)?;
        if control.converged(s_norm, initial_residual) {
            blas::axpy(alpha, &p_hat, x);
            control.log_iteration("BiCGStab", iteration, s_norm);
            return Ok(done(iteration, s_norm, SolverStatus::Converged));
        }

        precond.apply(&s, &mut s_hat);
        op.apply(&s_hat, &mut t)?;
        let t_t = op.dot(&t, &t)?;
        if t_t == 0.0 {
            return Err(breakdown(iteration, "t.t", t_t));
        }
        omega = op.dot(&t, &s)? / t_t;

        // x = x + alpha * p_hat + omega * s_hat
        blas::axpy(alpha, &p_hat, x);
        blas::axpy(omega, &s_hat, x);

        // r = s - omega * t
        r.copy_from_slice(&s);
        blas::axpy(-omega, &t, &mut r);

        let residual_norm = op.norm(&r)?;
        control.log_iteration("BiCGStab", iteration, residual_norm);
        if let Some(status) = control.check(iteration, residual_norm, initial_residual) {
            return Ok(done(iteration, residual_norm, status));
        }
        if omega == 0.0 {
            return Err(breakdown(iteration, "omega", omega));
        }
    }
}
