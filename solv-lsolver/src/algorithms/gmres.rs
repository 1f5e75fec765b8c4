use super::{residual, IterationControl, KrylovOperator, SolveInfo, SolverStatus};
use crate::blas;
use crate::precond::Preconditioner;
use solv_core::SolvCoreError;

/// Right-preconditioned GMRES restarted every `restart` iterations.
///
/// The Hessenberg matrix is reduced with Givens rotations, so the residual
/// norm is known at every iteration without forming the iterate.
pub fn solve_gmres(
    op: &dyn KrylovOperator,
    precond: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    restart: usize,
    control: &IterationControl,
) -> Result<SolveInfo, SolvCoreError> {
    let n = b.len();
    let m = restart.max(1);
    let mut r = vec![0.0; n];
    let initial_residual = residual(op, b, x, &mut r)?;
    control.log_iteration("GMRES", 0, initial_residual);
    let done = |iterations: usize, final_residual: f64, status: SolverStatus| {
        control.finish(
            "GMRES",
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

    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
    let mut h = vec![vec![0.0; m]; m + 1];
    let mut cs = vec![0.0; m];
    let mut sn = vec![0.0; m];
    let mut g = vec![0.0; m + 1];
    let mut w = vec![0.0; n];
    let mut z = vec![0.0; n];

    let mut iteration = 0;
    let mut beta = initial_residual;
    loop {
        basis.clear();
        basis.push(r.iter().map(|v| v / beta).collect());
        g.iter_mut().for_each(|v| *v = 0.0);
        g[0] = beta;

        let mut k = 0;
        let mut status = None;
        while k < m {
            iteration += 1;
            precond.apply(&basis[k], &mut z);
            op.apply(&z, &mut w)?;

            // Modified Gram-Schmidt
            for (i, v) in basis.iter().enumerate() {
                let hik = op.dot(&w, v)?;
                h[i][k] = hik;
                blas::axpy(-hik, v, &mut w);
            }
            let h_next = op.norm(&w)?;
            h[k + 1][k] = h_next;

            for i in 0..k {
                let temp = cs[i] * h[i][k] + sn[i] * h[i + 1][k];
                h[i + 1][k] = -sn[i] * h[i][k] + cs[i] * h[i + 1][k];
                h[i][k] = temp;
            }
            let denom = h[k][k].hypot(h[k + 1][k]);
            if denom == 0.0 {
                log::warn!("GMRES breakdown: Hessenberg column {} is zero", k);
                return Err(SolvCoreError::Breakdown {
                    solver: "GMRES",
                    iteration,
                    value_name: "Hessenberg diagonal",
                    value: denom,
                });
            }
            cs[k] = h[k][k] / denom;
            sn[k] = h[k + 1][k] / denom;
            h[k][k] = denom;
            h[k + 1][k] = 0.0;
            g[k + 1] = -sn[k] * g[k];
            g[k] *= cs[k];

            let residual_norm = g[k + 1].abs();
            k += 1;
            control.log_iteration("GMRES", iteration, residual_norm);
            status = control.check(iteration, residual_norm, initial_residual);
            if status.is_some() || h_next == 0.0 {
                break;
            }
            basis.push(w.iter().map(|v| v / h_next).collect());
        }

        // Back substitution on the k x k triangle
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let sum = (i + 1..k).fold(g[i], |acc, j| acc - h[i][j] * y[j]);
            y[i] = sum / h[i][i];
        }
        w.iter_mut().for_each(|v| *v = 0.0);
        for (yi, v) in y.iter().zip(basis.iter()) {
            blas::axpy(*yi, v, &mut w);
        }
        precond.apply(&w, &mut z);
        blas::axpy(1.0, &z, x);

        beta = residual(op, b, x, &mut r)?;
        if let Some(status) = status {
            return Ok(done(iteration, beta, status));
        }
        if let Some(status) = control.check(iteration, beta, initial_residual) {
            return Ok(done(iteration, beta, status));
        }
        log::debug!("GMRES restart after {} iterations, residual {:e}", iteration, beta);
    }
}
