use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Preconditioner choice, resolved from the configuration keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreconditionerKind {
    #[default]
    None,
    Jacobi,
}

/// Applies `z = M⁻¹ r` on the owned entries.
pub trait Preconditioner: Debug + Send {
    fn name(&self) -> &'static str;

    fn apply(&self, r: &[f64], z: &mut [f64]);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn name(&self) -> &'static str {
        "none"
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }
}

/// Diagonal scaling. Rows with a (near) zero diagonal are left unscaled.
#[derive(Debug, Clone)]
pub struct Jacobi {
    inverse_diagonal: Vec<f64>,
}

impl Jacobi {
    pub fn from_diagonal(diagonal: &[f64]) -> Self {
        let inverse_diagonal = diagonal
            .iter()
            .map(|&d| if d.abs() > f64::MIN_POSITIVE { 1.0 / d } else { 1.0 })
            .collect();
        Self { inverse_diagonal }
    }
}

impl Preconditioner for Jacobi {
    fn name(&self) -> &'static str {
        "Jacobi"
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.iter_mut()
            .zip(r.iter().zip(self.inverse_diagonal.iter()))
            .for_each(|(zi, (&ri, &inv))| *zi = ri * inv);
    }
}

/// Builds the preconditioner of `kind` from the operator diagonal.
pub fn build_preconditioner(kind: PreconditionerKind, diagonal: &[f64]) -> Box<dyn Preconditioner> {
    match kind {
        PreconditionerKind::None => Box::new(IdentityPreconditioner),
        PreconditionerKind::Jacobi => Box::new(Jacobi::from_diagonal(diagonal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jacobi_scales_by_inverse_diagonal() {
        let jacobi = Jacobi::from_diagonal(&[2.0, 4.0, 0.0]);
        let mut z = [0.0; 3];
        jacobi.apply(&[1.0, 1.0, 3.0], &mut z);
        assert_eq!(z, [0.5, 0.25, 3.0]);
    }

    #[test]
    fn test_build_preconditioner() {
        assert_eq!(build_preconditioner(PreconditionerKind::None, &[]).name(), "none");
        assert_eq!(
            build_preconditioner(PreconditionerKind::Jacobi, &[1.0]).name(),
            "Jacobi"
        );
    }
}
