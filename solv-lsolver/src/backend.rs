use crate::algorithms::{self, IterationControl, SolveInfo, SolverKind, SolverStatus};
use crate::operator::DistributedMatrix;
use crate::precond::{build_preconditioner, Preconditioner, PreconditionerKind};
use solv_core::{DeviceArray, ResidencyManager, SolvCoreError, SparseMatrix};
use std::fmt::Debug;

/// Iterative linear-algebra engine driven by the solve bridge.
///
/// Vectors hold the owned entries of one rank in solver order. The backend
/// leaves the solution device-resident (when a device is in use); callers
/// bring it back with [`ResidencyManager::copy_to_host`].
pub trait LinearSolverBackend: Debug + Send {
    /// Takes ownership of the operator. The previous one, if any, is dropped.
    fn set_operator(&mut self, operator: DistributedMatrix) -> Result<(), SolvCoreError>;

    fn operator(&self) -> Option<&DistributedMatrix>;

    /// Replaces the operator coefficients, keeping its structure.
    fn update_coefficients(
        &mut self,
        interior: SparseMatrix,
        ghost: SparseMatrix,
    ) -> Result<(), SolvCoreError>;

    /// One-time setup after `set_operator` or `update_coefficients`.
    fn build(&mut self) -> Result<(), SolvCoreError>;

    fn init_tolerances(&mut self, atol: f64, rtol: f64, divtol: f64);

    fn init_max_iterations(&mut self, max_iterations: usize);

    fn set_verbose(&mut self, level: u8);

    /// Places the operator on the device managed by `residency`.
    fn move_to_device(&mut self, residency: &ResidencyManager) -> Result<(), SolvCoreError>;

    fn move_to_host(&mut self) -> Result<(), SolvCoreError>;

    /// Improves `x` in place and returns the number of iterations.
    fn solve(
        &mut self,
        rhs: &mut DeviceArray<f64>,
        x: &mut DeviceArray<f64>,
    ) -> Result<usize, SolvCoreError>;

    fn status(&self) -> SolverStatus;

    fn current_residual(&self) -> f64;

    fn last_solve(&self) -> Option<SolveInfo>;

    /// `y = A x`.
    fn apply(
        &mut self,
        x: &mut DeviceArray<f64>,
        y: &mut DeviceArray<f64>,
    ) -> Result<(), SolvCoreError>;

    /// Global 2-norm of a distributed vector.
    fn norm(&mut self, v: &mut DeviceArray<f64>) -> Result<f64, SolvCoreError>;
}

/// Krylov solver backend: CG, BiCGStab or GMRES with an optional Jacobi
/// preconditioner.
///
/// Iterations run on host copies; the device holds the operator and the
/// vectors between calls.
#[derive(Debug)]
pub struct KrylovBackend {
    kind: SolverKind,
    preconditioner_kind: PreconditionerKind,
    operator: Option<DistributedMatrix>,
    preconditioner: Option<Box<dyn Preconditioner>>,
    control: IterationControl,
    residency: ResidencyManager,
    last: Option<SolveInfo>,
}

impl KrylovBackend {
    pub fn new(kind: SolverKind, preconditioner_kind: PreconditionerKind) -> Self {
        Self {
            kind,
            preconditioner_kind,
            operator: None,
            preconditioner: None,
            control: IterationControl::default(),
            residency: ResidencyManager::host_only(),
            last: None,
        }
    }

    pub fn kind(&self) -> SolverKind {
        self.kind
    }

    pub fn preconditioner_kind(&self) -> PreconditionerKind {
        self.preconditioner_kind
    }

    pub fn control(&self) -> &IterationControl {
        &self.control
    }

    fn require_operator(&self) -> Result<&DistributedMatrix, SolvCoreError> {
        self.operator.as_ref().ok_or_else(|| {
            SolvCoreError::Configuration("no operator set on the linear solver".to_string())
        })
    }

    fn check_len(&self, array: &DeviceArray<f64>) -> Result<(), SolvCoreError> {
        let n = self.require_operator()?.local_rows();
        if array.len() != n {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Array '{}' has {} entries, the operator has {} local rows",
                array.label(),
                array.len(),
                n
            )));
        }
        Ok(())
    }

    /// Host values of `array`, fetched from the device if needed.
    fn fetch(&self, array: &mut DeviceArray<f64>) -> Result<Vec<f64>, SolvCoreError> {
        self.residency.copy_to_host(array)?;
        Ok(array.host()?.to_vec())
    }

    /// Stores `values` in `array` and makes the device copy authoritative.
    fn store(&self, array: &mut DeviceArray<f64>, values: &[f64]) -> Result<(), SolvCoreError> {
        self.residency.overwrite_host(array, values)?;
        self.residency.ensure_writable_on_device(array)
    }
}

impl LinearSolverBackend for KrylovBackend {
    fn set_operator(&mut self, operator: DistributedMatrix) -> Result<(), SolvCoreError> {
        if let Some(mut previous) = self.operator.take() {
            previous.move_to_host(&self.residency)?;
        }
        log::info!("{}", operator.info());
        self.operator = Some(operator);
        self.preconditioner = None;
        Ok(())
    }

    fn operator(&self) -> Option<&DistributedMatrix> {
        self.operator.as_ref()
    }

    fn update_coefficients(
        &mut self,
        interior: SparseMatrix,
        ghost: SparseMatrix,
    ) -> Result<(), SolvCoreError> {
        let residency = self.residency.clone();
        let operator = self.operator.as_mut().ok_or_else(|| {
            SolvCoreError::Configuration("no operator set on the linear solver".to_string())
        })?;
        operator.update_coefficients(interior, ghost, &residency)?;
        self.preconditioner = None;
        Ok(())
    }

    fn build(&mut self) -> Result<(), SolvCoreError> {
        let operator = self.require_operator()?;
        let preconditioner = build_preconditioner(self.preconditioner_kind, &operator.diagonal());
        log::debug!(
            "Built {} with {} preconditioner",
            self.kind.name(),
            preconditioner.name()
        );
        self.preconditioner = Some(preconditioner);
        Ok(())
    }

    fn init_tolerances(&mut self, atol: f64, rtol: f64, divtol: f64) {
        self.control.atol = atol;
        self.control.rtol = rtol;
        self.control.divtol = divtol;
    }

    fn init_max_iterations(&mut self, max_iterations: usize) {
        self.control.max_iterations = max_iterations;
    }

    fn set_verbose(&mut self, level: u8) {
        self.control.verbose = level;
    }

    fn move_to_device(&mut self, residency: &ResidencyManager) -> Result<(), SolvCoreError> {
        self.residency = residency.clone();
        if let Some(operator) = self.operator.as_mut() {
            operator.move_to_device(residency)?;
        }
        Ok(())
    }

    fn move_to_host(&mut self) -> Result<(), SolvCoreError> {
        if let Some(operator) = self.operator.as_mut() {
            operator.move_to_host(&self.residency)?;
        }
        Ok(())
    }

    fn solve(
        &mut self,
        rhs: &mut DeviceArray<f64>,
        x: &mut DeviceArray<f64>,
    ) -> Result<usize, SolvCoreError> {
        self.check_len(rhs)?;
        self.check_len(x)?;
        if self.preconditioner.is_none() {
            self.build()?;
        }
        let b = self.fetch(rhs)?;
        let mut solution = self.fetch(x)?;

        let operator = self.require_operator()?;
        let preconditioner = self.preconditioner.as_deref().ok_or_else(|| {
            SolvCoreError::Internal("preconditioner missing after build".to_string())
        })?;
        let info = algorithms::solve(
            self.kind,
            operator,
            preconditioner,
            &b,
            &mut solution,
            &self.control,
        )?;

        self.store(x, &solution)?;
        self.last = Some(info);
        Ok(info.iterations)
    }

    fn status(&self) -> SolverStatus {
        self.last.map(|info| info.status).unwrap_or_default()
    }

    fn current_residual(&self) -> f64 {
        self.last.map(|info| info.final_residual).unwrap_or(f64::NAN)
    }

    fn last_solve(&self) -> Option<SolveInfo> {
        self.last
    }

    fn apply(
        &mut self,
        x: &mut DeviceArray<f64>,
        y: &mut DeviceArray<f64>,
    ) -> Result<(), SolvCoreError> {
        self.check_len(x)?;
        self.check_len(y)?;
        let input = self.fetch(x)?;
        let mut output = vec![0.0; input.len()];
        self.require_operator()?.apply(&input, &mut output)?;
        self.store(y, &output)
    }

    fn norm(&mut self, v: &mut DeviceArray<f64>) -> Result<f64, SolvCoreError> {
        self.check_len(v)?;
        let values = self.fetch(v)?;
        let operator = self.require_operator()?;
        Ok(operator.dot(&values, &values)?.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solv_core::{DataLocation, HostMemoryDevice};
    use std::sync::Arc;

    fn system() -> DistributedMatrix {
        let a = SparseMatrix::from_dense(&[
            vec![4.0, -1.0, 0.0],
            vec![-1.0, 4.0, -1.0],
            vec![0.0, -1.0, 4.0],
        ])
        .unwrap();
        DistributedMatrix::serial(a).unwrap()
    }

    #[test]
    fn test_solve_without_operator_fails() {
        let mut backend = KrylovBackend::new(SolverKind::Cg, PreconditionerKind::None);
        let mut b = DeviceArray::new("b", vec![1.0]);
        let mut x = DeviceArray::zeros("x", 1);
        match backend.solve(&mut b, &mut x) {
            Err(SolvCoreError::Configuration(msg)) => assert!(msg.contains("no operator")),
            other => panic!("Expected a configuration error, got {:?}", other),
        }
        assert_eq!(backend.status(), SolverStatus::NotSolved);
    }

    #[test]
    fn test_solve_on_device_leaves_solution_on_device() {
        let device = Arc::new(HostMemoryDevice::new());
        let residency = ResidencyManager::with_runtime(device);
        let mut backend = KrylovBackend::new(SolverKind::Cg, PreconditionerKind::Jacobi);
        backend.set_operator(system()).unwrap();
        backend.init_tolerances(1e-12, 1e-12, 1e3);
        backend.init_max_iterations(50);
        backend.move_to_device(&residency).unwrap();
        backend.build().unwrap();

        let mut b = DeviceArray::new("b", vec![1.0, 2.0, 3.0]);
        let mut x = DeviceArray::zeros("x", 3);
        residency.ensure_readable_on_device(&mut b).unwrap();
        residency.ensure_writable_on_device(&mut x).unwrap();

        let iterations = backend.solve(&mut b, &mut x).unwrap();
        assert!(iterations >= 1 && iterations <= 50);
        assert_eq!(backend.status(), SolverStatus::Converged);
        assert_eq!(x.location(), DataLocation::Device);

        residency.copy_to_host(&mut x).unwrap();
        let expected = [0.4642857142857143, 0.8571428571428571, 0.9642857142857143];
        for (xi, ei) in x.host().unwrap().iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-10);
        }

        let mut ax = DeviceArray::zeros("ax", 3);
        backend.apply(&mut x, &mut ax).unwrap();
        residency.copy_to_host(&mut ax).unwrap();
        let ax = ax.host().unwrap().to_vec();
        for (got, want) in ax.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-10);
        }
        let norm = backend.norm(&mut b).unwrap();
        assert!((norm - 14.0f64.sqrt()).abs() < 1e-12);
    }
}
