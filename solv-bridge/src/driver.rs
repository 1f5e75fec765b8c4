use crate::config::SolverConfig;
use crate::context::SolveContext;
use crate::error::{BridgeError, Result};
use crate::journal::JournalConfig;
use crate::partition::PartitionDescriptor;
use crate::renumber::LocalRenumbering;
use crate::schedule::CommSchedule;
use solv_core::{
    DeviceArray, DeviceRuntime, Matrix, ResidencyManager, SolvCoreError, SparseMatrix, Vector,
};
use solv_lsolver::{
    Communicator, DistributedMatrix, LinearSolverBackend, ParallelManager, SolverStatus,
};
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage the driver is in. A failed solve leaves the stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverStage {
    #[default]
    Idle,
    BuildingStructure,
    Transferring,
    Solving,
    CheckingResidual,
}

/// Wall time spent in each stage of the last solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub convert: Duration,
    pub transfer: Duration,
    pub solve: Duration,
    pub check: Duration,
}

/// Outcome of a successful solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub status: SolverStatus,
    /// Renumbering and schedule were rebuilt for this solve.
    pub rebuilt: bool,
}

/// Data kept between solves while the structure does not change.
#[derive(Debug)]
struct Structure {
    renum: LocalRenumbering,
    schedule: CommSchedule,
    pm: ParallelManager,
}

/// `||b - A x||` over the owned rows of a ghost-augmented system, in the
/// caller's local numbering.
pub fn host_residual(
    matrix: &SparseMatrix,
    keep_flags: &[bool],
    b: &[f64],
    x: &[f64],
    comm: &dyn Communicator,
) -> Result<f64> {
    if keep_flags.len() != matrix.rows() {
        return Err(BridgeError::KeepFlagsMismatch {
            flags: keep_flags.len(),
            rows: matrix.rows(),
            cols: matrix.cols(),
        });
    }
    for (label, len) in [("b", b.len()), ("x", x.len())] {
        if len != matrix.rows() {
            return Err(BridgeError::VectorSize {
                label,
                len,
                expected: matrix.rows(),
            });
        }
    }
    let mut ax = vec![0.0; matrix.rows()];
    matrix.multvect(x, &mut ax)?;
    let local: f64 = keep_flags
        .iter()
        .zip(b.iter().zip(&ax))
        .filter(|(&keep, _)| keep)
        .map(|(_, (bi, axi))| (bi - axi) * (bi - axi))
        .sum();
    Ok(comm.all_reduce_sum(local)?.sqrt())
}

/// Fails with `ResidualExceeded` when `residual > atol`.
pub fn residual_gate(residual: f64, atol: f64) -> Result<()> {
    if residual > atol || residual.is_nan() {
        log::error!("Solution not correct ! ||Ax-b|| = {:e}", residual);
        return Err(BridgeError::ResidualExceeded {
            residual,
            tolerance: atol,
        });
    }
    Ok(())
}

/// Maps the backend status to the driver's policy: divergence is fatal,
/// reaching the iteration ceiling is only reported.
pub fn check_status(status: SolverStatus, iterations: usize, residual: f64) -> Result<()> {
    match status {
        SolverStatus::Diverged => Err(BridgeError::Divergence {
            iterations,
            residual,
        }),
        SolverStatus::MaxIterationsReached => {
            log::warn!("Maximum number of iterations reached.");
            Ok(())
        }
        SolverStatus::Converged | SolverStatus::NotSolved => Ok(()),
    }
}

fn check_norm(label: &str, host: f64, backend: f64) -> Result<()> {
    let difference = ((host - backend) / (host + backend + f64::MIN_POSITIVE)).abs();
    if difference > 1e-8 {
        return Err(BridgeError::NormMismatch {
            label: label.to_string(),
            host,
            backend,
        });
    }
    Ok(())
}

/// Drives solves of distributed sparse systems through a linear solver
/// backend.
///
/// Per call: renumber the inputs (owned items first), move them to the
/// device, solve, check the residual, bring the solution back to the
/// caller's numbering and refresh its ghost entries.
#[derive(Debug)]
pub struct SolveDriver {
    backend: Option<Box<dyn LinearSolverBackend>>,
    context: SolveContext,
    journal: JournalConfig,
    comm: Arc<dyn Communicator>,
    residency: ResidencyManager,
    structure: Option<Structure>,
    stage: DriverStage,
    timings: StageTimings,
    schedule_builds: usize,
    operator_updates: usize,
    solves: usize,
}

impl SolveDriver {
    pub fn new(context: SolveContext, comm: Arc<dyn Communicator>) -> Self {
        Self {
            backend: None,
            context,
            journal: JournalConfig::default(),
            comm,
            residency: ResidencyManager::host_only(),
            structure: None,
            stage: DriverStage::Idle,
            timings: StageTimings::default(),
            schedule_builds: 0,
            operator_updates: 0,
            solves: 0,
        }
    }

    /// Driver with the backend and context resolved from `config`.
    pub fn from_config(config: &SolverConfig, comm: Arc<dyn Communicator>) -> Result<Self> {
        let (backend, context) = config.build()?;
        Ok(Self::new(context, comm).with_backend(Box::new(backend)))
    }

    pub fn with_backend(mut self, backend: Box<dyn LinearSolverBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the journal. Its clock flag applies to the residency manager.
    pub fn with_journal(mut self, journal: JournalConfig) -> Self {
        self.residency = self.residency.clone().with_clock(journal.clock);
        self.journal = journal;
        self
    }

    /// Keeps the operator and the vectors on `runtime`'s device.
    pub fn with_device(mut self, runtime: Arc<dyn DeviceRuntime>) -> Self {
        self.residency = self.journal.residency_manager(Some(runtime));
        self
    }

    pub fn context(&self) -> &SolveContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SolveContext {
        &mut self.context
    }

    pub fn journal(&self) -> &JournalConfig {
        &self.journal
    }

    pub fn residency(&self) -> &ResidencyManager {
        &self.residency
    }

    pub fn stage(&self) -> DriverStage {
        self.stage
    }

    pub fn last_timings(&self) -> StageTimings {
        self.timings
    }

    /// Communication schedule of the current structure.
    pub fn schedule(&self) -> Option<&CommSchedule> {
        self.structure.as_ref().map(|s| &s.schedule)
    }

    pub fn renumbering(&self) -> Option<&LocalRenumbering> {
        self.structure.as_ref().map(|s| &s.renum)
    }

    /// Number of times the renumbering and schedule were built.
    pub fn schedule_builds(&self) -> usize {
        self.schedule_builds
    }

    /// Number of coefficient refreshes on an unchanged structure.
    pub fn operator_updates(&self) -> usize {
        self.operator_updates
    }

    pub fn solves(&self) -> usize {
        self.solves
    }

    fn backend_mut(&mut self) -> Result<&mut Box<dyn LinearSolverBackend>> {
        self.backend.as_mut().ok_or_else(|| {
            BridgeError::Core(SolvCoreError::Configuration(
                "no linear solver backend available".to_string(),
            ))
        })
    }

    /// Residual of `x` computed on the host with the caller's matrix,
    /// gated against the absolute tolerance.
    pub fn check_residual(
        &self,
        matrix: &SparseMatrix,
        partition: &PartitionDescriptor,
        b: &[f64],
        x: &[f64],
    ) -> Result<f64> {
        let residual = host_residual(matrix, partition.keep_flags(), b, x, self.comm.as_ref())?;
        residual_gate(residual, self.context.atol)?;
        Ok(residual)
    }

    /// Solves `matrix * x = b`, improving `x` in place.
    ///
    /// `b` and `x` are in the caller's local numbering, ghost entries
    /// included. The structure is rebuilt when the context or the matrix
    /// reports a structural change; on success both flags are lowered.
    pub fn solve(
        &mut self,
        matrix: &mut SparseMatrix,
        partition: &PartitionDescriptor,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveReport> {
        self.timings = StageTimings::default();
        for (label, len) in [("b", b.len()), ("x", x.len())] {
            if len != partition.len() {
                return Err(BridgeError::VectorSize {
                    label,
                    len,
                    expected: partition.len(),
                });
            }
        }
        self.backend_mut()?;

        let rebuild = self.structure.is_none()
            || self.context.structure_changed()
            || matrix.structure_changed();
        if rebuild {
            self.build_structure(matrix, partition)?;
        } else if self.context.matrix_changed() {
            self.update_coefficients(matrix)?;
        }

        let report = self.run_solve(matrix, partition, b, x, rebuild)?;

        if rebuild {
            matrix.acknowledge_structure();
        }
        self.context.solve_succeeded(report.iterations);
        self.solves += 1;
        self.stage = DriverStage::Idle;
        Ok(report)
    }

    fn build_structure(&mut self, matrix: &SparseMatrix, partition: &PartitionDescriptor) -> Result<()> {
        self.stage = DriverStage::BuildingStructure;
        let tick = Instant::now();

        let renum = LocalRenumbering::from_partition(partition);
        let (interior, ghost) = renum.split_matrix(matrix)?;
        let schedule = CommSchedule::build(partition, &renum)?;
        self.schedule_builds += 1;
        let global_rows = self.comm.all_reduce_sum(renum.owned_count() as f64)?.round() as usize;
        let pm = schedule.to_parallel_manager(global_rows)?;

        if renum.owned_count() < self.journal.debug_dump_limit {
            log::debug!("keep_flags={:?}", partition.keep_flags());
            log::debug!("local_renum={:?}", renum.as_slice());
            log::debug!("{}", pm.describe());
            for t in interior.iter() {
                log::debug!("interior: {} {} {:e}", t.row() + 1, t.col() + 1, t.value());
            }
            for t in ghost.iter() {
                log::debug!("ghost: {} {} {:e}", t.row() + 1, t.col() + 1, t.value());
            }
        }
        if self.context.save_matrix_mtx_format {
            self.write_matrix(&interior, "interior")?;
            self.write_matrix(&ghost, "ghost")?;
        }

        let operator = DistributedMatrix::new(interior, ghost, pm.clone(), self.comm.clone())?;
        let (rows, cols) = operator.dims();
        log::info!(
            "[solv] Operator {}x{} with {} coefficients ({:.1} per row), {} neighbors",
            rows,
            cols,
            operator.nnz(),
            operator.fill_per_row(),
            schedule.neighbors().len()
        );
        self.timings.convert = tick.elapsed();
        log::info!(
            "[solv] Time to convert matrix: {:.6} s",
            self.timings.convert.as_secs_f64()
        );

        let residency = self.residency.clone();
        let (atol, rtol, divtol) = (self.context.atol, self.context.rtol, self.context.divtol);
        let backend = self.backend_mut()?;
        backend.set_operator(operator)?;
        backend.move_to_device(&residency)?;
        backend.build()?;
        backend.init_tolerances(atol, rtol, divtol);
        backend.init_max_iterations(global_rows);

        self.structure = Some(Structure { renum, schedule, pm });
        Ok(())
    }

    fn update_coefficients(&mut self, matrix: &SparseMatrix) -> Result<()> {
        self.stage = DriverStage::BuildingStructure;
        let tick = Instant::now();
        let (interior, ghost) = match self.structure.as_ref() {
            Some(structure) => structure.renum.split_matrix(matrix)?,
            None => {
                return Err(BridgeError::Core(SolvCoreError::Internal(
                    "coefficient update before the first build".to_string(),
                )))
            }
        };
        if self.context.save_matrix_mtx_format {
            self.write_matrix(&interior, "interior")?;
        }
        let (atol, rtol, divtol) = (self.context.atol, self.context.rtol, self.context.divtol);
        let backend = self.backend_mut()?;
        backend.update_coefficients(interior, ghost)?;
        backend.build()?;
        backend.init_tolerances(atol, rtol, divtol);
        self.operator_updates += 1;
        self.timings.convert = tick.elapsed();
        log::info!(
            "[solv] Time to update matrix coefficients: {:.6} s",
            self.timings.convert.as_secs_f64()
        );
        Ok(())
    }

    fn write_matrix(&self, matrix: &SparseMatrix, block: &str) -> Result<()> {
        let path = self.context.dump_dir.join(format!(
            "solv_matrix_{}_rank{}_{}.mtx",
            block,
            self.comm.rank(),
            self.schedule_builds + self.operator_updates
        ));
        log::info!("Writing matrix into {}", path.display());
        let mut writer = BufWriter::new(File::create(&path)?);
        matrix.write_matrix_market(&mut writer)?;
        Ok(())
    }

    fn run_solve(
        &mut self,
        matrix: &SparseMatrix,
        partition: &PartitionDescriptor,
        b: &[f64],
        x: &mut [f64],
        rebuilt: bool,
    ) -> Result<SolveReport> {
        let Some(structure) = self.structure.as_ref() else {
            return Err(BridgeError::Core(SolvCoreError::Internal(
                "solve without a structure".to_string(),
            )));
        };
        let comm = self.comm.clone();
        let residency = self.residency.clone();
        let first_solve = self.context.first_solve();
        let check_norms = self.context.check_norms || cfg!(debug_assertions);
        let atol = self.context.atol;
        let print_residuals = self.context.print_residuals || self.journal.print_residuals;
        let solver_verbosity = self.journal.solver_verbosity().max(u8::from(print_residuals) * 2);
        let renum = structure.renum.clone();
        let pm = structure.pm.clone();

        // Build rhs and initial solution
        self.stage = DriverStage::Transferring;
        let tick = Instant::now();
        let (b_owned, _) = renum.split_vector(b)?;
        let x_owned = renum.gather_owned(x)?;
        let mut rhs = DeviceArray::new("rhs", b_owned.clone());
        let mut sol = DeviceArray::new("sol", x_owned.clone());
        residency.ensure_readable_on_device(&mut rhs)?;
        residency.ensure_readable_on_device(&mut sol)?;
        self.timings.transfer = tick.elapsed();
        log::info!(
            "[solv] Time to move vectors on device: {:.6} s ({})",
            self.timings.transfer.as_secs_f64(),
            crate::human_size(rhs.byte_len() + sol.byte_len())
        );
        if renum.owned_count() < self.journal.debug_dump_limit {
            log::debug!("b={:?}", b);
            log::debug!("x={:?}", x);
        }

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| SolvCoreError::Configuration("no linear solver backend available".to_string()))?;
        let host_norm = |v: &[f64]| -> Result<f64> {
            let local: f64 = v.iter().map(|a| a * a).sum();
            Ok(comm.all_reduce_sum(local)?.sqrt())
        };
        if check_norms {
            check_norm("Before solve ||x||", host_norm(&x_owned)?, backend.norm(&mut sol)?)?;
            check_norm("Before solve ||b||", host_norm(&b_owned)?, backend.norm(&mut rhs)?)?;
        }

        // Division by a zero rhs norm inside the solver logs: silence it
        let rhs_norm = backend.norm(&mut rhs)?;
        if rhs_norm > 0.0 {
            backend.set_verbose(solver_verbosity);
        } else {
            log::warn!("Right-hand side has a zero norm, solver verbosity set to 0");
            backend.set_verbose(0);
        }

        // Residuals on the host the first time (safer), then on the backend (faster)
        let initial_residual = if first_solve {
            host_residual(matrix, partition.keep_flags(), b, x, comm.as_ref())?
        } else {
            let mut ax = DeviceArray::zeros("e", renum.owned_count());
            backend.apply(&mut sol, &mut ax)?;
            residency.copy_to_host(&mut ax)?;
            let e: Vec<f64> = ax.host()?.iter().zip(&b_owned).map(|(a, b)| b - a).collect();
            host_norm(&e)?
        };

        self.stage = DriverStage::Solving;
        let tick = Instant::now();
        let iterations = backend.solve(&mut rhs, &mut sol)?;
        let status = backend.status();
        let mut final_residual = backend.current_residual();
        check_status(status, iterations, final_residual)?;
        self.timings.solve = tick.elapsed();
        log::info!(
            "[solv] Time to solve: {:.6} s ({} iterations)",
            self.timings.solve.as_secs_f64(),
            iterations
        );

        // Bring the solution back
        self.stage = DriverStage::CheckingResidual;
        let tick = Instant::now();
        residency.copy_to_host(&mut sol)?;
        let solution = sol.host()?.to_vec();
        renum.scatter_owned(&solution, x)?;
        let mut ghost = vec![0.0; renum.ghost_count()];
        pm.exchange(comm.as_ref(), &solution, &mut ghost)?;
        renum.scatter_ghost(&ghost, x)?;
        if first_solve {
            final_residual = host_residual(matrix, partition.keep_flags(), b, x, comm.as_ref())?;
        }
        if check_norms {
            check_norm("After solve ||x||", host_norm(&solution)?, backend.norm(&mut sol)?)?;
            check_norm("After solve ||b||", host_norm(&b_owned)?, backend.norm(&mut rhs)?)?;
        }
        residual_gate(final_residual, atol)?;
        self.timings.check = tick.elapsed();

        if print_residuals {
            let relative = if initial_residual > 0.0 {
                final_residual / initial_residual
            } else {
                final_residual
            };
            log::info!("Final residue: {:e} ( {:e} )", final_residual, relative);
        }
        residency.delete_on_device(&mut sol)?;
        residency.delete_on_device(&mut rhs)?;
        let stats = residency.stats();
        log::trace!(
            "Transfers so far: {} to device, {} from device",
            crate::human_size(stats.bytes_to_device),
            crate::human_size(stats.bytes_from_device)
        );

        Ok(SolveReport {
            iterations,
            initial_residual,
            final_residual,
            status,
            rebuilt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solv_lsolver::SerialComm;

    #[test]
    fn test_residual_gate() {
        assert!(residual_gate(1e-7, 1e-6).is_ok());
        match residual_gate(0.1, 1e-6) {
            Err(BridgeError::ResidualExceeded {
                residual,
                tolerance,
            }) => {
                assert_eq!(residual, 0.1);
                assert_eq!(tolerance, 1e-6);
            }
            other => panic!("Expected a residual error, got {:?}", other),
        }
        assert!(residual_gate(f64::NAN, 1e-6).is_err());
    }

    #[test]
    fn test_status_policy() {
        assert!(check_status(SolverStatus::Converged, 3, 1e-13).is_ok());
        assert!(check_status(SolverStatus::MaxIterationsReached, 100, 1e-3).is_ok());
        match check_status(SolverStatus::Diverged, 4, 1e9) {
            Err(BridgeError::Divergence { iterations, .. }) => assert_eq!(iterations, 4),
            other => panic!("Expected a divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_host_residual_ignores_ghost_rows() {
        // owned 0 1, ghost 2 whose row holds garbage
        let a = SparseMatrix::from_dense(&[
            vec![2.0, 0.0, -1.0],
            vec![0.0, 3.0, 0.0],
            vec![7.0, 7.0, 7.0],
        ])
        .unwrap();
        let keep = [true, true, false];
        let x = [1.0, 1.0, 1.0];
        let b = [1.0, 3.0, 0.0];
        let residual = host_residual(&a, &keep, &b, &x, &SerialComm).unwrap();
        assert_eq!(residual, 0.0);
    }

    #[test]
    fn test_norm_check() {
        assert!(check_norm("||x||", 2.0, 2.0 + 1e-12).is_ok());
        assert!(check_norm("||x||", 0.0, 0.0).is_ok());
        match check_norm("||b||", 2.0, 2.1) {
            Err(BridgeError::NormMismatch { label, .. }) => assert_eq!(label, "||b||"),
            other => panic!("Expected a norm mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_solve_without_backend_is_a_configuration_error() {
        let mut driver = SolveDriver::new(SolveContext::default(), Arc::new(SerialComm));
        let mut a = SparseMatrix::identity(2);
        let partition = PartitionDescriptor::serial(2);
        let mut x = vec![0.0; 2];
        let err = driver.solve(&mut a, &partition, &[1.0, 1.0], &mut x).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("no linear solver backend"));
    }
}
