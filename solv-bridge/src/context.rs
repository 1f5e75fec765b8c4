use std::path::PathBuf;

/// Tolerances and change tracking of the solve driver.
///
/// A new context has both change flags raised, so the first solve builds
/// everything. The driver lowers them after a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveContext {
    pub atol: f64,
    pub rtol: f64,
    pub divtol: f64,
    /// Log the final residue of each solve.
    pub print_residuals: bool,
    /// Write the split CSR blocks of every rebuilt operator in Matrix Market format.
    pub save_matrix_mtx_format: bool,
    /// Directory receiving the Matrix Market dumps.
    pub dump_dir: PathBuf,
    /// Compare host and backend norms of the rhs and the solution around
    /// each solve. Always on in debug builds.
    pub check_norms: bool,
    structure_changed: bool,
    matrix_changed: bool,
    first_solve: bool,
}

impl Default for SolveContext {
    fn default() -> Self {
        Self::new(1e-12, 1e-12, 1e3)
    }
}

impl SolveContext {
    pub fn new(atol: f64, rtol: f64, divtol: f64) -> Self {
        Self {
            atol,
            rtol,
            divtol,
            print_residuals: false,
            save_matrix_mtx_format: false,
            dump_dir: PathBuf::from("."),
            check_norms: cfg!(debug_assertions),
            structure_changed: true,
            matrix_changed: true,
            first_solve: true,
        }
    }

    /// The sparsity pattern or the partition changed: renumbering, schedule
    /// and operator are rebuilt on the next solve.
    pub fn mark_structure_changed(&mut self) {
        self.structure_changed = true;
        self.matrix_changed = true;
    }

    /// Only the coefficients changed: the operator values are refreshed on
    /// the next solve, the schedule is kept.
    pub fn mark_matrix_changed(&mut self) {
        self.matrix_changed = true;
    }

    pub fn structure_changed(&self) -> bool {
        self.structure_changed
    }

    pub fn matrix_changed(&self) -> bool {
        self.matrix_changed
    }

    /// True until a solve needing more than one iteration succeeded. While
    /// set, residuals are computed on the host from the caller's matrix.
    pub fn first_solve(&self) -> bool {
        self.first_solve
    }

    pub(crate) fn solve_succeeded(&mut self, iterations: usize) {
        self.structure_changed = false;
        self.matrix_changed = false;
        if iterations > 1 {
            self.first_solve = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_lifecycle() {
        let mut context = SolveContext::default();
        assert!(context.structure_changed() && context.matrix_changed() && context.first_solve());

        context.solve_succeeded(1);
        assert!(!context.structure_changed());
        assert!(!context.matrix_changed());
        assert!(context.first_solve(), "a one-iteration solve does not validate the device path");

        context.mark_matrix_changed();
        assert!(context.matrix_changed() && !context.structure_changed());

        context.mark_structure_changed();
        context.solve_succeeded(7);
        assert!(!context.first_solve());
    }
}
