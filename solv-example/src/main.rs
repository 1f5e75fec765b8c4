use std::sync::Arc;

use solv_bridge::fatal::exit_on_fatal;
use solv_bridge::{BridgeError, IndexLists, JournalConfig, PartitionDescriptor, SolveDriver, SolverConfig};
use solv_core::{SparseMatrix, Triplete};
use solv_lsolver::Communicator;

const SOLVER_BLOCK: &str = "GCP { precond jacobi { } seuil 1e-8 rtol 1e-14 }";
const REACTION: f64 = 4.0;
const STEPS: usize = 60;

/// One rank's share of the chain `-u'' + REACTION * u` on `(0, 1)` with
/// homogeneous Dirichlet ends, plus its halo.
struct Subdomain {
    partition: PartitionDescriptor,
    matrix: SparseMatrix,
    /// Global cell of every local item.
    cells: Vec<usize>,
    first_owned: usize,
    owned: usize,
}

impl Subdomain {
    fn new(rank: usize, ranks: usize, cells_per_rank: usize, dt: f64) -> Result<Self, BridgeError> {
        let has_left = rank > 0;
        let has_right = rank + 1 < ranks;
        let first_owned = usize::from(has_left);
        let len = cells_per_rank + first_owned + usize::from(has_right);
        let first_cell = rank * cells_per_rank;

        let mut keep = vec![true; len];
        let mut cells = Vec::with_capacity(len);
        if has_left {
            keep[0] = false;
            cells.push(first_cell - 1);
        }
        cells.extend(first_cell..first_cell + cells_per_rank);
        if has_right {
            keep[len - 1] = false;
            cells.push(first_cell + cells_per_rank);
        }

        let (mut neighbors, mut sends, mut items, mut blocks) = (vec![], vec![], vec![], vec![]);
        if has_left {
            neighbors.push(rank - 1);
            sends.push(vec![first_owned]);
            items.push(vec![0]);
            blocks.push(vec![]);
        }
        if has_right {
            neighbors.push(rank + 1);
            sends.push(vec![first_owned + cells_per_rank - 1]);
            items.push(vec![]);
            blocks.push(vec![len - 1, len]);
        }
        let partition = PartitionDescriptor::new(
            keep,
            neighbors,
            IndexLists::from_lists(&sends),
            IndexLists::from_lists(&items),
            IndexLists::from_lists(&blocks),
        )?;

        let mut subdomain = Self {
            partition,
            matrix: SparseMatrix::new(len, len),
            cells,
            first_owned,
            owned: cells_per_rank,
        };
        subdomain.assemble(ranks * cells_per_rank, dt)?;
        Ok(subdomain)
    }

    /// `(1/dt) I + A` on the owned rows, ghost rows left empty.
    fn assemble(&mut self, cells: usize, dt: f64) -> Result<(), BridgeError> {
        let h = 1.0 / (cells + 1) as f64;
        let off = -1.0 / (h * h);
        let diag = 2.0 / (h * h) + REACTION + 1.0 / dt;
        let len = self.cells.len();
        let mut triplets = Vec::new();
        for i in self.first_owned..self.first_owned + self.owned {
            triplets.push(Triplete::new(i, i, diag));
            if i > 0 {
                triplets.push(Triplete::new(i, i - 1, off));
            }
            if i + 1 < len {
                triplets.push(Triplete::new(i, i + 1, off));
            }
        }
        let fresh = SparseMatrix::from_triplets(len, len, triplets)?;
        if self.matrix.nnz() == fresh.nnz() {
            // Same pattern: refresh the coefficients only
            self.matrix.values_mut().copy_from_slice(fresh.values());
        } else {
            self.matrix = fresh;
        }
        Ok(())
    }

    fn position(&self, i: usize, cells: usize) -> f64 {
        (self.cells[i] + 1) as f64 / (cells + 1) as f64
    }
}

/// Implicit Euler steps of `u_t = u'' - REACTION * u + f`, one solve per step.
fn run_rank(
    comm: Arc<dyn Communicator>,
    cells_per_rank: usize,
    config: SolverConfig,
    journal: JournalConfig,
) -> Result<f64, BridgeError> {
    let rank = comm.rank();
    let ranks = comm.size();
    let cells = ranks * cells_per_rank;
    let mut dt = 0.02;
    let mut subdomain = Subdomain::new(rank, ranks, cells_per_rank, dt)?;
    let mut driver = SolveDriver::from_config(&config, comm.clone())?.with_journal(journal);

    let source: Vec<f64> = (0..subdomain.cells.len())
        .map(|i| {
            let x = subdomain.position(i, cells);
            (std::f64::consts::PI.powi(2) + REACTION) * (std::f64::consts::PI * x).sin()
        })
        .collect();
    let mut u = vec![0.0; subdomain.cells.len()];

    for step in 0..STEPS {
        if step == STEPS / 2 {
            // Finer time step for the second half: new coefficients, same pattern
            dt *= 0.5;
            subdomain.assemble(cells, dt)?;
            driver.context_mut().mark_matrix_changed();
        }
        let b: Vec<f64> = source.iter().zip(&u).map(|(f, u)| f + u / dt).collect();
        let report = driver.solve(&mut subdomain.matrix, &subdomain.partition, &b, &mut u)?;
        if rank == 0 && (step % 10 == 0 || report.rebuilt) {
            log::info!(
                "Step {}: {} iterations, residual {:e}, rebuilt {}",
                step,
                report.iterations,
                report.final_residual,
                report.rebuilt
            );
        }
    }
    if rank == 0 {
        log::info!(
            "{} schedule build(s), {} coefficient update(s), {} solves",
            driver.schedule_builds(),
            driver.operator_updates(),
            driver.solves()
        );
    }

    // Close to the steady state sin(pi x) by now
    let local_error = (subdomain.first_owned..subdomain.first_owned + subdomain.owned)
        .map(|i| (u[i] - (std::f64::consts::PI * subdomain.position(i, cells)).sin()).abs())
        .fold(0.0, f64::max);
    let error = comm.all_reduce_max(local_error)?;
    Ok(error)
}

/// Every rank is a thread of this process.
#[cfg(not(feature = "mpi"))]
fn run_ranks(
    mut args: impl Iterator<Item = String>,
    config: SolverConfig,
    journal: JournalConfig,
) -> Result<Option<(usize, f64)>, BridgeError> {
    use solv_lsolver::ChannelComm;
    use std::thread;

    let ranks: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(4);
    let cells_per_rank: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(8);
    println!(
        "Reaction-diffusion on {} cells over {} ranks, solver {}",
        ranks * cells_per_rank,
        ranks,
        config.solver
    );
    let handles: Vec<_> = ChannelComm::group(ranks)
        .into_iter()
        .map(|comm| {
            let config = config.clone();
            let journal = journal.clone();
            thread::spawn(move || run_rank(Arc::new(comm), cells_per_rank, config, journal))
        })
        .collect();

    let mut error = 0.0;
    for handle in handles {
        match handle.join() {
            Ok(result) => error = result?,
            Err(_) => {
                eprintln!("A rank panicked");
                std::process::exit(1);
            }
        }
    }
    Ok(Some((ranks, error)))
}

/// This process is one rank of the MPI world: `mpirun -n 4 solv-example 8`.
/// Only rank 0 reports.
#[cfg(feature = "mpi")]
fn run_ranks(
    mut args: impl Iterator<Item = String>,
    config: SolverConfig,
    journal: JournalConfig,
) -> Result<Option<(usize, f64)>, BridgeError> {
    use solv_lsolver::MpiComm;

    let cells_per_rank: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(8);
    let (_universe, comm) = MpiComm::initialize()?;
    let ranks = comm.size();
    let rank = comm.rank();
    if rank == 0 {
        println!(
            "Reaction-diffusion on {} cells over {} MPI ranks, solver {}",
            ranks * cells_per_rank,
            ranks,
            config.solver
        );
    }
    let error = run_rank(Arc::new(comm), cells_per_rank, config, journal)?;
    Ok((rank == 0).then_some((ranks, error)))
}

fn main() {
    let args = std::env::args().skip(1);
    let journal = JournalConfig::default();
    journal.init_logger();
    let config = exit_on_fatal(SolverConfig::parse_block(SOLVER_BLOCK).map_err(BridgeError::from));

    let start_time = std::time::Instant::now();
    if let Some((ranks, error)) = exit_on_fatal(run_ranks(args, config, journal)) {
        println!("Max error against sin(pi x) over {} ranks: {:e}", ranks, error);
        println!("Elapsed time: {:?}", start_time.elapsed());
    }
}
