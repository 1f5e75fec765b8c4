//! MPI transport for ranks running as separate processes.
//!
//! MPI must be initialized before an [`MpiComm`] is built, either through
//! [`MpiComm::initialize`] or by the host application. The returned
//! [`Universe`] finalizes MPI when dropped, so keep it alive for the whole run.

use crate::comm::{check_exchange, Communicator};
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as _, CommunicatorCollectives, Destination, Source};
use solv_core::SolvCoreError;

/// One rank of the MPI world communicator.
///
/// The world handle is looked up on every call, which keeps the type `Send`
/// and `Sync` whatever the MPI implementation's handle type is.
#[derive(Debug, Clone, Copy)]
pub struct MpiComm {
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Initializes MPI and returns the universe with this process's rank.
    ///
    /// # Errors
    /// `Communication` if MPI was already initialized.
    pub fn initialize() -> Result<(Universe, MpiComm), SolvCoreError> {
        let universe = mpi::initialize().ok_or_else(|| {
            SolvCoreError::Communication("MPI is already initialized".to_string())
        })?;
        let comm = Self::world()?;
        Ok((universe, comm))
    }

    /// Rank of this process in an MPI world initialized elsewhere.
    ///
    /// # Errors
    /// `Communication` if MPI is not initialized.
    pub fn world() -> Result<MpiComm, SolvCoreError> {
        if !mpi::environment::is_initialized() {
            return Err(SolvCoreError::Communication(
                "MPI is not initialized".to_string(),
            ));
        }
        let world = SimpleCommunicator::world();
        let comm = MpiComm {
            rank: world.rank() as usize,
            size: world.size() as usize,
        };
        log::debug!("MPI rank {} of {}", comm.rank, comm.size);
        Ok(comm)
    }

    fn peer(&self, rank: usize) -> Result<mpi::Rank, SolvCoreError> {
        if rank >= self.size {
            return Err(SolvCoreError::Communication(format!(
                "rank {} does not exist in an MPI world of {}",
                rank, self.size
            )));
        }
        Ok(rank as mpi::Rank)
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, tag: u32, data: &[f64]) -> Result<(), SolvCoreError> {
        let dest = self.peer(dest)?;
        SimpleCommunicator::world()
            .process_at_rank(dest)
            .send_with_tag(data, tag as mpi::Tag);
        Ok(())
    }

    fn recv(&self, source: usize, tag: u32) -> Result<Vec<f64>, SolvCoreError> {
        let source = self.peer(source)?;
        let (data, _status) = SimpleCommunicator::world()
            .process_at_rank(source)
            .receive_vec_with_tag::<f64>(tag as mpi::Tag);
        Ok(data)
    }

    /// Posts every send as a non-blocking request before receiving, so
    /// neighbors sending to each other at the same time cannot deadlock.
    fn exchange(
        &self,
        tag: u32,
        peers: &[usize],
        outgoing: &[Vec<f64>],
    ) -> Result<Vec<Vec<f64>>, SolvCoreError> {
        check_exchange(peers, outgoing)?;
        let ranks = peers
            .iter()
            .map(|&p| self.peer(p))
            .collect::<Result<Vec<_>, _>>()?;
        let world = SimpleCommunicator::world();
        let tag = tag as mpi::Tag;
        let incoming = mpi::request::scope(|scope| {
            let requests: Vec<_> = ranks
                .iter()
                .zip(outgoing)
                .map(|(&dest, data)| {
                    world
                        .process_at_rank(dest)
                        .immediate_send_with_tag(scope, &data[..], tag)
                })
                .collect();
            let incoming: Vec<Vec<f64>> = ranks
                .iter()
                .map(|&source| world.process_at_rank(source).receive_vec_with_tag::<f64>(tag).0)
                .collect();
            for request in requests {
                request.wait();
            }
            incoming
        });
        Ok(incoming)
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, SolvCoreError> {
        let mut global = 0.0f64;
        SimpleCommunicator::world().all_reduce_into(&local, &mut global, SystemOperation::sum());
        Ok(global)
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64, SolvCoreError> {
        let mut global = 0.0f64;
        SimpleCommunicator::world().all_reduce_into(&local, &mut global, SystemOperation::max());
        Ok(global)
    }

    fn all_gather(&self, local: f64) -> Result<Vec<f64>, SolvCoreError> {
        let mut values = vec![0.0f64; self.size];
        SimpleCommunicator::world().all_gather_into(&local, &mut values[..]);
        Ok(values)
    }

    fn barrier(&self) -> Result<(), SolvCoreError> {
        SimpleCommunicator::world().barrier();
        Ok(())
    }
}
