use crate::error::{BridgeError, Result};
use crate::partition::PartitionDescriptor;
use crate::renumber::LocalRenumbering;
use solv_lsolver::ParallelManager;

/// Halo-exchange plan in the flat layout of the backend's parallel manager.
///
/// Derived only from the partition and the renumbering, so both sides of a
/// neighbor pair compute matching tables without communicating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommSchedule {
    owned_count: usize,
    ghost_count: usize,
    neighbors: Vec<usize>,
    boundary_index: Vec<usize>,
    send_offsets: Vec<usize>,
    recv_offsets: Vec<usize>,
}

impl CommSchedule {
    /// Builds the send and receive tables.
    ///
    /// Send lists are translated to solver numbering, then sorted and
    /// de-duplicated per neighbor. Receive offsets advance by the number of
    /// single items plus the size of every block received from a neighbor.
    ///
    /// # Errors
    /// `Schedule` if the renumbering does not belong to `partition`, if the
    /// receive lists do not cover the ghost slots exactly, or if the items
    /// received from a neighbor do not land in consecutive ghost slots.
    pub fn build(partition: &PartitionDescriptor, renum: &LocalRenumbering) -> Result<Self> {
        if renum.len() != partition.len() || renum.owned_count() != partition.owned_count() {
            return Err(BridgeError::Schedule(format!(
                "renumbering of {} items ({} owned) does not match the partition of {} items ({} owned)",
                renum.len(),
                renum.owned_count(),
                partition.len(),
                partition.owned_count()
            )));
        }
        let neighbors = partition.neighbors().to_vec();

        let mut boundary_index = Vec::with_capacity(partition.items_to_send().flat().len());
        let mut send_offsets = Vec::with_capacity(neighbors.len() + 1);
        send_offsets.push(0);
        let mut segment = Vec::new();
        for (k, raw) in partition.items_to_send().iter().enumerate() {
            segment.clear();
            segment.extend(raw.iter().map(|&item| renum.renum(item)));
            segment.sort_unstable();
            segment.dedup();
            if segment.len() != raw.len() {
                log::debug!(
                    "Removed {} duplicated items from the send list of rank {}",
                    raw.len() - segment.len(),
                    neighbors[k]
                );
            }
            boundary_index.extend_from_slice(&segment);
            send_offsets.push(boundary_index.len());
        }

        let mut recv_offsets = Vec::with_capacity(neighbors.len() + 1);
        recv_offsets.push(0);
        let mut offset = 0;
        for k in 0..neighbors.len() {
            let blocks: usize = partition
                .blocks_to_recv()
                .list(k)
                .chunks_exact(2)
                .map(|pair| pair[1] - pair[0])
                .sum();
            offset += partition.items_to_recv().list(k).len() + blocks;
            recv_offsets.push(offset);
        }
        if offset != renum.ghost_count() {
            return Err(BridgeError::Schedule(format!(
                "neighbors fill {} ghost slots, the partition has {} ghost items",
                offset,
                renum.ghost_count()
            )));
        }
        for k in 0..neighbors.len() {
            let first = recv_offsets[k];
            let misplaced = partition
                .received_items(k)
                .enumerate()
                .find(|&(pos, item)| renum.renum(item) != first + pos);
            if let Some((pos, item)) = misplaced {
                return Err(BridgeError::Schedule(format!(
                    "item {} received from rank {} maps to ghost slot {}, slot {} expected",
                    item,
                    neighbors[k],
                    renum.renum(item),
                    first + pos
                )));
            }
        }

        Ok(Self {
            owned_count: renum.owned_count(),
            ghost_count: renum.ghost_count(),
            neighbors,
            boundary_index,
            send_offsets,
            recv_offsets,
        })
    }

    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    pub fn boundary_index(&self) -> &[usize] {
        &self.boundary_index
    }

    pub fn send_offsets(&self) -> &[usize] {
        &self.send_offsets
    }

    pub fn recv_offsets(&self) -> &[usize] {
        &self.recv_offsets
    }

    /// Solver rows sent to neighbor `k`.
    pub fn send_list(&self, k: usize) -> &[usize] {
        &self.boundary_index[self.send_offsets[k]..self.send_offsets[k + 1]]
    }

    pub fn owned_count(&self) -> usize {
        self.owned_count
    }

    pub fn ghost_count(&self) -> usize {
        self.ghost_count
    }

    /// Hands the tables to the backend's parallel manager.
    pub fn to_parallel_manager(&self, global_rows: usize) -> Result<ParallelManager> {
        Ok(ParallelManager::new(
            global_rows,
            self.owned_count,
            self.ghost_count,
            self.neighbors.clone(),
            self.boundary_index.clone(),
            self.send_offsets.clone(),
            self.recv_offsets.clone(),
        )?)
    }
}
