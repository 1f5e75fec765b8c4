use crate::comm::{tags, Communicator};
use solv_core::SolvCoreError;

/// Halo-exchange plan of one rank, in the flat layout the backend consumes.
///
/// Owned values `boundary_index[send_offsets[k]..send_offsets[k + 1]]` go to
/// `neighbors[k]`; values received from `neighbors[k]` fill the ghost slots
/// `recv_offsets[k]..recv_offsets[k + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelManager {
    global_rows: usize,
    local_rows: usize,
    ghost_rows: usize,
    neighbors: Vec<usize>,
    boundary_index: Vec<usize>,
    send_offsets: Vec<usize>,
    recv_offsets: Vec<usize>,
}

impl ParallelManager {
    /// Plan of a rank without neighbors.
    pub fn serial(rows: usize) -> Self {
        Self {
            global_rows: rows,
            local_rows: rows,
            ghost_rows: 0,
            neighbors: Vec::new(),
            boundary_index: Vec::new(),
            send_offsets: vec![0],
            recv_offsets: vec![0],
        }
    }

    /// Validates and assembles an exchange plan.
    ///
    /// # Errors
    /// `InvalidDimensions` if the offset tables do not match the neighbor list,
    /// if a send segment is not strictly increasing, or if an index falls
    /// outside the owned rows.
    pub fn new(
        global_rows: usize,
        local_rows: usize,
        ghost_rows: usize,
        neighbors: Vec<usize>,
        boundary_index: Vec<usize>,
        send_offsets: Vec<usize>,
        recv_offsets: Vec<usize>,
    ) -> Result<Self, SolvCoreError> {
        let n = neighbors.len();
        check_offsets("send_offsets", &send_offsets, n, boundary_index.len())?;
        check_offsets("recv_offsets", &recv_offsets, n, ghost_rows)?;
        for k in 0..n {
            let segment = &boundary_index[send_offsets[k]..send_offsets[k + 1]];
            if segment.windows(2).any(|w| w[0] >= w[1]) {
                return Err(SolvCoreError::InvalidDimensions(format!(
                    "Boundary indices sent to rank {} are not sorted and unique",
                    neighbors[k]
                )));
            }
        }
        if let Some(&bad) = boundary_index.iter().find(|&&i| i >= local_rows) {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Boundary index {} outside the {} owned rows",
                bad, local_rows
            )));
        }
        Ok(Self {
            global_rows,
            local_rows,
            ghost_rows,
            neighbors,
            boundary_index,
            send_offsets,
            recv_offsets,
        })
    }

    pub fn global_rows(&self) -> usize {
        self.global_rows
    }

    pub fn local_rows(&self) -> usize {
        self.local_rows
    }

    pub fn ghost_rows(&self) -> usize {
        self.ghost_rows
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

    /// Sends boundary values of `owned` to every neighbor and fills `ghost`
    /// with what the neighbors send back.
    pub fn exchange(
        &self,
        comm: &dyn Communicator,
        owned: &[f64],
        ghost: &mut [f64],
    ) -> Result<(), SolvCoreError> {
        if owned.len() != self.local_rows || ghost.len() != self.ghost_rows {
            return Err(SolvCoreError::InvalidDimensions(format!(
                "Halo exchange on {} owned and {} ghost values, expected {} and {}",
                owned.len(),
                ghost.len(),
                self.local_rows,
                self.ghost_rows
            )));
        }
        if self.neighbors.is_empty() {
            return Ok(());
        }
        let outgoing: Vec<Vec<f64>> = (0..self.neighbors.len())
            .map(|k| {
                self.boundary_index[self.send_offsets[k]..self.send_offsets[k + 1]]
                    .iter()
                    .map(|&i| owned[i])
                    .collect()
            })
            .collect();
        let incoming = comm.exchange(tags::HALO, &self.neighbors, &outgoing)?;
        for (k, (&source, received)) in self.neighbors.iter().zip(incoming).enumerate() {
            let slots = &mut ghost[self.recv_offsets[k]..self.recv_offsets[k + 1]];
            if received.len() != slots.len() {
                return Err(SolvCoreError::Communication(format!(
                    "rank {} sent {} halo values, {} expected",
                    source,
                    received.len(),
                    slots.len()
                )));
            }
            slots.copy_from_slice(&received);
        }
        Ok(())
    }

    /// Text dump of the plan, one table per line.
    pub fn describe(&self) -> String {
        format!(
            "global_rows={} local_rows={} ghost_rows={}\nneighbors={:?}\nboundary_index={:?}\nsend_offsets={:?}\nrecv_offsets={:?}",
            self.global_rows,
            self.local_rows,
            self.ghost_rows,
            self.neighbors,
            self.boundary_index,
            self.send_offsets,
            self.recv_offsets
        )
    }
}

fn check_offsets(
    name: &str,
    offsets: &[usize],
    neighbors: usize,
    total: usize,
) -> Result<(), SolvCoreError> {
    if offsets.len() != neighbors + 1 {
        return Err(SolvCoreError::InvalidDimensions(format!(
            "{} has {} entries for {} neighbors",
            name,
            offsets.len(),
            neighbors
        )));
    }
    if offsets[0] != 0 || offsets[neighbors] != total {
        return Err(SolvCoreError::InvalidDimensions(format!(
            "{} must run from 0 to {}",
            name, total
        )));
    }
    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(SolvCoreError::InvalidDimensions(format!(
            "{} must be non-decreasing",
            name
        )));
    }
    Ok(())
}
