//! Point-to-point and collective communication between ranks.
//!
//! [`SerialComm`] is the single-rank implementation. [`ChannelComm`] runs a
//! group of ranks as threads of one process, exchanging messages over std
//! channels; it backs the multi-rank tests. With the `mpi` feature,
//! `MpiComm` connects ranks running as separate MPI processes.

use solv_core::SolvCoreError;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// Message tags used by the solver crates.
pub mod tags {
    pub const HALO: u32 = 1;
    pub const REDUCE: u32 = 2;
    pub const GATHER: u32 = 3;
}

/// Blocking message passing between the ranks of a group.
///
/// Collective operations must be called by every rank in the same order.
/// Messages between a pair of ranks with the same tag are received in the
/// order they were sent.
pub trait Communicator: Debug + Send + Sync {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    fn send(&self, dest: usize, tag: u32, data: &[f64]) -> Result<(), SolvCoreError>;

    fn recv(&self, source: usize, tag: u32) -> Result<Vec<f64>, SolvCoreError>;

    /// Sends `outgoing[k]` to `peers[k]` and returns what each peer sent back
    /// with the same tag, in `peers` order. Every peer must call it with this
    /// rank in its own list.
    fn exchange(
        &self,
        tag: u32,
        peers: &[usize],
        outgoing: &[Vec<f64>],
    ) -> Result<Vec<Vec<f64>>, SolvCoreError> {
        check_exchange(peers, outgoing)?;
        for (&dest, data) in peers.iter().zip(outgoing) {
            self.send(dest, tag, data)?;
        }
        peers.iter().map(|&source| self.recv(source, tag)).collect()
    }

    /// Sum a local scalar across all ranks.
    fn all_reduce_sum(&self, local: f64) -> Result<f64, SolvCoreError> {
        Ok(self.all_gather(local)?.iter().sum())
    }

    /// Max of a local scalar across all ranks.
    fn all_reduce_max(&self, local: f64) -> Result<f64, SolvCoreError> {
        Ok(self
            .all_gather(local)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    /// Every rank's value, indexed by rank.
    fn all_gather(&self, local: f64) -> Result<Vec<f64>, SolvCoreError> {
        let size = self.size();
        let me = self.rank();
        for dest in (0..size).filter(|&r| r != me) {
            self.send(dest, tags::GATHER, &[local])?;
        }
        let mut values = Vec::with_capacity(size);
        for source in 0..size {
            if source == me {
                values.push(local);
                continue;
            }
            let message = self.recv(source, tags::GATHER)?;
            match message.as_slice() {
                [value] => values.push(*value),
                _ => {
                    return Err(SolvCoreError::Communication(format!(
                        "all_gather expected one value from rank {}, got {}",
                        source,
                        message.len()
                    )))
                }
            }
        }
        Ok(values)
    }

    /// Synchronization barrier.
    fn barrier(&self) -> Result<(), SolvCoreError> {
        self.all_gather(0.0).map(|_| ())
    }
}

pub(crate) fn check_exchange(peers: &[usize], outgoing: &[Vec<f64>]) -> Result<(), SolvCoreError> {
    if peers.len() != outgoing.len() {
        return Err(SolvCoreError::Communication(format!(
            "exchange with {} peers given {} messages",
            peers.len(),
            outgoing.len()
        )));
    }
    Ok(())
}

/// Single-rank communicator: collectives are identities and there is no peer
/// to exchange with.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _tag: u32, _data: &[f64]) -> Result<(), SolvCoreError> {
        Err(SolvCoreError::Communication(format!(
            "serial communicator has no rank {}",
            dest
        )))
    }

    fn recv(&self, source: usize, _tag: u32) -> Result<Vec<f64>, SolvCoreError> {
        Err(SolvCoreError::Communication(format!(
            "serial communicator has no rank {}",
            source
        )))
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, SolvCoreError> {
        Ok(local)
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64, SolvCoreError> {
        Ok(local)
    }

    fn all_gather(&self, local: f64) -> Result<Vec<f64>, SolvCoreError> {
        Ok(vec![local])
    }

    fn barrier(&self) -> Result<(), SolvCoreError> {
        Ok(())
    }
}

#[derive(Debug)]
struct Message {
    source: usize,
    tag: u32,
    payload: Vec<f64>,
}

#[derive(Debug)]
struct Inbox {
    receiver: Receiver<Message>,
    /// Messages received while waiting for another (source, tag).
    pending: VecDeque<Message>,
}

/// One rank of an in-process group connected by channels.
#[derive(Debug)]
pub struct ChannelComm {
    rank: usize,
    senders: Vec<Sender<Message>>,
    inbox: Mutex<Inbox>,
    timeout: Duration,
}

impl ChannelComm {
    /// Default time a receive waits before failing.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates the `size` connected ranks of a group. Element `r` is rank `r`;
    /// move each into its own thread.
    pub fn group(size: usize) -> Vec<ChannelComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::channel::<Message>()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ChannelComm {
                rank,
                senders: senders.clone(),
                inbox: Mutex::new(Inbox {
                    receiver,
                    pending: VecDeque::new(),
                }),
                timeout: Self::DEFAULT_TIMEOUT,
            })
            .collect()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dest: usize, tag: u32, data: &[f64]) -> Result<(), SolvCoreError> {
        let sender = self.senders.get(dest).ok_or_else(|| {
            SolvCoreError::Communication(format!(
                "rank {} does not exist in a group of {}",
                dest,
                self.senders.len()
            ))
        })?;
        sender
            .send(Message {
                source: self.rank,
                tag,
                payload: data.to_vec(),
            })
            .map_err(|_| {
                SolvCoreError::Communication(format!(
                    "rank {} hung up before receiving from rank {}",
                    dest, self.rank
                ))
            })
    }

    fn recv(&self, source: usize, tag: u32) -> Result<Vec<f64>, SolvCoreError> {
        let mut inbox = self
            .inbox
            .lock()
            .map_err(|_| SolvCoreError::Communication("inbox poisoned".to_string()))?;
        if let Some(pos) = inbox
            .pending
            .iter()
            .position(|m| m.source == source && m.tag == tag)
        {
            if let Some(message) = inbox.pending.remove(pos) {
                return Ok(message.payload);
            }
        }
        loop {
            match inbox.receiver.recv_timeout(self.timeout) {
                Ok(message) if message.source == source && message.tag == tag => {
                    return Ok(message.payload)
                }
                Ok(message) => inbox.pending.push_back(message),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SolvCoreError::Communication(format!(
                        "rank {} timed out waiting for rank {} (tag {})",
                        self.rank, source, tag
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SolvCoreError::Communication(format!(
                        "rank {} disconnected while waiting for rank {}",
                        self.rank, source
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn serial_collectives_are_identities() {
        let comm = SerialComm;
        assert_eq!(comm.all_reduce_sum(42.0).unwrap(), 42.0);
        assert_eq!(comm.all_reduce_max(-1.5).unwrap(), -1.5);
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert!(comm.send(1, tags::HALO, &[1.0]).is_err());
    }

    #[test]
    fn channel_group_reductions() {
        let handles: Vec<_> = ChannelComm::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let value = comm.rank() as f64 + 1.0;
                    let sum = comm.all_reduce_sum(value).unwrap();
                    let max = comm.all_reduce_max(value).unwrap();
                    comm.barrier().unwrap();
                    (sum, max)
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), (6.0, 3.0));
        }
    }

    #[test]
    fn channel_messages_are_matched_by_source_and_tag() {
        let mut group = ChannelComm::group(2);
        let second = group.pop().unwrap();
        let first = group.pop().unwrap();
        let sender = thread::spawn(move || {
            second.send(0, tags::REDUCE, &[2.0]).unwrap();
            second.send(0, tags::HALO, &[1.0, 1.5]).unwrap();
            second
        });
        let _second = sender.join().unwrap();
        assert_eq!(first.recv(1, tags::HALO).unwrap(), vec![1.0, 1.5]);
        assert_eq!(first.recv(1, tags::REDUCE).unwrap(), vec![2.0]);
    }

    #[test]
    fn channel_exchange_between_neighbors() {
        let handles: Vec<_> = ChannelComm::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let me = comm.rank();
                    let peers: Vec<usize> = [me.checked_sub(1), Some(me + 1).filter(|&r| r < 3)]
                        .into_iter()
                        .flatten()
                        .collect();
                    let outgoing: Vec<Vec<f64>> =
                        peers.iter().map(|&p| vec![(10 * me + p) as f64]).collect();
                    (me, comm.exchange(tags::HALO, &peers, &outgoing).unwrap())
                })
            })
            .collect();
        for handle in handles {
            let (me, received) = handle.join().unwrap();
            let expected: Vec<Vec<f64>> = match me {
                0 => vec![vec![10.0]],
                1 => vec![vec![1.0], vec![21.0]],
                _ => vec![vec![12.0]],
            };
            assert_eq!(received, expected);
        }
    }

    #[test]
    fn exchange_rejects_mismatched_messages() {
        let comm = ChannelComm::group(2).remove(0);
        match comm.exchange(tags::HALO, &[1], &[]) {
            Err(SolvCoreError::Communication(msg)) => assert!(msg.contains("1 peers")),
            other => panic!("Expected a communication error, got {:?}", other),
        }
    }

    #[test]
    fn channel_recv_times_out() {
        let mut group = ChannelComm::group(2);
        let first = group.remove(0).with_timeout(Duration::from_millis(10));
        match first.recv(1, tags::HALO) {
            Err(SolvCoreError::Communication(msg)) => assert!(msg.contains("timed out")),
            other => panic!("Expected a communication error, got {:?}", other),
        }
    }
}
