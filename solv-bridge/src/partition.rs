use crate::error::{BridgeError, Result};

/// List of index lists in flat form: list `k` is
/// `index[offsets[k]..offsets[k + 1]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLists {
    index: Vec<usize>,
    offsets: Vec<usize>,
}

impl Default for IndexLists {
    fn default() -> Self {
        Self {
            index: Vec::new(),
            offsets: vec![0],
        }
    }
}

impl IndexLists {
    /// # Errors
    /// `Partition` if `offsets` is empty, does not start at zero, decreases or
    /// does not end at `index.len()`.
    pub fn new(index: Vec<usize>, offsets: Vec<usize>) -> Result<Self> {
        if offsets.first() != Some(&0) {
            return Err(BridgeError::Partition(
                "index list offsets must start at 0".to_string(),
            ));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(BridgeError::Partition(format!(
                "index list offsets are decreasing: {:?}",
                offsets
            )));
        }
        if offsets.last() != Some(&index.len()) {
            return Err(BridgeError::Partition(format!(
                "index list offsets end at {:?}, the flat index has {} entries",
                offsets.last(),
                index.len()
            )));
        }
        Ok(Self { index, offsets })
    }

    pub fn from_lists(lists: &[Vec<usize>]) -> Self {
        let mut index = Vec::with_capacity(lists.iter().map(Vec::len).sum());
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        offsets.push(0);
        for list in lists {
            index.extend_from_slice(list);
            offsets.push(index.len());
        }
        Self { index, offsets }
    }

    /// `count` empty lists.
    pub fn empty(count: usize) -> Self {
        Self {
            index: Vec::new(),
            offsets: vec![0; count + 1],
        }
    }

    /// Number of lists.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self, k: usize) -> &[usize] {
        &self.index[self.offsets[k]..self.offsets[k + 1]]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> + '_ {
        (0..self.len()).map(move |k| self.list(k))
    }

    pub fn flat(&self) -> &[usize] {
        &self.index
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
}

/// Which local items a process owns and how it synchronizes the others
/// with its neighbors.
///
/// Items are indexed in the caller's local order; owned and ghost items may
/// be interleaved. For neighbor `k`:
/// - `items_to_send.list(k)` holds owned items that neighbor reads as ghosts,
///   in any order and possibly repeated;
/// - `items_to_recv.list(k)` then the `[begin, end)` pairs of
///   `blocks_to_recv.list(k)` hold the ghost items it fills, in the order
///   the neighbor sends them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    keep_flags: Vec<bool>,
    owned_count: usize,
    neighbors: Vec<usize>,
    items_to_send: IndexLists,
    items_to_recv: IndexLists,
    blocks_to_recv: IndexLists,
}

impl PartitionDescriptor {
    /// A process owning all `len` items.
    pub fn serial(len: usize) -> Self {
        Self {
            keep_flags: vec![true; len],
            owned_count: len,
            neighbors: Vec::new(),
            items_to_send: IndexLists::empty(0),
            items_to_recv: IndexLists::empty(0),
            blocks_to_recv: IndexLists::empty(0),
        }
    }

    /// # Errors
    /// `Partition` when the lists do not have one entry per neighbor, a
    /// neighbor is repeated, an item is out of range, a sent item is a ghost,
    /// a received item is owned, or a receive block is not a valid range.
    pub fn new(
        keep_flags: Vec<bool>,
        neighbors: Vec<usize>,
        items_to_send: IndexLists,
        items_to_recv: IndexLists,
        blocks_to_recv: IndexLists,
    ) -> Result<Self> {
        let len = keep_flags.len();
        let n = neighbors.len();
        for (name, lists) in [
            ("items_to_send", &items_to_send),
            ("items_to_recv", &items_to_recv),
            ("blocks_to_recv", &blocks_to_recv),
        ] {
            if lists.len() != n {
                return Err(BridgeError::Partition(format!(
                    "{} has {} lists for {} neighbors",
                    name,
                    lists.len(),
                    n
                )));
            }
        }
        let mut sorted = neighbors.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(BridgeError::Partition(format!(
                "neighbor list has duplicates: {:?}",
                neighbors
            )));
        }
        for (k, list) in items_to_send.iter().enumerate() {
            if let Some(&item) = list.iter().find(|&&i| i >= len || !keep_flags[i]) {
                return Err(BridgeError::Partition(format!(
                    "item {} sent to rank {} is not an owned item",
                    item, neighbors[k]
                )));
            }
        }
        for (k, list) in items_to_recv.iter().enumerate() {
            if let Some(&item) = list.iter().find(|&&i| i >= len || keep_flags[i]) {
                return Err(BridgeError::Partition(format!(
                    "item {} received from rank {} is not a ghost item",
                    item, neighbors[k]
                )));
            }
        }
        for (k, list) in blocks_to_recv.iter().enumerate() {
            if list.len() % 2 != 0 {
                return Err(BridgeError::Partition(format!(
                    "receive blocks from rank {} are not (begin, end) pairs",
                    neighbors[k]
                )));
            }
            for pair in list.chunks_exact(2) {
                let (begin, end) = (pair[0], pair[1]);
                if begin > end || end > len || keep_flags[begin..end].iter().any(|&keep| keep) {
                    return Err(BridgeError::Partition(format!(
                        "receive block [{}, {}) from rank {} is not a range of ghost items",
                        begin, end, neighbors[k]
                    )));
                }
            }
        }
        let owned_count = keep_flags.iter().filter(|&&keep| keep).count();
        Ok(Self {
            keep_flags,
            owned_count,
            neighbors,
            items_to_send,
            items_to_recv,
            blocks_to_recv,
        })
    }

    /// Number of local items, owned and ghost.
    pub fn len(&self) -> usize {
        self.keep_flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keep_flags.is_empty()
    }

    pub fn owned_count(&self) -> usize {
        self.owned_count
    }

    pub fn ghost_count(&self) -> usize {
        self.len() - self.owned_count
    }

    pub fn keep_flags(&self) -> &[bool] {
        &self.keep_flags
    }

    pub fn is_owned(&self, item: usize) -> bool {
        self.keep_flags[item]
    }

    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    pub fn items_to_send(&self) -> &IndexLists {
        &self.items_to_send
    }

    pub fn items_to_recv(&self) -> &IndexLists {
        &self.items_to_recv
    }

    pub fn blocks_to_recv(&self) -> &IndexLists {
        &self.blocks_to_recv
    }

    /// Ghost items filled by neighbor `k`, in receive order.
    pub fn received_items(&self, k: usize) -> impl Iterator<Item = usize> + '_ {
        let blocks = self.blocks_to_recv.list(k);
        self.items_to_recv
            .list(k)
            .iter()
            .copied()
            .chain(blocks.chunks_exact(2).flat_map(|pair| pair[0]..pair[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lists() {
        let lists = IndexLists::from_lists(&[vec![3, 1], vec![], vec![7]]);
        assert_eq!(lists.len(), 3);
        assert_eq!(lists.list(0), &[3, 1]);
        assert!(lists.list(1).is_empty());
        assert_eq!(lists.offsets(), &[0, 2, 2, 3]);
        assert_eq!(IndexLists::new(vec![3, 1, 7], vec![0, 2, 2, 3]).unwrap(), lists);

        match IndexLists::new(vec![1, 2], vec![0, 3]) {
            Err(BridgeError::Partition(msg)) => assert!(msg.contains("flat index has 2")),
            other => panic!("Expected a partition error, got {:?}", other),
        }
    }

    #[test]
    fn test_new_partition_with_interleaved_ghosts() {
        // ghost 0 | owned 1 2 3 | ghost 4 5
        let keep = vec![false, true, true, true, false, false];
        let partition = PartitionDescriptor::new(
            keep,
            vec![0, 2],
            IndexLists::from_lists(&[vec![1], vec![3, 2]]),
            IndexLists::from_lists(&[vec![0], vec![]]),
            IndexLists::from_lists(&[vec![], vec![4, 6]]),
        )
        .unwrap();
        assert_eq!(partition.owned_count(), 3);
        assert_eq!(partition.ghost_count(), 3);
        assert_eq!(partition.received_items(0).collect::<Vec<_>>(), vec![0]);
        assert_eq!(partition.received_items(1).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_sending_a_ghost_is_rejected() {
        let keep = vec![true, false];
        let result = PartitionDescriptor::new(
            keep,
            vec![1],
            IndexLists::from_lists(&[vec![1]]),
            IndexLists::from_lists(&[vec![1]]),
            IndexLists::empty(1),
        );
        match result {
            Err(BridgeError::Partition(msg)) => assert!(msg.contains("not an owned item")),
            other => panic!("Expected a partition error, got {:?}", other),
        }
    }

    #[test]
    fn test_list_count_must_match_neighbors() {
        let result = PartitionDescriptor::new(
            vec![true, false],
            vec![1, 2],
            IndexLists::empty(1),
            IndexLists::empty(2),
            IndexLists::empty(2),
        );
        assert!(matches!(result, Err(BridgeError::Partition(_))));
    }
}
