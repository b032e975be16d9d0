//! Owned Partitions Tracker
//!
//! Caches the set of partitions owned by this node as an immutable [`PartitionIdSet`]
//! behind an atomic reference. Readers never lock and always see a complete snapshot;
//! writers replace the whole snapshot with a compare-and-swap retry loop.

use super::partition_table::PartitionService;

use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Immutable set of partition ids, stored as a bitset over `[0, partition_count)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionIdSet {
    partition_count: u32,
    bits: Vec<u64>,
    len: usize,
}

impl PartitionIdSet {
    pub fn new<I>(partition_count: u32, partitions: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut bits = vec![0u64; (partition_count as usize).div_ceil(64)];
        let mut len = 0;
        for partition in partitions {
            assert!(
                partition < partition_count,
                "partition {} out of range [0, {})",
                partition,
                partition_count
            );
            let (word, bit) = (partition as usize / 64, partition % 64);
            if bits[word] & (1 << bit) == 0 {
                bits[word] |= 1 << bit;
                len += 1;
            }
        }
        Self {
            partition_count,
            bits,
            len,
        }
    }

    pub fn all(partition_count: u32) -> Self {
        Self::new(partition_count, 0..partition_count)
    }

    pub fn contains(&self, partition_id: u32) -> bool {
        if partition_id >= self.partition_count {
            return false;
        }
        self.bits[partition_id as usize / 64] & (1 << (partition_id % 64)) != 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.partition_count).filter(move |p| self.contains(*p))
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

pub struct OwnedPartitions {
    partition_service: Arc<dyn PartitionService>,
    snapshot: ArcSwapOption<PartitionIdSet>,
}

impl OwnedPartitions {
    pub fn new(partition_service: Arc<dyn PartitionService>) -> Self {
        Self {
            partition_service,
            snapshot: ArcSwapOption::empty(),
        }
    }

    /// Returns the cached snapshot, loading it on first use.
    pub fn get(&self) -> Arc<PartitionIdSet> {
        loop {
            if let Some(partitions) = self.snapshot.load_full() {
                return partitions;
            }
            self.reload();
        }
    }

    pub fn is_owned(&self, partition_id: u32) -> bool {
        self.get().contains(partition_id)
    }

    /// Recomputes the snapshot from the latest assignment.
    ///
    /// May be called concurrently; a lost CAS means another thread published in
    /// between, so the loop re-reads and tries again with a fresh candidate.
    pub fn reload(&self) {
        let local = self.partition_service.local_member();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let expected = self.snapshot.load_full();
            let partitions = self.partition_service.member_partitions(&local.id);
            let candidate = Arc::new(PartitionIdSet::new(
                self.partition_service.partition_count(),
                partitions,
            ));

            let previous = self
                .snapshot
                .compare_and_swap(&expected, Some(candidate.clone()));

            let swapped = match (&*previous, &expected) {
                (Some(prev), Some(exp)) => Arc::ptr_eq(prev, exp),
                (None, None) => true,
                _ => false,
            };

            if swapped {
                tracing::debug!(
                    "Owned partitions reloaded: {} partitions (attempts={})",
                    candidate.len(),
                    attempts
                );
                return;
            }
        }
    }
}
