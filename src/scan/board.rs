use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::partition::ClusterStatus;

/// Shared per-cluster state for the host backend.
///
/// Each slot has a single writer (the group that owns the cluster) and any
/// number of readers. Values are stored with `Relaxed` before the status is
/// raised with `Release`; readers load the status with `Acquire` and only then
/// read the value it guards.
pub struct ClusterBoard {
    status: Vec<AtomicU8>,
    aggregate: Vec<AtomicU32>,
    prefix: Vec<AtomicU32>,
    poisoned: AtomicBool,
}

impl ClusterBoard {
    pub fn new(initial: &[ClusterStatus]) -> Self {
        Self {
            status: initial.iter().map(|&s| AtomicU8::new(s as u8)).collect(),
            aggregate: initial.iter().map(|_| AtomicU32::new(0)).collect(),
            prefix: initial.iter().map(|_| AtomicU32::new(0)).collect(),
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    pub fn status(&self, cluster: usize) -> ClusterStatus {
        ClusterStatus::from_u8(self.status[cluster].load(Ordering::Acquire))
    }

    /// Publishes the aggregate of a cluster that still has predecessors to
    /// resolve.
    pub fn publish_aggregate(&self, cluster: usize, aggregate: f32) {
        self.aggregate[cluster].store(aggregate.to_bits(), Ordering::Relaxed);
        self.raise(cluster, ClusterStatus::AggregateReady);
    }

    /// Publishes the exclusive prefix. The aggregate must already be stored.
    pub fn publish_prefix(&self, cluster: usize, prefix: f32) {
        self.prefix[cluster].store(prefix.to_bits(), Ordering::Relaxed);
        self.raise(cluster, ClusterStatus::PrefixReady);
    }

    /// Publishes a cluster whose prefix is known without look-back (cluster 0).
    pub fn publish_base(&self, cluster: usize, aggregate: f32) {
        self.aggregate[cluster].store(aggregate.to_bits(), Ordering::Relaxed);
        self.prefix[cluster].store(0f32.to_bits(), Ordering::Relaxed);
        self.raise(cluster, ClusterStatus::PrefixReady);
    }

    /// Valid once `status(cluster)` has been observed at `AggregateReady` or later.
    pub fn aggregate(&self, cluster: usize) -> f32 {
        f32::from_bits(self.aggregate[cluster].load(Ordering::Relaxed))
    }

    /// Valid once `status(cluster)` has been observed at `PrefixReady`.
    pub fn prefix(&self, cluster: usize) -> f32 {
        f32::from_bits(self.prefix[cluster].load(Ordering::Relaxed))
    }

    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Relaxed);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Relaxed)
    }

    fn raise(&self, cluster: usize, to: ClusterStatus) {
        // fetch_max keeps the status monotone even if called out of order.
        let previous = self.status[cluster].fetch_max(to as u8, Ordering::Release);
        debug_assert!(previous < to as u8, "cluster {cluster} published {to:?} twice");
    }
}
