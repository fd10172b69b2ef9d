/// Publication state of one cluster. Transitions only move forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClusterStatus {
    Pending = 0,
    AggregateReady = 1,
    PrefixReady = 2,
}

impl ClusterStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ClusterStatus::Pending,
            1 => ClusterStatus::AggregateReady,
            _ => ClusterStatus::PrefixReady,
        }
    }
}

/// Cluster geometry for a sequence of `len` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    len: usize,
    cluster_size: usize,
    cluster_count: usize,
}

impl PartitionPlan {
    pub fn new(len: usize, cluster_size: usize) -> Self {
        assert!(cluster_size > 0, "cluster size must be non-zero");

        Self {
            len,
            cluster_size,
            cluster_count: len.div_ceil(cluster_size),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    /// Length rounded up to a whole number of clusters.
    pub fn padded_len(&self) -> usize {
        self.cluster_count * self.cluster_size
    }

    /// Pads `input` with the additive identity and creates an all-pending
    /// status array.
    pub fn partition(&self, input: &[f32]) -> Partitioned {
        assert_eq!(input.len(), self.len, "input does not match plan");

        let mut padded = Vec::with_capacity(self.padded_len());
        padded.extend_from_slice(input);
        padded.resize(self.padded_len(), 0.0);

        Partitioned {
            padded,
            status: vec![ClusterStatus::Pending; self.cluster_count],
        }
    }
}

/// Padded input plus the initial status of every cluster.
#[derive(Debug, Clone)]
pub struct Partitioned {
    pub padded: Vec<f32>,
    pub status: Vec<ClusterStatus>,
}
