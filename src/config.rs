use std::num::NonZeroUsize;

use crate::error::ScanError;

pub const DEFAULT_WORKERS_PER_GROUP: u32 = 16;
pub const DEFAULT_WORK_PER_WORKER: u32 = 16;

const MAX_WORKERS_PER_GROUP: u32 = 256;
const MAX_WORK_PER_WORKER: u32 = 64;

/// Shape of the cooperating team that scans one cluster.
///
/// The cluster size is `workers_per_group * work_per_worker`. Larger clusters
/// mean fewer look-back hops but more sequential work per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamShape {
    pub workers_per_group: u32,
    pub work_per_worker: u32,
}

impl TeamShape {
    pub fn new(workers_per_group: u32, work_per_worker: u32) -> Self {
        Self {
            workers_per_group,
            work_per_worker,
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.workers_per_group as usize * self.work_per_worker as usize
    }
}

impl Default for TeamShape {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS_PER_GROUP, DEFAULT_WORK_PER_WORKER)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    pub team: TeamShape,
    /// Concurrently resident host groups. Defaults to the available parallelism.
    pub host_groups: Option<NonZeroUsize>,
    /// Upper bound on polls of a pending predecessor before giving up.
    /// `None` waits forever.
    pub spin_limit: Option<u64>,
}

impl ScanConfig {
    pub fn with_team(mut self, team: TeamShape) -> Self {
        self.team = team;
        self
    }

    pub fn with_host_groups(mut self, groups: NonZeroUsize) -> Self {
        self.host_groups = Some(groups);
        self
    }

    pub fn with_spin_limit(mut self, spins: u64) -> Self {
        self.spin_limit = Some(spins);
        self
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        let TeamShape {
            workers_per_group,
            work_per_worker,
        } = self.team;

        if workers_per_group == 0 || work_per_worker == 0 {
            return Err(ScanError::InvalidConfig(format!(
                "team shape must be non-empty, got {workers_per_group} workers x {work_per_worker} elements"
            )));
        }
        if workers_per_group > MAX_WORKERS_PER_GROUP {
            return Err(ScanError::InvalidConfig(format!(
                "at most {MAX_WORKERS_PER_GROUP} workers per group, got {workers_per_group}"
            )));
        }
        if work_per_worker > MAX_WORK_PER_WORKER {
            return Err(ScanError::InvalidConfig(format!(
                "at most {MAX_WORK_PER_WORKER} elements per worker, got {work_per_worker}"
            )));
        }

        Ok(())
    }

    pub(crate) fn resident_host_groups(&self) -> usize {
        self.host_groups
            .or_else(|| std::thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get)
    }
}
