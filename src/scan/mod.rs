//! Single-pass decoupled look-back scan.
//!
//! Every cluster is scanned by its own execution group. A group publishes its
//! aggregate, walks back over its predecessors' published state until it finds
//! a published prefix, publishes its own prefix and writes its outputs. Groups
//! never wait on each other except by polling that shared state.
//!
//! Forward progress requires every predecessor of a waiting group to
//! eventually run. Both backends hand out cluster indices in launch order to
//! meet this; a substrate that starves earlier clusters will hang.

pub mod board;
pub mod gpu;
pub mod host;

use std::fmt;
use std::time::Duration;

use crate::config::TeamShape;
use crate::error::{ScanError, Stage};
use crate::partition::{PartitionPlan, Partitioned};

use self::gpu::{GpuReadback, GpuScanner};
use self::host::HostScanner;

/// Raw result of a finished dispatch, still padded.
#[derive(Debug, Clone)]
pub struct Completion {
    pub output: Vec<f32>,
    pub device_time: Option<Duration>,
    pub lookback_hops: Option<u64>,
}

/// How the dispatch was shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLayout {
    pub cluster_count: usize,
    pub team: TeamShape,
    /// Groups running at once, when the substrate controls it.
    pub resident_groups: Option<usize>,
}

impl fmt::Display for GroupLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} clusters x {} workers x {} elements",
            self.cluster_count, self.team.workers_per_group, self.team.work_per_worker
        )?;
        if let Some(resident) = self.resident_groups {
            write!(f, ", {resident} resident groups")?;
        }
        Ok(())
    }
}

enum Pending {
    Host(flume::Receiver<Result<Completion, ScanError>>),
    Gpu(GpuReadback),
}

/// An in-flight scan.
pub struct Dispatch {
    pending: Pending,
    layout: GroupLayout,
}

impl Dispatch {
    pub(crate) fn host(receiver: flume::Receiver<Result<Completion, ScanError>>, layout: GroupLayout) -> Self {
        Self {
            pending: Pending::Host(receiver),
            layout,
        }
    }

    pub(crate) fn gpu(readback: GpuReadback, layout: GroupLayout) -> Self {
        Self {
            pending: Pending::Gpu(readback),
            layout,
        }
    }

    pub fn layout(&self) -> GroupLayout {
        self.layout
    }

    /// Waits for every group to finish.
    pub async fn wait(self) -> Result<Completion, ScanError> {
        match self.pending {
            Pending::Host(receiver) => receiver.recv_async().await.map_err(|_| {
                ScanError::substrate(Stage::Dispatch, "dispatch thread exited without reporting")
            })?,
            Pending::Gpu(readback) => readback.wait().await,
        }
    }
}

pub enum Backend {
    Host(HostScanner),
    Gpu(GpuScanner),
}

impl Backend {
    pub fn team(&self) -> TeamShape {
        match self {
            Backend::Host(scanner) => scanner.team(),
            Backend::Gpu(scanner) => scanner.team(),
        }
    }

    pub async fn dispatch(&self, plan: &PartitionPlan, parts: Partitioned) -> Result<Dispatch, ScanError> {
        match self {
            Backend::Host(scanner) => scanner.dispatch(plan, parts),
            Backend::Gpu(scanner) => scanner.dispatch(plan, parts).await,
        }
    }
}
