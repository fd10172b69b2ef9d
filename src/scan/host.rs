//! Host backend: execution groups are threads in a fixed pool.
//!
//! Groups claim clusters in ascending order from a shared ticket, so the owner
//! of every predecessor is already running when a group starts looking back.
//! That is what keeps the busy-wait live without any cross-group blocking.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::config::{ScanConfig, TeamShape};
use crate::error::{ScanError, Stage};
use crate::partition::{ClusterStatus, PartitionPlan, Partitioned};
use crate::scan::board::ClusterBoard;
use crate::scan::{Completion, Dispatch, GroupLayout};

const YIELD_EVERY: u64 = 64;

pub struct HostScanner {
    team: TeamShape,
    groups: usize,
    spin_limit: Option<u64>,
}

impl HostScanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            team: config.team,
            groups: config.resident_host_groups(),
            spin_limit: config.spin_limit,
        }
    }

    pub fn team(&self) -> TeamShape {
        self.team
    }

    /// Launches every cluster of `parts` on the pool and returns immediately.
    pub fn dispatch(&self, plan: &PartitionPlan, parts: Partitioned) -> Result<Dispatch, ScanError> {
        let resident = self.groups.min(plan.cluster_count()).max(1);
        let layout = GroupLayout {
            cluster_count: plan.cluster_count(),
            team: self.team,
            resident_groups: Some(resident),
        };

        let (sender, receiver) = flume::bounded(1);
        let team = self.team;
        let spin_limit = self.spin_limit;

        tracing::debug!(clusters = plan.cluster_count(), resident, "host dispatch");

        std::thread::Builder::new()
            .name("lookback-dispatch".into())
            .spawn(move || {
                let _ = sender.send(run_groups(parts, team, resident, spin_limit));
            })
            .map_err(|err| ScanError::substrate(Stage::Dispatch, err))?;

        Ok(Dispatch::host(receiver, layout))
    }
}

fn run_groups(
    parts: Partitioned,
    team: TeamShape,
    groups: usize,
    spin_limit: Option<u64>,
) -> Result<Completion, ScanError> {
    let Partitioned { padded, status } = parts;

    let board = ClusterBoard::new(&status);
    let output: Vec<AtomicU32> = padded.iter().map(|_| AtomicU32::new(0)).collect();
    let next_cluster = AtomicUsize::new(0);
    let hops = AtomicU64::new(0);

    let started = Instant::now();

    let results = std::thread::scope(|s| {
        let mut handles = Vec::with_capacity(groups);
        let mut results = Vec::new();

        for index in 0..groups {
            let group = Group {
                input: &padded,
                output: &output,
                board: &board,
                team,
                spin_limit,
            };
            let next_cluster = &next_cluster;
            let hops = &hops;

            let spawned = std::thread::Builder::new()
                .name(format!("lookback-group-{index}"))
                .spawn_scoped(s, move || group.run(next_cluster, hops));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    board.poison();
                    results.push(Err(ScanError::substrate(Stage::Dispatch, err)));
                    break;
                }
            }
        }

        for handle in handles {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(ScanError::substrate(Stage::Dispatch, "execution group panicked")));
            results.push(result);
        }

        results
    });

    let device_time = started.elapsed();

    // Report the root cause rather than the groups it took down with it.
    let mut aborted = None;
    for result in results {
        match result {
            Ok(()) => {}
            Err(err @ ScanError::Aborted { .. }) => {
                aborted.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    if let Some(err) = aborted {
        return Err(err);
    }

    Ok(Completion {
        output: output
            .into_iter()
            .map(|slot| f32::from_bits(slot.into_inner()))
            .collect(),
        device_time: Some(device_time),
        lookback_hops: Some(hops.into_inner()),
    })
}

/// One execution group's view of the shared state.
struct Group<'a> {
    input: &'a [f32],
    output: &'a [AtomicU32],
    board: &'a ClusterBoard,
    team: TeamShape,
    spin_limit: Option<u64>,
}

impl Group<'_> {
    fn run(&self, next_cluster: &AtomicUsize, hops: &AtomicU64) -> Result<(), ScanError> {
        let _guard = PoisonOnPanic(self.board);
        let mut scratch = TeamScratch::new(self.team);

        loop {
            let cluster = next_cluster.fetch_add(1, Ordering::Relaxed);
            if cluster >= self.board.len() {
                return Ok(());
            }

            match self.scan_cluster(cluster, &mut scratch) {
                Ok(walked) => {
                    hops.fetch_add(walked, Ordering::Relaxed);
                }
                Err(err) => {
                    self.board.poison();
                    return Err(err);
                }
            }
        }
    }

    /// Runs the full protocol for one cluster and returns the number of
    /// predecessors visited during look-back.
    fn scan_cluster(&self, cluster: usize, scratch: &mut TeamScratch) -> Result<u64, ScanError> {
        let size = self.team.cluster_size();
        let start = cluster * size;

        let aggregate = scratch.local_scan(&self.input[start..start + size]);

        let (prefix, walked) = if cluster == 0 {
            self.board.publish_base(0, aggregate);
            (0.0, 0)
        } else {
            self.board.publish_aggregate(cluster, aggregate);
            let (prefix, walked) = self.look_back(cluster)?;
            self.board.publish_prefix(cluster, prefix);
            (prefix, walked)
        };

        for (slot, &sum) in self.output[start..start + size].iter().zip(&scratch.sums) {
            slot.store((prefix + sum).to_bits(), Ordering::Relaxed);
        }

        tracing::trace!(cluster, walked, "cluster scanned");
        Ok(walked)
    }

    /// Resolves the exclusive prefix of `cluster`.
    ///
    /// Walks back to the nearest predecessor with a published prefix, then adds
    /// the aggregates from that point upward. The sum is always composed low to
    /// high, so the result does not depend on where the walk happened to stop.
    fn look_back(&self, cluster: usize) -> Result<(f32, u64), ScanError> {
        let mut base = cluster - 1;
        while self.await_published(cluster, base)? != ClusterStatus::PrefixReady {
            base -= 1;
        }

        let mut prefix = self.board.prefix(base);
        for predecessor in base..cluster {
            prefix += self.board.aggregate(predecessor);
        }

        Ok((prefix, (cluster - base) as u64))
    }

    /// Polls `predecessor` until it leaves `Pending`. Cluster 0 never stops at
    /// `AggregateReady`, so for it we wait for the prefix.
    fn await_published(&self, cluster: usize, predecessor: usize) -> Result<ClusterStatus, ScanError> {
        let needed = if predecessor == 0 {
            ClusterStatus::PrefixReady
        } else {
            ClusterStatus::AggregateReady
        };

        let mut spins = 0u64;
        loop {
            let status = self.board.status(predecessor);
            if status >= needed {
                return Ok(status);
            }
            if self.board.is_poisoned() {
                return Err(ScanError::Aborted { cluster });
            }

            spins += 1;
            if self.spin_limit.is_some_and(|limit| spins >= limit) {
                return Err(ScanError::Stalled {
                    cluster,
                    waiting_on: predecessor,
                    spins,
                });
            }

            if spins % YIELD_EVERY == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

struct PoisonOnPanic<'a>(&'a ClusterBoard);

impl Drop for PoisonOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.poison();
        }
    }
}

/// Per-group working memory for the team-local scan.
struct TeamScratch {
    work_per_worker: usize,
    sums: Vec<f32>,
    worker_offsets: Vec<f32>,
}

impl TeamScratch {
    fn new(team: TeamShape) -> Self {
        Self {
            work_per_worker: team.work_per_worker as usize,
            sums: vec![0.0; team.cluster_size()],
            worker_offsets: vec![0.0; team.workers_per_group as usize],
        }
    }

    /// Inclusive scan of one cluster, leaving the per-element sums in `sums`
    /// and returning the cluster aggregate.
    fn local_scan(&mut self, values: &[f32]) -> f32 {
        let run = self.work_per_worker;

        // Each worker forms a running sum over its own run.
        for ((src, dst), total) in values
            .chunks(run)
            .zip(self.sums.chunks_mut(run))
            .zip(self.worker_offsets.iter_mut())
        {
            let mut running = 0.0f32;
            for (&x, sum) in src.iter().zip(dst.iter_mut()) {
                running += x;
                *sum = running;
            }
            *total = running;
        }

        // Team barrier, then worker 0 turns the totals into offsets.
        let mut aggregate = 0.0f32;
        for offset in self.worker_offsets.iter_mut() {
            let total = *offset;
            *offset = aggregate;
            aggregate += total;
        }

        for (dst, &offset) in self.sums.chunks_mut(run).zip(&self.worker_offsets) {
            for sum in dst {
                *sum = offset + *sum;
            }
        }

        aggregate
    }
}
