use std::time::Instant;

use crate::collect::{collect, ScanReport};
use crate::config::ScanConfig;
use crate::device::{ComputeResource, ResourceKind};
use crate::error::ScanError;
use crate::partition::PartitionPlan;
use crate::scan::gpu::GpuScanner;
use crate::scan::host::HostScanner;
use crate::scan::Backend;

/// Inclusive prefix sums on one compute resource.
pub struct Engine {
    backend: Backend,
    resource: String,
}

impl Engine {
    pub async fn new(resource: ComputeResource, config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;

        let backend = match resource.kind {
            ResourceKind::Adapter(adapter) => Backend::Gpu(GpuScanner::new(&adapter, config.team).await?),
            ResourceKind::Host => Backend::Host(HostScanner::new(&config)),
        };

        tracing::debug!(resource = %resource.capabilities.name, team = ?config.team, "engine ready");

        Ok(Self {
            backend,
            resource: resource.capabilities.name,
        })
    }

    /// An engine on the host worker pool, needing no device.
    pub fn host(config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;

        Ok(Self {
            backend: Backend::Host(HostScanner::new(&config)),
            resource: ComputeResource::host(config.resident_host_groups()).capabilities.name,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub async fn prefix_sum(&self, input: &[f32]) -> Result<ScanReport, ScanError> {
        self.prefix_sum_since(input, Instant::now()).await
    }

    /// Like [`Engine::prefix_sum`], but host time is measured from `started`,
    /// so callers can include device acquisition and program build.
    pub async fn prefix_sum_since(&self, input: &[f32], started: Instant) -> Result<ScanReport, ScanError> {
        let plan = PartitionPlan::new(input.len(), self.backend.team().cluster_size());
        if plan.is_empty() {
            return Ok(ScanReport::empty(started));
        }

        tracing::debug!(
            len = plan.len(),
            padded = plan.padded_len(),
            clusters = plan.cluster_count(),
            "partitioned input"
        );

        let dispatch = self.backend.dispatch(&plan, plan.partition(input)).await?;
        collect(dispatch, &plan, started).await
    }

    /// Same as [`Engine::prefix_sum`], blocking the calling thread.
    pub fn prefix_sum_blocking(&self, input: &[f32]) -> Result<ScanReport, ScanError> {
        futures::executor::block_on(self.prefix_sum(input))
    }
}
