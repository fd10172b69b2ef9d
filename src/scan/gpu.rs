use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use wgpu::util::DeviceExt;

use crate::config::TeamShape;
use crate::error::{ScanError, Stage};
use crate::partition::{ClusterStatus, PartitionPlan, Partitioned};
use crate::scan::{Completion, Dispatch, GroupLayout};

const KERNEL_SOURCE: &str = include_str!("../kernels/lookback_scan.wgsl");

/// Board word of a cluster that has published nothing yet.
const PENDING_BITS: u32 = 0xffff_ffff;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    cluster_count: u32,
    _padding: [u32; 3],
}

pub struct GpuScanner {
    device: Arc<wgpu::Device>,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    team: TeamShape,
    timestamps: bool,
}

impl GpuScanner {
    pub async fn new(adapter: &wgpu::Adapter, team: TeamShape) -> Result<Self, ScanError> {
        let limits = adapter.limits();
        if team.workers_per_group > limits.max_compute_invocations_per_workgroup
            || team.workers_per_group > limits.max_compute_workgroup_size_x
        {
            return Err(ScanError::InvalidConfig(format!(
                "adapter supports at most {} invocations per workgroup, team needs {}",
                limits.max_compute_invocations_per_workgroup, team.workers_per_group
            )));
        }

        let timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("lookback device"),
                    required_features,
                    required_limits: limits,
                },
                None,
            )
            .await
            .map_err(|err| ScanError::substrate(Stage::Context, err))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("kernels/lookback_scan.wgsl"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(kernel_source(team))),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("lookback_scan layout"),
            entries: &[
                uniform_layout_entry(0),
                storage_layout_entry(1, true),
                storage_layout_entry(2, false),
                storage_layout_entry(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("lookback_scan"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: "main",
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(ScanError::substrate(Stage::ProgramBuild, err));
        }

        Ok(Self {
            device: Arc::new(device),
            queue,
            pipeline,
            bind_group_layout,
            team,
            timestamps,
        })
    }

    pub fn team(&self) -> TeamShape {
        self.team
    }

    pub async fn dispatch(&self, plan: &PartitionPlan, parts: Partitioned) -> Result<Dispatch, ScanError> {
        let Partitioned { mut padded, status } = parts;

        let cluster_count = u32::try_from(plan.cluster_count())
            .map_err(|_| ScanError::substrate(Stage::Allocate, "cluster count exceeds u32"))?;

        // An all-ones NaN payload would read back as PENDING.
        for value in padded.iter_mut().filter(|v| v.is_nan()) {
            *value = f32::NAN;
        }

        let words = board_words(&status);
        let value_bytes = std::mem::size_of_val(padded.as_slice()) as u64;
        let board_bytes = std::mem::size_of_val(words.as_slice()) as u64;

        let limits = self.device.limits();
        let max_binding = u64::from(limits.max_storage_buffer_binding_size);
        if value_bytes > max_binding || board_bytes > max_binding {
            return Err(ScanError::substrate(
                Stage::Allocate,
                format!("{value_bytes} byte input exceeds the {max_binding} byte storage binding limit"),
            ));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lookback_scan/params"),
            contents: bytemuck::bytes_of(&KernelParams {
                cluster_count,
                _padding: [0; 3],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let values_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lookback_scan/values"),
            contents: bytemuck::cast_slice(&padded),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let board_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lookback_scan/board"),
            contents: bytemuck::cast_slice(&words),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let sums_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lookback_scan/sums"),
            size: value_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging buffer"),
            size: value_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let timer = self.timestamps.then(|| Timer::new(&self.device));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.bind_group_layout,
            entries: &[
                buffer_binding(0, &params_buffer),
                buffer_binding(1, &values_buffer),
                buffer_binding(2, &board_buffer),
                buffer_binding(3, &sums_buffer),
            ],
        });

        if let Some(err) = self.device.pop_error_scope().await {
            return Err(ScanError::substrate(Stage::Upload, err));
        }
        if let Some(err) = self.device.pop_error_scope().await {
            return Err(ScanError::substrate(Stage::Allocate, err));
        }

        let (groups_x, groups_y) = grid(cluster_count, limits.max_compute_workgroups_per_dimension);

        tracing::debug!(clusters = cluster_count, groups_x, groups_y, "gpu dispatch");

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("lookback_scan encoder"),
        });

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("lookback_scan pass"),
                timestamp_writes: timer.as_ref().map(Timer::pass_writes),
            });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.insert_debug_marker("lookback_scan dispatch");
            cpass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        encoder.copy_buffer_to_buffer(&sums_buffer, 0, &staging_buffer, 0, value_bytes);
        if let Some(timer) = &timer {
            timer.resolve(&mut encoder);
        }

        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = self.device.pop_error_scope().await {
            return Err(ScanError::substrate(Stage::Dispatch, err));
        }

        let period = self.queue.get_timestamp_period();
        let readback = GpuReadback {
            device: self.device.clone(),
            output: MappedReadback::new(staging_buffer),
            timer: timer.map(|timer| (MappedReadback::new(timer.staging), period)),
        };

        let layout = GroupLayout {
            cluster_count: plan.cluster_count(),
            team: self.team,
            resident_groups: None,
        };

        Ok(Dispatch::gpu(readback, layout))
    }
}

/// Pending copies of the scan output (and timestamps) back to the host.
pub struct GpuReadback {
    device: Arc<wgpu::Device>,
    output: MappedReadback,
    timer: Option<(MappedReadback, f32)>,
}

impl GpuReadback {
    pub async fn wait(self) -> Result<Completion, ScanError> {
        self.device.poll(wgpu::Maintain::wait()).panic_on_timeout();

        let output: Vec<f32> = self.output.read().await?;

        let device_time = match self.timer {
            Some((stamps, period)) => {
                let stamps: Vec<u64> = stamps.read().await?;
                let ticks = stamps[1].saturating_sub(stamps[0]);
                Some(Duration::from_nanos((ticks as f64 * f64::from(period)) as u64))
            }
            None => None,
        };

        Ok(Completion {
            output,
            device_time,
            lookback_hops: None,
        })
    }
}

struct MappedReadback {
    buffer: wgpu::Buffer,
    mapped: flume::Receiver<Result<(), wgpu::BufferAsyncError>>,
}

impl MappedReadback {
    /// Requests a mapping; must be called after the copy into `buffer` is submitted.
    fn new(buffer: wgpu::Buffer) -> Self {
        let (sender, receiver) = flume::bounded(1);
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |v| {
            let _ = sender.send(v);
        });

        Self {
            buffer,
            mapped: receiver,
        }
    }

    async fn read<T: bytemuck::Pod>(self) -> Result<Vec<T>, ScanError> {
        self.mapped
            .recv_async()
            .await
            .map_err(|err| ScanError::substrate(Stage::Readback, err))?
            .map_err(|err| ScanError::substrate(Stage::Readback, err))?;

        let data = self.buffer.slice(..).get_mapped_range();
        let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();

        drop(data);
        self.buffer.unmap();

        Ok(result)
    }
}

struct Timer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    staging: wgpu::Buffer,
}

impl Timer {
    const BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

    fn new(device: &wgpu::Device) -> Self {
        Self {
            query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("lookback_scan timestamps"),
                ty: wgpu::QueryType::Timestamp,
                count: 2,
            }),
            resolve: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("lookback_scan/timestamps"),
                size: Self::BYTES,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            staging: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("timestamp staging buffer"),
                size: Self::BYTES,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        }
    }

    fn pass_writes(&self) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_set, 0..2, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, &self.staging, 0, Self::BYTES);
    }
}

fn kernel_source(team: TeamShape) -> String {
    KERNEL_SOURCE
        .replace("{{WORKERS_PER_GROUP}}", &team.workers_per_group.to_string())
        .replace("{{WORK_PER_WORKER}}", &team.work_per_worker.to_string())
}

/// Ticket word followed by the aggregate words, then the prefix words.
fn board_words(status: &[ClusterStatus]) -> Vec<u32> {
    debug_assert!(
        status.iter().all(|&s| s == ClusterStatus::Pending),
        "a fresh dispatch starts with every cluster pending"
    );

    let mut words = Vec::with_capacity(1 + 2 * status.len());
    words.push(0);
    words.extend(std::iter::repeat(PENDING_BITS).take(2 * status.len()));
    words
}

/// Splits `groups` workgroups over x and y when x alone is too small.
fn grid(groups: u32, max_per_dimension: u32) -> (u32, u32) {
    if groups <= max_per_dimension {
        (groups, 1)
    } else {
        (max_per_dimension, groups.div_ceil(max_per_dimension))
    }
}

fn storage_layout_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn buffer_binding(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand_xoshiro::{rand_core::SeedableRng, Xoshiro256PlusPlus};

    use super::*;
    use crate::config::ScanConfig;
    use crate::device::{self, Discovery, ResourceKind};
    use crate::scan::host::HostScanner;
    use crate::tests::{assert_slices_eq, reference_scan};

    async fn gpu_scanner(team: TeamShape) -> anyhow::Result<Option<GpuScanner>> {
        let resources = device::enumerate(Discovery::default());
        let Some(adapter) = resources.iter().find_map(|r| match &r.kind {
            ResourceKind::Adapter(adapter) => Some(adapter),
            ResourceKind::Host => None,
        }) else {
            println!("no GPU adapter, skipping");
            return Ok(None);
        };

        match GpuScanner::new(adapter, team).await {
            Ok(scanner) => Ok(Some(scanner)),
            Err(ScanError::Substrate { stage: Stage::Context, detail }) => {
                println!("device unavailable ({detail}), skipping");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn scan(scanner: &GpuScanner, input: &[f32]) -> anyhow::Result<Vec<f32>> {
        let plan = PartitionPlan::new(input.len(), scanner.team().cluster_size());
        let completion = scanner.dispatch(&plan, plan.partition(input)).await?.wait().await?;
        Ok(completion.output)
    }

    #[test]
    fn kernel_source_has_no_placeholders() {
        let source = kernel_source(TeamShape::new(8, 4));
        assert!(!source.contains("{{"));
        assert!(source.contains("const WORKERS: u32 = 8u;"));
        assert!(source.contains("const WORK_PER_WORKER: u32 = 4u;"));
    }

    #[test]
    fn board_starts_with_ticket_then_pending_words() {
        let words = board_words(&[ClusterStatus::Pending; 3]);
        assert_eq!(words.len(), 7);
        assert_eq!(words[0], 0);
        assert!(words[1..].iter().all(|&w| w == PENDING_BITS));
    }

    #[test]
    fn pending_bits_are_not_canonical_nan() {
        assert!(f32::from_bits(PENDING_BITS).is_nan());
        assert_ne!(f32::NAN.to_bits(), PENDING_BITS);
        assert_ne!((-f32::NAN).to_bits(), PENDING_BITS);
    }

    #[test]
    fn grid_splits_large_dispatches() {
        assert_eq!(grid(10, 65535), (10, 1));
        assert_eq!(grid(65535, 65535), (65535, 1));
        assert_eq!(grid(65536, 65535), (65535, 2));
        assert_eq!(grid(200_000, 65535), (65535, 4));
    }

    #[tokio::test]
    async fn trivial_input_works() -> anyhow::Result<()> {
        let Some(scanner) = gpu_scanner(TeamShape::default()).await? else {
            return Ok(());
        };

        assert_eq!(&scan(&scanner, &[3.0]).await?[..1], &[3.0]);
        assert_eq!(&scan(&scanner, &[1.0, 2.0, 3.0, 4.0, 5.0]).await?[..5], &[1.0, 3.0, 6.0, 10.0, 15.0]);
        assert_eq!(&scan(&scanner, &[-1.0, 1.0, 2.0]).await?[..3], &[-1.0, 0.0, 2.0]);

        Ok(())
    }

    #[tokio::test]
    async fn long_sum_matches_host() -> anyhow::Result<()> {
        let team = TeamShape::new(8, 4);
        let Some(scanner) = gpu_scanner(team).await? else {
            return Ok(());
        };

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let input: Vec<f32> = (0..(1 << 16) + 5).map(|_| rng.gen_range(-4..=4) as f32).collect();

        let result = scan(&scanner, &input).await?;
        assert_slices_eq(&result[..input.len()], &reference_scan(&input));

        let config = ScanConfig::default().with_team(team);
        let plan = PartitionPlan::new(input.len(), team.cluster_size());
        let host = HostScanner::new(&config)
            .dispatch(&plan, plan.partition(&input))?
            .wait()
            .await?;
        assert_slices_eq(&result, &host.output);

        Ok(())
    }
}
