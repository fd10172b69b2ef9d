//! Compute resource discovery and ranking.
//!
//! Every resource gets a score of `class_penalty + locality_penalty`; lower is
//! better. A discrete accelerator with its own memory scores 0, an integrated
//! one 1, and a CPU-class resource sharing host memory 2.

use std::num::NonZeroUsize;

use crate::error::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Accelerator,
    General,
}

/// Read-only capability descriptor used for ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub name: String,
    pub class: DeviceClass,
    /// Device and host share physical memory.
    pub unified_memory: bool,
}

impl DeviceCapabilities {
    pub fn score(&self) -> u8 {
        let class_penalty = match self.class {
            DeviceClass::Accelerator => 0,
            DeviceClass::General => 1,
        };
        let locality_penalty = u8::from(self.unified_memory);

        class_penalty + locality_penalty
    }

    fn from_adapter_info(info: &wgpu::AdapterInfo) -> Self {
        let (class, unified_memory) = match info.device_type {
            wgpu::DeviceType::DiscreteGpu => (DeviceClass::Accelerator, false),
            wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu => {
                (DeviceClass::Accelerator, true)
            }
            wgpu::DeviceType::Cpu | wgpu::DeviceType::Other => (DeviceClass::General, true),
        };

        Self {
            name: format!("{} ({:?})", info.name, info.backend),
            class,
            unified_memory,
        }
    }
}

pub trait Ranked {
    fn capabilities(&self) -> &DeviceCapabilities;
}

impl Ranked for DeviceCapabilities {
    fn capabilities(&self) -> &DeviceCapabilities {
        self
    }
}

pub enum ResourceKind {
    Adapter(wgpu::Adapter),
    Host,
}

/// A compute resource the scan can run on.
pub struct ComputeResource {
    pub capabilities: DeviceCapabilities,
    pub kind: ResourceKind,
}

impl ComputeResource {
    /// The built-in host worker pool.
    pub fn host(groups: usize) -> Self {
        Self {
            capabilities: DeviceCapabilities {
                name: format!("host worker pool ({groups} groups)"),
                class: DeviceClass::General,
                unified_memory: true,
            },
            kind: ResourceKind::Host,
        }
    }

    pub fn name(&self) -> &str {
        &self.capabilities.name
    }
}

impl Ranked for ComputeResource {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Discovery {
    pub include_gpu: bool,
    pub host_groups: Option<NonZeroUsize>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            include_gpu: true,
            host_groups: None,
        }
    }
}

/// Lists wgpu adapters followed by the host worker pool.
pub fn enumerate(discovery: Discovery) -> Vec<ComputeResource> {
    let mut resources = Vec::new();

    if discovery.include_gpu {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        for adapter in instance.enumerate_adapters(wgpu::Backends::all()) {
            let capabilities = DeviceCapabilities::from_adapter_info(&adapter.get_info());
            tracing::debug!(name = %capabilities.name, score = capabilities.score(), "found adapter");
            resources.push(ComputeResource {
                capabilities,
                kind: ResourceKind::Adapter(adapter),
            });
        }
    }

    let groups = discovery
        .host_groups
        .or_else(|| std::thread::available_parallelism().ok())
        .map_or(1, NonZeroUsize::get);
    resources.push(ComputeResource::host(groups));

    resources
}

/// Orders resources from most to least desirable. Equal scores keep their
/// enumeration order.
pub fn rank<R: Ranked>(resources: &mut [R]) {
    resources.sort_by_key(|r| r.capabilities().score());
}

/// Returns the resource at `rank` after ranking.
pub fn select<R: Ranked>(mut resources: Vec<R>, rank_index: usize) -> Result<R, ScanError> {
    if resources.is_empty() {
        return Err(ScanError::NoResources);
    }

    let available = resources.len();
    if rank_index >= available {
        return Err(ScanError::RankOutOfRange {
            rank: rank_index,
            available,
        });
    }

    rank(&mut resources);
    Ok(resources.swap_remove(rank_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(name: &str, class: DeviceClass, unified_memory: bool) -> DeviceCapabilities {
        DeviceCapabilities {
            name: name.into(),
            class,
            unified_memory,
        }
    }

    #[test]
    fn scores() {
        assert_eq!(caps("dgpu", DeviceClass::Accelerator, false).score(), 0);
        assert_eq!(caps("igpu", DeviceClass::Accelerator, true).score(), 1);
        assert_eq!(caps("cpu", DeviceClass::General, true).score(), 2);
    }

    #[test]
    fn discrete_accelerator_ranks_ahead_of_cpu() -> anyhow::Result<()> {
        let devices = vec![
            caps("cpu", DeviceClass::General, true),
            caps("dgpu", DeviceClass::Accelerator, false),
        ];

        assert_eq!(select(devices.clone(), 0)?.name, "dgpu");
        assert_eq!(select(devices, 1)?.name, "cpu");

        Ok(())
    }

    #[test]
    fn full_ordering_is_stable() {
        let mut devices = vec![
            caps("cpu-a", DeviceClass::General, true),
            caps("igpu", DeviceClass::Accelerator, true),
            caps("cpu-b", DeviceClass::General, true),
            caps("dgpu", DeviceClass::Accelerator, false),
        ];
        rank(&mut devices);

        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["dgpu", "igpu", "cpu-a", "cpu-b"]);
    }

    #[test]
    fn empty_set_fails() {
        let devices: Vec<DeviceCapabilities> = vec![];
        assert!(matches!(select(devices, 0), Err(ScanError::NoResources)));
    }

    #[test]
    fn rank_out_of_range_fails() {
        let devices = vec![caps("cpu", DeviceClass::General, true)];
        assert!(matches!(
            select(devices, 1),
            Err(ScanError::RankOutOfRange { rank: 1, available: 1 })
        ));
    }

    #[test]
    fn adapter_types_map_to_capabilities() {
        let mut info = wgpu::AdapterInfo {
            name: "card".into(),
            vendor: 0,
            device: 0,
            device_type: wgpu::DeviceType::DiscreteGpu,
            driver: String::new(),
            driver_info: String::new(),
            backend: wgpu::Backend::Vulkan,
        };
        assert_eq!(DeviceCapabilities::from_adapter_info(&info).score(), 0);

        info.device_type = wgpu::DeviceType::IntegratedGpu;
        assert_eq!(DeviceCapabilities::from_adapter_info(&info).score(), 1);

        info.device_type = wgpu::DeviceType::Cpu;
        assert_eq!(DeviceCapabilities::from_adapter_info(&info).score(), 2);
    }

    #[test]
    fn host_pool_is_always_listed() {
        let resources = enumerate(Discovery {
            include_gpu: false,
            host_groups: NonZeroUsize::new(2),
        });
        assert_eq!(resources.len(), 1);
        assert!(matches!(resources[0].kind, ResourceKind::Host));
        assert_eq!(resources[0].capabilities.score(), 2);
    }
}
