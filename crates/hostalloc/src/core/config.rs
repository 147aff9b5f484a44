//! Allocator configuration.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::common::{CapacityKind, ClusterId};
use crate::core::error::{Error, Result};
use crate::core::inventory::Inventory;

/// Cluster detail holding the CPU overcommit ratio.
pub const CPU_OVERCOMMIT_RATIO: &str = "cpuOvercommitRatio";
/// Cluster detail holding the memory overcommit ratio.
pub const MEMORY_OVERCOMMIT_RATIO: &str = "memoryOvercommitRatio";

/// Host ranking strategy applied before hosts are checked for capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationAlgorithm {
    /// Uniform shuffle.
    Random,
    /// Keeps the inventory order.
    FirstFit,
    /// Ascending number of the requesting account's running guests per host.
    UserDispersing,
    /// Descending free capacity of the configured resource kind.
    FirstFitLeastConsumed,
    /// Legacy alias of `Random`.
    UserConcentratedPodRandom,
    /// Legacy alias of `FirstFit`.
    UserConcentratedPodFirstFit,
}

impl FromStr for AllocationAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(AllocationAlgorithm::Random),
            "firstfit" => Ok(AllocationAlgorithm::FirstFit),
            "userdispersing" => Ok(AllocationAlgorithm::UserDispersing),
            "firstfitleastconsumed" => Ok(AllocationAlgorithm::FirstFitLeastConsumed),
            "userconcentratedpod_random" => Ok(AllocationAlgorithm::UserConcentratedPodRandom),
            "userconcentratedpod_firstfit" => Ok(AllocationAlgorithm::UserConcentratedPodFirstFit),
            _ => Err(Error::Configuration(format!("unknown allocation algorithm: {}", s))),
        }
    }
}

impl Display for AllocationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AllocationAlgorithm::Random => "random",
            AllocationAlgorithm::FirstFit => "firstfit",
            AllocationAlgorithm::UserDispersing => "userdispersing",
            AllocationAlgorithm::FirstFitLeastConsumed => "firstfitleastconsumed",
            AllocationAlgorithm::UserConcentratedPodRandom => "userconcentratedpod_random",
            AllocationAlgorithm::UserConcentratedPodFirstFit => "userconcentratedpod_firstfit",
        };
        write!(f, "{}", s)
    }
}

/// YAML representation of allocator config, every key is optional.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
pub struct AllocatorConfigRaw {
    /// name of host ranking strategy
    pub allocation_algorithm: Option<String>,
    /// check HVM support of hosts for templates requiring it
    pub check_hvm: Option<bool>,
    /// resource kind used by firstfitleastconsumed ordering, CPU or RAM
    pub capacity_order_resource: Option<String>,
    /// stopped guests stop counting towards static capacity after this many seconds
    pub stopped_vm_skip_window: Option<f64>,
    /// destroyed guests stop counting towards static capacity after this many seconds
    pub destroyed_vm_skip_window: Option<f64>,
    /// seed of the random generator used for shuffling hosts and picking pods
    pub random_seed: Option<u64>,
}

/// Allocator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorConfig {
    /// host ranking strategy
    pub allocation_algorithm: AllocationAlgorithm,
    /// check HVM support of hosts for templates requiring it
    pub check_hvm: bool,
    /// resource kind used by firstfitleastconsumed ordering
    pub capacity_order_resource: CapacityKind,
    /// stopped guests stop counting towards static capacity after this many seconds
    pub stopped_vm_skip_window: f64,
    /// destroyed guests stop counting towards static capacity after this many seconds
    pub destroyed_vm_skip_window: f64,
    /// seed of the random generator used for shuffling hosts and picking pods
    pub random_seed: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            allocation_algorithm: AllocationAlgorithm::Random,
            check_hvm: true,
            capacity_order_resource: CapacityKind::Cpu,
            stopped_vm_skip_window: 86400.,
            destroyed_vm_skip_window: 0.,
            random_seed: 123,
        }
    }
}

impl AllocatorConfig {
    /// Reads config from YAML file, missing keys take default values.
    pub fn from_file(file_name: &str) -> Result<Self> {
        let text = std::fs::read_to_string(file_name)
            .map_err(|e| Error::Configuration(format!("can't read file {}: {}", file_name, e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parses config from YAML document, missing keys take default values.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: AllocatorConfigRaw =
            serde_yaml::from_str(text).map_err(|e| Error::Configuration(format!("can't parse YAML: {}", e)))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: AllocatorConfigRaw) -> Result<Self> {
        let default = Self::default();
        let allocation_algorithm = match raw.allocation_algorithm {
            Some(name) => name.parse()?,
            None => default.allocation_algorithm,
        };
        let capacity_order_resource = match raw.capacity_order_resource {
            Some(name) => name.parse()?,
            None => default.capacity_order_resource,
        };
        let stopped_vm_skip_window = raw.stopped_vm_skip_window.unwrap_or(default.stopped_vm_skip_window);
        let destroyed_vm_skip_window = raw.destroyed_vm_skip_window.unwrap_or(default.destroyed_vm_skip_window);
        if stopped_vm_skip_window < 0. || destroyed_vm_skip_window < 0. {
            return Err(Error::Configuration("skip windows must be non-negative".to_string()));
        }
        Ok(Self {
            allocation_algorithm,
            check_hvm: raw.check_hvm.unwrap_or(default.check_hvm),
            capacity_order_resource,
            stopped_vm_skip_window,
            destroyed_vm_skip_window,
            random_seed: raw.random_seed.unwrap_or(default.random_seed),
        })
    }
}

/// CPU and memory overcommit ratios of a cluster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OvercommitRatios {
    pub cpu: f64,
    pub memory: f64,
}

impl OvercommitRatios {
    /// Reads cluster ratios from cluster details.
    ///
    /// Absent, unparseable or below 1.0 values are configuration errors and never fall back to a default.
    pub fn for_cluster(inventory: &dyn Inventory, cluster_id: ClusterId) -> Result<Self> {
        Ok(Self {
            cpu: parse_ratio(
                cluster_id,
                CPU_OVERCOMMIT_RATIO,
                inventory.cluster_detail(cluster_id, CPU_OVERCOMMIT_RATIO),
            )?,
            memory: parse_ratio(
                cluster_id,
                MEMORY_OVERCOMMIT_RATIO,
                inventory.cluster_detail(cluster_id, MEMORY_OVERCOMMIT_RATIO),
            )?,
        })
    }
}

fn parse_ratio(cluster_id: ClusterId, name: &str, value: Option<String>) -> Result<f64> {
    let value =
        value.ok_or_else(|| Error::Configuration(format!("{} is not set for cluster {}", name, cluster_id)))?;
    let ratio = value.trim().parse::<f64>().map_err(|_| {
        Error::Configuration(format!("can't parse {} = {:?} of cluster {}", name, value, cluster_id))
    })?;
    if !(ratio >= 1.) {
        return Err(Error::Configuration(format!(
            "{} of cluster {} must be at least 1.0, got {}",
            name, cluster_id, ratio
        )));
    }
    Ok(ratio)
}
