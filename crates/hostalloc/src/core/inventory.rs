//! Datacenter inventory: zones, pods, clusters and hosts.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::core::common::{ClusterId, DeploymentScope, HostId, HostType, PodId, ZoneId};
use crate::core::tag_filter::TagRule;

#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pod {
    pub id: PodId,
    pub name: String,
    pub zone_id: ZoneId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub zone_id: ZoneId,
    pub pod_id: PodId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostStatus {
    Up,
    Down,
    Disconnected,
    Maintenance,
}

/// GPU device group installed on a host.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuDevice {
    pub group_name: String,
    pub vgpu_type: String,
    /// number of vGPUs of this type that can still be handed out
    pub remaining_capacity: u32,
}

/// Physical host. Read-only for the allocators.
#[derive(Clone, Debug, PartialEq)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub host_type: HostType,
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,
    pub status: HostStatus,
    pub enabled: bool,
    /// reserved for HA restarts, not offered to regular placements
    pub ha_reserved: bool,
    /// comma separated hypervisor capabilities, e.g. "hvm,snapshot"
    pub capabilities: Option<String>,
    pub guest_os_category: Option<String>,
    pub tags: Vec<String>,
    /// tag rule expressions evaluated against offering tags
    pub rule_tags: Vec<String>,
    pub gpus: Vec<GpuDevice>,
}

impl Host {
    /// Creates an up and enabled routing host without tags, capabilities and GPUs.
    pub fn new(id: HostId, name: &str, zone_id: ZoneId, pod_id: PodId, cluster_id: ClusterId) -> Self {
        Self {
            id,
            name: name.to_string(),
            host_type: HostType::Routing,
            zone_id,
            pod_id,
            cluster_id,
            status: HostStatus::Up,
            enabled: true,
            ha_reserved: false,
            capabilities: None,
            guest_os_category: None,
            tags: Vec::new(),
            rule_tags: Vec::new(),
            gpus: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &str) -> Self {
        self.capabilities = Some(capabilities.to_string());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_rule_tag(mut self, rule: &str) -> Self {
        self.rule_tags.push(rule.to_string());
        self
    }

    pub fn with_guest_os_category(mut self, category: &str) -> Self {
        self.guest_os_category = Some(category.to_string());
        self
    }

    pub fn with_gpu(mut self, group_name: &str, vgpu_type: &str, remaining_capacity: u32) -> Self {
        self.gpus.push(GpuDevice {
            group_name: group_name.to_string(),
            vgpu_type: vgpu_type.to_string(),
            remaining_capacity,
        });
        self
    }

    /// Checks whether any capability token mentions HVM.
    pub fn supports_hvm(&self) -> bool {
        self.capabilities
            .as_deref()
            .map_or(false, |caps| caps.split(',').any(|token| token.contains("hvm")))
    }

    /// Up, enabled and not held back for HA.
    pub fn is_available(&self) -> bool {
        self.status == HostStatus::Up && self.enabled && !self.ha_reserved
    }

    pub fn in_scope(&self, scope: &DeploymentScope) -> bool {
        scope.contains(self.zone_id, self.pod_id, self.cluster_id)
    }
}

/// Read access to the datacenter hierarchy.
pub trait Inventory {
    fn find_zone(&self, id: ZoneId) -> Option<Zone>;

    fn find_pod(&self, id: PodId) -> Option<Pod>;

    fn find_cluster(&self, id: ClusterId) -> Option<Cluster>;

    fn find_host(&self, id: HostId) -> Option<Host>;

    fn list_pods(&self, zone_id: ZoneId) -> Vec<Pod>;

    fn list_clusters(&self, scope: &DeploymentScope) -> Vec<Cluster>;

    /// Returns all hosts in scope regardless of their type and state.
    fn list_hosts(&self, scope: &DeploymentScope) -> Vec<Host>;

    /// Returns up and enabled hosts of the given type which are not reserved for HA.
    fn list_up_and_enabled_non_ha_hosts(&self, host_type: HostType, scope: &DeploymentScope) -> Vec<Host>;

    /// Returns a free-form cluster setting, e.g. overcommit ratio.
    fn cluster_detail(&self, cluster_id: ClusterId, name: &str) -> Option<String>;
}

/// Host lookup by tag.
pub trait TagIndex {
    /// Returns up and enabled hosts of the given type in scope carrying exactly this tag.
    fn hosts_with_tag(&self, host_type: HostType, scope: &DeploymentScope, tag: &str) -> Vec<HostId>;

    /// Returns hosts whose tag rules accept the given offering tag, regardless of scope.
    fn hosts_with_rule_matching_offering_tag(&self, offering_tag: &str) -> Vec<HostId>;
}

/// GPU inventory lookup.
pub trait GpuIndex {
    fn is_gpu_available(&self, host_id: HostId, group_name: &str, vgpu_type: &str) -> bool;

    fn is_gpu_enabled(&self, host_id: HostId) -> bool;
}

/// Inventory kept in memory. Hosts are listed in insertion order.
#[derive(Clone, Default)]
pub struct InMemoryInventory {
    zones: BTreeMap<ZoneId, Zone>,
    pods: BTreeMap<PodId, Pod>,
    clusters: BTreeMap<ClusterId, Cluster>,
    hosts: IndexMap<HostId, Host>,
    cluster_details: HashMap<(ClusterId, String), String>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_zone(&mut self, id: ZoneId, name: &str) {
        self.zones.insert(
            id,
            Zone {
                id,
                name: name.to_string(),
            },
        );
    }

    pub fn add_pod(&mut self, id: PodId, name: &str, zone_id: ZoneId) {
        self.pods.insert(
            id,
            Pod {
                id,
                name: name.to_string(),
                zone_id,
            },
        );
    }

    pub fn add_cluster(&mut self, id: ClusterId, name: &str, zone_id: ZoneId, pod_id: PodId) {
        self.clusters.insert(
            id,
            Cluster {
                id,
                name: name.to_string(),
                zone_id,
                pod_id,
            },
        );
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.id, host);
    }

    pub fn host_mut(&mut self, id: HostId) -> Option<&mut Host> {
        self.hosts.get_mut(&id)
    }

    pub fn set_cluster_detail(&mut self, cluster_id: ClusterId, name: &str, value: &str) {
        self.cluster_details
            .insert((cluster_id, name.to_string()), value.to_string());
    }

    /// Shortcut for setting both overcommit ratios of a cluster.
    pub fn set_overcommit_ratios(&mut self, cluster_id: ClusterId, cpu: f64, memory: f64) {
        self.set_cluster_detail(cluster_id, crate::core::config::CPU_OVERCOMMIT_RATIO, &cpu.to_string());
        self.set_cluster_detail(cluster_id, crate::core::config::MEMORY_OVERCOMMIT_RATIO, &memory.to_string());
    }
}

impl Inventory for InMemoryInventory {
    fn find_zone(&self, id: ZoneId) -> Option<Zone> {
        self.zones.get(&id).cloned()
    }

    fn find_pod(&self, id: PodId) -> Option<Pod> {
        self.pods.get(&id).cloned()
    }

    fn find_cluster(&self, id: ClusterId) -> Option<Cluster> {
        self.clusters.get(&id).cloned()
    }

    fn find_host(&self, id: HostId) -> Option<Host> {
        self.hosts.get(&id).cloned()
    }

    fn list_pods(&self, zone_id: ZoneId) -> Vec<Pod> {
        self.pods.values().filter(|p| p.zone_id == zone_id).cloned().collect()
    }

    fn list_clusters(&self, scope: &DeploymentScope) -> Vec<Cluster> {
        self.clusters
            .values()
            .filter(|c| scope.contains(c.zone_id, c.pod_id, c.id))
            .cloned()
            .collect()
    }

    fn list_hosts(&self, scope: &DeploymentScope) -> Vec<Host> {
        self.hosts.values().filter(|h| h.in_scope(scope)).cloned().collect()
    }

    fn list_up_and_enabled_non_ha_hosts(&self, host_type: HostType, scope: &DeploymentScope) -> Vec<Host> {
        self.hosts
            .values()
            .filter(|h| h.host_type == host_type && h.in_scope(scope) && h.is_available())
            .cloned()
            .collect()
    }

    fn cluster_detail(&self, cluster_id: ClusterId, name: &str) -> Option<String> {
        self.cluster_details.get(&(cluster_id, name.to_string())).cloned()
    }
}

impl TagIndex for InMemoryInventory {
    fn hosts_with_tag(&self, host_type: HostType, scope: &DeploymentScope, tag: &str) -> Vec<HostId> {
        self.hosts
            .values()
            .filter(|h| {
                h.host_type == host_type
                    && h.in_scope(scope)
                    && h.status == HostStatus::Up
                    && h.enabled
                    && h.tags.iter().any(|t| t == tag)
            })
            .map(|h| h.id)
            .collect()
    }

    fn hosts_with_rule_matching_offering_tag(&self, offering_tag: &str) -> Vec<HostId> {
        self.hosts
            .values()
            .filter(|h| h.rule_tags.iter().any(|rule| TagRule::parse(rule).matches(offering_tag)))
            .map(|h| h.id)
            .collect()
    }
}

impl GpuIndex for InMemoryInventory {
    fn is_gpu_available(&self, host_id: HostId, group_name: &str, vgpu_type: &str) -> bool {
        self.hosts.get(&host_id).map_or(false, |h| {
            h.gpus
                .iter()
                .any(|g| g.group_name == group_name && g.vgpu_type == vgpu_type && g.remaining_capacity > 0)
        })
    }

    fn is_gpu_enabled(&self, host_id: HostId) -> bool {
        self.hosts.get(&host_id).map_or(false, |h| !h.gpus.is_empty())
    }
}
