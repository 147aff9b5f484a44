use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use sugars::{rc, refcell};

use hostalloc::core::capacity::{Allocation, CapacityOracle, CapacityRecord, ResourcePoolState};
use hostalloc::core::common::{CapacityKind, DeploymentScope, HostId, HostType, HostVerdict};
use hostalloc::core::config::{AllocationAlgorithm, AllocatorConfig};
use hostalloc::core::error::Error;
use hostalloc::core::exclude::ExcludeList;
use hostalloc::core::guests::{Guest, InMemoryGuestIndex};
use hostalloc::core::host_allocator::HostAllocator;
use hostalloc::core::inventory::{Host, InMemoryInventory};
use hostalloc::core::logger::FileLogger;
use hostalloc::core::workload::{ServiceOffering, Template, WorkloadProfile};

const GB: u64 = 1024 * 1024 * 1024;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Zone 1 with pod 1 and cluster 1 without overcommit.
struct Cloud {
    inventory: InMemoryInventory,
    capacity: ResourcePoolState,
    guests: InMemoryGuestIndex,
}

impl Cloud {
    fn new() -> Self {
        init_logger();
        let mut inventory = InMemoryInventory::new();
        inventory.add_zone(1, "z1");
        inventory.add_pod(1, "p1", 1);
        inventory.add_cluster(1, "c1", 1, 1);
        inventory.set_overcommit_ratios(1, 1., 1.);
        Self {
            inventory,
            capacity: ResourcePoolState::new(),
            guests: InMemoryGuestIndex::new(),
        }
    }

    fn add_host(&mut self, host: Host, cpu_cores: u32, cpu_speed_mhz: u32, memory_gb: u64) -> HostId {
        self.capacity.add_host(&host, cpu_cores, cpu_speed_mhz, memory_gb * GB);
        self.guests.add_host(&host);
        let id = host.id;
        self.inventory.add_host(host);
        id
    }

    fn allocator(self, config: AllocatorConfig) -> HostAllocator {
        let capacity = rc!(self.capacity.clone());
        self.allocator_with_capacity(config, capacity)
    }

    fn allocator_with_capacity(self, config: AllocatorConfig, capacity: Rc<dyn CapacityOracle>) -> HostAllocator {
        let inventory = rc!(self.inventory);
        HostAllocator::new(
            config,
            inventory.clone(),
            inventory.clone(),
            inventory,
            capacity,
            rc!(self.guests),
        )
    }
}

fn hvm_host(id: HostId, name: &str) -> Host {
    Host::new(id, name, 1, 1, 1).with_capabilities("hvm")
}

fn config(algorithm: AllocationAlgorithm) -> AllocatorConfig {
    AllocatorConfig {
        allocation_algorithm: algorithm,
        ..Default::default()
    }
}

fn profile(cpu_cores: u32, cpu_speed_mhz: u32, ram_mb: u64) -> WorkloadProfile {
    WorkloadProfile::new(Some(1), ServiceOffering::new(cpu_cores, cpu_speed_mhz, ram_mb), Template::new(1))
}

fn ids(hosts: &[Host]) -> Vec<HostId> {
    hosts.iter().map(|h| h.id).collect()
}

/// Records every capacity oracle query and its answer.
struct CountingOracle {
    inner: ResourcePoolState,
    queried: RefCell<HashMap<HostId, usize>>,
    capability: RefCell<HashMap<HostId, bool>>,
    capacity: RefCell<HashMap<HostId, bool>>,
}

impl CountingOracle {
    fn new(inner: ResourcePoolState) -> Self {
        Self {
            inner,
            queried: refcell!(HashMap::new()),
            capability: refcell!(HashMap::new()),
            capacity: refcell!(HashMap::new()),
        }
    }

    fn touch(&self, host_id: HostId) {
        *self.queried.borrow_mut().entry(host_id).or_insert(0) += 1;
    }

    fn queries(&self, host_id: HostId) -> usize {
        self.queried.borrow().get(&host_id).copied().unwrap_or(0)
    }
}

impl CapacityOracle for CountingOracle {
    fn has_capability(&self, host_id: HostId, cpu_cores: u32, cpu_speed_mhz: u32) -> bool {
        self.touch(host_id);
        let result = self.inner.has_capability(host_id, cpu_cores, cpu_speed_mhz);
        self.capability.borrow_mut().insert(host_id, result);
        result
    }

    fn has_capacity(
        &self,
        host_id: HostId,
        cpu_mhz_needed: u64,
        ram_bytes_needed: u64,
        consider_reserved: bool,
        cpu_overcommit_ratio: f64,
        memory_overcommit_ratio: f64,
    ) -> bool {
        self.touch(host_id);
        let result = self.inner.has_capacity(
            host_id,
            cpu_mhz_needed,
            ram_bytes_needed,
            consider_reserved,
            cpu_overcommit_ratio,
            memory_overcommit_ratio,
        );
        self.capacity.borrow_mut().insert(host_id, result);
        result
    }

    fn reached_max_guest_limit(&self, host_id: HostId) -> bool {
        self.touch(host_id);
        self.inner.reached_max_guest_limit(host_id)
    }

    fn host_capacity(&self, host_id: HostId, kind: CapacityKind) -> Option<CapacityRecord> {
        self.touch(host_id);
        self.inner.host_capacity(host_id, kind)
    }

    fn list_capacity(&self, scope: &DeploymentScope, kind: CapacityKind) -> Vec<CapacityRecord> {
        self.inner.list_capacity(scope, kind)
    }
}

#[test]
// Hosts ranked by free memory: H1 (16 GB), H2 (8 GB), H3 (4 GB).
// Two results are requested, so H3 is never checked.
fn test_least_consumed_by_memory() {
    let mut cloud = Cloud::new();
    let h3 = cloud.add_host(hvm_host(3, "h3"), 2, 1000, 4);
    let h1 = cloud.add_host(hvm_host(1, "h1"), 8, 1000, 16);
    let h2 = cloud.add_host(hvm_host(2, "h2"), 4, 1000, 8);
    let mut config = config(AllocationAlgorithm::FirstFitLeastConsumed);
    config.capacity_order_resource = CapacityKind::Memory;
    let allocator = cloud.allocator(config);
    let workload = profile(4, 1000, 8 * 1024);

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 2, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![h1, h2]);
    assert!(!exclude.contains_host(h3));

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 3, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![h1, h2]);
    assert!(exclude.contains_host(h3));
    assert_ne!(exclude.reason(h3), Some(HostVerdict::Accepted));
}

#[test]
fn test_least_consumed_takes_used_capacity_into_account() {
    let mut cloud = Cloud::new();
    let h1 = cloud.add_host(hvm_host(1, "h1"), 8, 1000, 16);
    let h2 = cloud.add_host(hvm_host(2, "h2"), 8, 1000, 16);
    cloud.capacity.allocate(
        &Allocation {
            id: 100,
            cpu_mhz: 6000,
            ram_bytes: 2 * GB,
        },
        h1,
    );
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFitLeastConsumed));

    let hosts = allocator
        .select_hosts(
            HostType::Routing,
            &DeploymentScope::zone(1),
            &profile(1, 1000, 1024),
            &mut ExcludeList::new(),
            2,
            true,
        )
        .unwrap();
    assert_eq!(ids(&hosts), vec![h2, h1]);
}

#[test]
fn test_returned_hosts_passed_capacity_checks() {
    let mut cloud = Cloud::new();
    for (id, cores, memory_gb) in [(1, 2, 2), (2, 8, 16), (3, 4, 2), (4, 1, 32), (5, 8, 4), (6, 16, 64)] {
        cloud.add_host(hvm_host(id, &format!("h{}", id)), cores, 2000, memory_gb);
    }
    cloud.capacity.allocate(
        &Allocation {
            id: 100,
            cpu_mhz: 30000,
            ram_bytes: 60 * GB,
        },
        6,
    );
    let oracle = rc!(CountingOracle::new(cloud.capacity.clone()));
    let allocator = cloud.allocator_with_capacity(config(AllocationAlgorithm::Random), oracle.clone());

    let hosts = allocator
        .select_hosts(
            HostType::Routing,
            &DeploymentScope::zone(1),
            &profile(4, 2000, 4 * 1024),
            &mut ExcludeList::new(),
            10,
            true,
        )
        .unwrap();
    assert_eq!(hosts.len(), 2);
    for host in &hosts {
        assert_eq!(oracle.capability.borrow().get(&host.id), Some(&true));
        assert_eq!(oracle.capacity.borrow().get(&host.id), Some(&true));
    }
    let mut found = ids(&hosts);
    found.sort();
    assert_eq!(found, vec![2, 5]);
}

#[test]
// Offering tag matches {A, B, C}, template tag matches {B, C, D}.
fn test_tag_intersection() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "a").with_tags(&["t1"]), 4, 1000, 8);
    cloud.add_host(hvm_host(2, "b").with_tags(&["t1", "t2"]), 4, 1000, 8);
    cloud.add_host(hvm_host(3, "c").with_tags(&["t1", "t2"]), 4, 1000, 8);
    cloud.add_host(hvm_host(4, "d").with_tags(&["t2"]), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));
    let workload = WorkloadProfile::new(
        Some(1),
        ServiceOffering::new(1, 1000, 1024).with_host_tag("t1"),
        Template::new(1).with_tag("t2"),
    );

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![2, 3]);
    assert_eq!(exclude.reason(1), Some(HostVerdict::NotInCandidateSet));
    assert_eq!(exclude.reason(4), Some(HostVerdict::NotInCandidateSet));
}

#[test]
fn test_offering_tag_matches_host_rules() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "exact").with_tags(&["gpu-large"]), 4, 1000, 8);
    cloud.add_host(hvm_host(2, "untagged"), 4, 1000, 8);
    cloud.add_host(hvm_host(3, "ruled").with_rule_tag("gpu-*|ssd"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));
    let workload = WorkloadProfile::new(
        Some(1),
        ServiceOffering::new(1, 1000, 1024).with_host_tag("gpu-large"),
        Template::new(1),
    );

    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut ExcludeList::new(), 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![1, 3]);
}

#[test]
fn test_ha_tag_overrides_other_tags() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "tagged").with_tags(&["t1"]), 4, 1000, 8);
    let mut ha_host = hvm_host(2, "ha").with_tags(&["ha"]);
    ha_host.ha_reserved = true;
    cloud.add_host(ha_host, 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));
    let workload = WorkloadProfile::new(
        Some(1),
        ServiceOffering::new(1, 1000, 1024).with_host_tag("t1"),
        Template::new(1),
    )
    .with_ha_tag("ha");

    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut ExcludeList::new(), 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![2]);
}

#[test]
// HA-reserved hosts are offered only to workloads carrying the HA tag.
fn test_ha_reserved_host_skipped_by_regular_placement() {
    let mut cloud = Cloud::new();
    let mut ha_host = hvm_host(2, "ha").with_tags(&["t1"]);
    ha_host.ha_reserved = true;
    cloud.add_host(ha_host, 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let by_offering = WorkloadProfile::new(
        Some(1),
        ServiceOffering::new(1, 1000, 1024).with_host_tag("t1"),
        Template::new(1),
    );
    let by_template = WorkloadProfile::new(
        Some(1),
        ServiceOffering::new(1, 1000, 1024),
        Template::new(1).with_tag("t1"),
    );
    for workload in [by_offering, by_template] {
        let hosts = allocator
            .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut ExcludeList::new(), 10, true)
            .unwrap();
        assert!(hosts.is_empty());
    }

    let ha_workload = profile(1, 1000, 1024).with_ha_tag("t1");
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &ha_workload, &mut ExcludeList::new(), 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![2]);
}

#[test]
fn test_hvm_template_never_gets_non_hvm_host() {
    for algorithm in [
        AllocationAlgorithm::Random,
        AllocationAlgorithm::FirstFit,
        AllocationAlgorithm::UserDispersing,
        AllocationAlgorithm::FirstFitLeastConsumed,
        AllocationAlgorithm::UserConcentratedPodRandom,
        AllocationAlgorithm::UserConcentratedPodFirstFit,
    ] {
        let mut cloud = Cloud::new();
        cloud.add_host(hvm_host(1, "hvm"), 4, 1000, 8);
        cloud.add_host(Host::new(2, "plain", 1, 1, 1), 16, 1000, 64);
        cloud.add_host(Host::new(3, "xen", 1, 1, 1).with_capabilities("xen-3.0-x86_64,hvm-3.0-x86_64"), 4, 1000, 8);
        let allocator = cloud.allocator(config(algorithm));
        let workload =
            WorkloadProfile::new(Some(1), ServiceOffering::new(1, 1000, 1024), Template::new(1).requiring_hvm());

        let mut exclude = ExcludeList::new();
        let hosts = allocator
            .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 10, true)
            .unwrap();
        assert!(!ids(&hosts).contains(&2), "{} returned non-HVM host", algorithm);
        assert_eq!(hosts.len(), 2);
        assert_eq!(exclude.reason(2), Some(HostVerdict::HvmNotSupported));
    }
}

#[test]
fn test_hvm_check_can_be_disabled() {
    let mut cloud = Cloud::new();
    cloud.add_host(Host::new(1, "plain", 1, 1, 1), 4, 1000, 8);
    let mut config = config(AllocationAlgorithm::FirstFit);
    config.check_hvm = false;
    let allocator = cloud.allocator(config);
    let workload = WorkloadProfile::new(Some(1), ServiceOffering::new(1, 1000, 1024), Template::new(1).requiring_hvm());

    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut ExcludeList::new(), 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![1]);
}

#[test]
fn test_gpu_hosts_go_last() {
    let mut cloud = Cloud::new();
    let x = cloud.add_host(hvm_host(1, "x").with_gpu("GRID K1", "K140Q", 4), 4, 1000, 8);
    let y = cloud.add_host(hvm_host(2, "y"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let hosts = allocator
        .select_hosts(
            HostType::Routing,
            &DeploymentScope::zone(1),
            &profile(1, 1000, 1024),
            &mut ExcludeList::new(),
            10,
            true,
        )
        .unwrap();
    assert_eq!(ids(&hosts), vec![y, x]);
}

#[test]
fn test_gpu_request_needs_available_device() {
    let mut cloud = Cloud::new();
    let x = cloud.add_host(hvm_host(1, "x").with_gpu("GRID K1", "K140Q", 1), 4, 1000, 8);
    let y = cloud.add_host(hvm_host(2, "y"), 4, 1000, 8);
    let z = cloud.add_host(hvm_host(3, "z").with_gpu("GRID K1", "K140Q", 0), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));
    let workload = WorkloadProfile::new(
        Some(1),
        ServiceOffering::new(1, 1000, 1024).with_gpu("GRID K1", "K140Q"),
        Template::new(1),
    );

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![x]);
    assert_eq!(exclude.reason(y), Some(HostVerdict::GpuUnavailable));
    assert_eq!(exclude.reason(z), Some(HostVerdict::GpuUnavailable));
}

#[test]
fn test_max_results_bound() {
    let mut cloud = Cloud::new();
    for id in 1..=5 {
        cloud.add_host(hvm_host(id, &format!("h{}", id)), 4, 1000, 8);
    }
    let allocator = cloud.allocator(config(AllocationAlgorithm::Random));
    let workload = profile(1, 1000, 1024);

    for (max_results, expected) in [(0, 0), (1, 1), (3, 3), (5, 5), (10, 5)] {
        let hosts = allocator
            .select_hosts(
                HostType::Routing,
                &DeploymentScope::zone(1),
                &workload,
                &mut ExcludeList::new(),
                max_results,
                true,
            )
            .unwrap();
        assert_eq!(hosts.len(), expected);
    }
}

#[test]
// Ranking by free capacity must not look at excluded hosts either.
fn test_excluded_host_is_never_queried() {
    for algorithm in [
        AllocationAlgorithm::Random,
        AllocationAlgorithm::FirstFit,
        AllocationAlgorithm::UserDispersing,
        AllocationAlgorithm::FirstFitLeastConsumed,
        AllocationAlgorithm::UserConcentratedPodRandom,
        AllocationAlgorithm::UserConcentratedPodFirstFit,
    ] {
        let mut cloud = Cloud::new();
        for id in 1..=4 {
            cloud.add_host(hvm_host(id, &format!("h{}", id)), 4, 1000, 8);
        }
        let oracle = rc!(CountingOracle::new(cloud.capacity.clone()));
        let allocator = cloud.allocator_with_capacity(config(algorithm), oracle.clone());

        let mut exclude = ExcludeList::new();
        exclude.add_host(2, HostVerdict::NotEnoughCapacity);
        let hosts = allocator
            .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &profile(1, 1000, 1024), &mut exclude, 10, true)
            .unwrap();
        assert_eq!(hosts.len(), 3, "{}", algorithm);
        assert!(!ids(&hosts).contains(&2), "{}", algorithm);
        assert_eq!(oracle.queries(2), 0, "{}", algorithm);
        assert_eq!(exclude.reason(2), Some(HostVerdict::NotEnoughCapacity));
    }
}

#[test]
// Second call of the same plan does not check the host rejected by the first one.
fn test_exclude_list_is_shared_within_plan() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "small"), 1, 1000, 1);
    cloud.add_host(hvm_host(2, "big"), 8, 1000, 16);
    let oracle = rc!(CountingOracle::new(cloud.capacity.clone()));
    let allocator = cloud.allocator_with_capacity(config(AllocationAlgorithm::FirstFit), oracle.clone());
    let workload = profile(2, 1000, 2048);

    let mut exclude = ExcludeList::new();
    for _ in 0..2 {
        let hosts = allocator
            .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 10, true)
            .unwrap();
        assert_eq!(ids(&hosts), vec![2]);
    }
    assert_eq!(exclude.reason(1), Some(HostVerdict::NoCpuCapability));
    let first_call_queries = oracle.queries(1);
    assert!(first_call_queries > 0);

    allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 10, true)
        .unwrap();
    assert_eq!(oracle.queries(1), first_call_queries);
}

#[test]
fn test_excluded_cluster_hosts_are_skipped() {
    let mut cloud = Cloud::new();
    cloud.inventory.add_cluster(2, "c2", 1, 1);
    cloud.inventory.set_overcommit_ratios(2, 1., 1.);
    cloud.add_host(hvm_host(1, "h1"), 4, 1000, 8);
    cloud.add_host(Host::new(2, "h2", 1, 1, 2).with_capabilities("hvm"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let mut exclude = ExcludeList::new();
    exclude.add_cluster(1);
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &profile(1, 1000, 1024), &mut exclude, 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![2]);
}

#[test]
fn test_non_routing_host_type_gets_nothing() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "h1"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts(HostType::Storage, &DeploymentScope::zone(1), &profile(1, 1000, 1024), &mut exclude, 10, true)
        .unwrap();
    assert!(hosts.is_empty());
    assert_eq!(exclude.host_count(), 0);
}

#[test]
fn test_empty_scope_gives_empty_result() {
    let mut cloud = Cloud::new();
    cloud.inventory.add_pod(2, "p2", 1);
    cloud.add_host(hvm_host(1, "h1"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFitLeastConsumed));

    for scope in [DeploymentScope::pod(1, 2), DeploymentScope::zone(2)] {
        let mut exclude = ExcludeList::new();
        let hosts = allocator
            .select_hosts(HostType::Routing, &scope, &profile(1, 1000, 1024), &mut exclude, 10, true)
            .unwrap();
        assert!(hosts.is_empty());
        assert_eq!(exclude.host_count(), 0);
    }
}

#[test]
fn test_missing_overcommit_ratio_is_an_error() {
    let mut cloud = Cloud::new();
    cloud.inventory.add_cluster(2, "c2", 1, 1);
    cloud.add_host(Host::new(1, "h1", 1, 1, 2).with_capabilities("hvm"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let result = allocator.select_hosts(
        HostType::Routing,
        &DeploymentScope::zone(1),
        &profile(1, 1000, 1024),
        &mut ExcludeList::new(),
        10,
        true,
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_overcommit_ratio_extends_capacity() {
    let mut cloud = Cloud::new();
    cloud.inventory.set_overcommit_ratios(1, 2., 1.5);
    cloud.add_host(hvm_host(1, "h1"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let hosts = allocator
        .select_hosts(
            HostType::Routing,
            &DeploymentScope::zone(1),
            &profile(4, 1000, 12 * 1024),
            &mut ExcludeList::new(),
            1,
            true,
        )
        .unwrap();
    assert_eq!(ids(&hosts), vec![1]);
}

#[test]
fn test_reserved_capacity_is_optional() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "h1"), 4, 1000, 8);
    cloud.capacity.reserve(
        &Allocation {
            id: 100,
            cpu_mhz: 2000,
            ram_bytes: 6 * GB,
        },
        1,
    );
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));
    let workload = profile(1, 1000, 4 * 1024);

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut exclude, 1, true)
        .unwrap();
    assert!(hosts.is_empty());
    assert_eq!(exclude.reason(1), Some(HostVerdict::NotEnoughCapacity));

    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut ExcludeList::new(), 1, false)
        .unwrap();
    assert_eq!(ids(&hosts), vec![1]);
}

#[test]
fn test_guest_limit() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "h1"), 4, 1000, 8);
    cloud.add_host(hvm_host(2, "h2"), 4, 1000, 8);
    cloud.capacity.set_max_guests(1, 1);
    cloud.capacity.allocate(
        &Allocation {
            id: 100,
            cpu_mhz: 1000,
            ram_bytes: GB,
        },
        1,
    );
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &profile(1, 1000, 1024), &mut exclude, 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![2]);
    assert_eq!(exclude.reason(1), Some(HostVerdict::MaxGuestsReached));
}

#[test]
// Account 1 runs two guests on h1 and one on h2.
fn test_user_dispersing() {
    let mut cloud = Cloud::new();
    for id in 1..=3 {
        cloud.add_host(hvm_host(id, &format!("h{}", id)), 4, 1000, 8);
    }
    cloud.guests.add_guest(Guest::running(10, 1, 1, 1, 1, 1));
    cloud.guests.add_guest(Guest::running(11, 1, 1, 1, 1, 1));
    cloud.guests.add_guest(Guest::running(12, 1, 1, 1, 1, 2));
    cloud.guests.add_guest(Guest::running(13, 2, 1, 1, 1, 3));
    cloud.guests.add_guest(Guest::running(14, 2, 1, 1, 1, 3));
    let allocator = cloud.allocator(config(AllocationAlgorithm::UserDispersing));

    let hosts = allocator
        .select_hosts(
            HostType::Routing,
            &DeploymentScope::zone(1),
            &profile(1, 1000, 1024),
            &mut ExcludeList::new(),
            10,
            true,
        )
        .unwrap();
    assert_eq!(ids(&hosts), vec![3, 2, 1]);
}

#[test]
fn test_guest_os_category_preference() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "windows").with_guest_os_category("Windows"), 4, 1000, 8);
    cloud.add_host(hvm_host(2, "any"), 4, 1000, 8);
    cloud.add_host(hvm_host(3, "linux").with_guest_os_category("Linux"), 4, 1000, 8);
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));
    let workload = WorkloadProfile::new(
        Some(1),
        ServiceOffering::new(1, 1000, 1024),
        Template::new(1).with_guest_os_category("Linux"),
    );

    let hosts = allocator
        .select_hosts(HostType::Routing, &DeploymentScope::zone(1), &workload, &mut ExcludeList::new(), 10, true)
        .unwrap();
    assert_eq!(ids(&hosts), vec![3, 2, 1]);
}

#[test]
fn test_select_from_given_hosts() {
    let mut cloud = Cloud::new();
    for id in 1..=3 {
        cloud.add_host(hvm_host(id, &format!("h{}", id)), 4, 1000, 8);
    }
    let given = vec![hvm_host(3, "h3"), hvm_host(1, "h1")];
    let allocator = cloud.allocator(config(AllocationAlgorithm::FirstFit));

    let mut exclude = ExcludeList::new();
    let hosts = allocator
        .select_hosts_from(
            given,
            HostType::Routing,
            &DeploymentScope::zone(1),
            &profile(1, 1000, 1024),
            &mut exclude,
            10,
            true,
        )
        .unwrap();
    assert_eq!(ids(&hosts), vec![3, 1]);
    assert_eq!(exclude.reason(2), Some(HostVerdict::NotInCandidateSet));
}

#[test]
fn test_decisions_saved_as_csv() {
    let mut cloud = Cloud::new();
    cloud.add_host(hvm_host(1, "small"), 1, 1000, 1);
    cloud.add_host(hvm_host(2, "big"), 8, 1000, 16);
    let allocator = cloud
        .allocator(config(AllocationAlgorithm::FirstFit))
        .with_logger(Box::new(FileLogger::with_level(log::Level::Debug)));

    allocator
        .select_hosts(
            HostType::Routing,
            &DeploymentScope::zone(1),
            &profile(2, 1000, 2048),
            &mut ExcludeList::new(),
            10,
            true,
        )
        .unwrap();

    let path = std::env::temp_dir().join(format!("hostalloc-decisions-{}.csv", std::process::id()));
    let path = path.to_str().unwrap().to_string();
    allocator.save_log(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "component,host_id,host_name,verdict");
    assert!(lines[1].starts_with("host_allocator,1,small,"));
    assert!(lines[2].starts_with("host_allocator,2,big,"));
}

#[test]
fn test_seeded_shuffle_is_reproducible() {
    let build = || {
        let mut cloud = Cloud::new();
        for id in 1..=8 {
            cloud.add_host(hvm_host(id, &format!("h{}", id)), 4, 1000, 8);
        }
        cloud.allocator(config(AllocationAlgorithm::Random))
    };
    let select = |allocator: &HostAllocator| {
        let hosts = allocator
            .select_hosts(
                HostType::Routing,
                &DeploymentScope::zone(1),
                &profile(1, 1000, 1024),
                &mut ExcludeList::new(),
                8,
                true,
            )
            .unwrap();
        ids(&hosts)
    };
    let first = select(&build());
    let second = select(&build());
    assert_eq!(first, second);
    assert_eq!(first.iter().copied().collect::<HashSet<_>>().len(), 8);
}
