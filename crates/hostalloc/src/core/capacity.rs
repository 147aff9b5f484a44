//! Host capacity state and the capacity oracle interface.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::common::{CapacityKind, ClusterId, DeploymentScope, GuestId, HostId, PodId, ZoneId};
use crate::core::inventory::Host;

/// Total, used and reserved amount of one resource kind on one host.
///
/// CPU is measured in MHz, memory in bytes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CapacityRecord {
    pub host_id: HostId,
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    pub kind: CapacityKind,
    pub total: u64,
    pub used: u64,
    /// held by in-flight operations which are not committed yet
    pub reserved: u64,
}

impl CapacityRecord {
    /// Physical capacity left after used and reserved amounts, without overcommit.
    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used + self.reserved)
    }
}

/// Reports host capacity. Implementations must answer from local state without blocking.
pub trait CapacityOracle {
    /// Checks that the host has enough cores, each at least as fast as requested.
    fn has_capability(&self, host_id: HostId, cpu_cores: u32, cpu_speed_mhz: u32) -> bool;

    /// Checks that the host can fit the requested CPU and memory after scaling its totals by the overcommit ratios.
    fn has_capacity(
        &self,
        host_id: HostId,
        cpu_mhz_needed: u64,
        ram_bytes_needed: u64,
        consider_reserved: bool,
        cpu_overcommit_ratio: f64,
        memory_overcommit_ratio: f64,
    ) -> bool;

    fn reached_max_guest_limit(&self, host_id: HostId) -> bool;

    fn host_capacity(&self, host_id: HostId, kind: CapacityKind) -> Option<CapacityRecord>;

    /// Returns capacity records of all hosts in scope.
    fn list_capacity(&self, scope: &DeploymentScope, kind: CapacityKind) -> Vec<CapacityRecord>;

    /// Returns summed total and used capacity of all hosts in scope.
    fn aggregate_capacity(&self, scope: &DeploymentScope, kind: CapacityKind) -> (u64, u64) {
        self.list_capacity(scope, kind)
            .iter()
            .fold((0, 0), |(total, used), r| (total + r.total, used + r.used))
    }
}

/// Resources consumed by a single guest.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Allocation {
    pub id: GuestId,
    pub cpu_mhz: u64,
    pub ram_bytes: u64,
}

/// Stores host properties (resource capacity) and state (used and reserved resources, current allocations).
#[derive(Clone, Debug)]
pub struct HostInfo {
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,

    pub cpu_cores: u32,
    pub cpu_speed_mhz: u32,
    pub memory_total: u64,

    pub cpu_used: u64,
    pub memory_used: u64,

    pub cpu_reserved: u64,
    pub memory_reserved: u64,

    pub max_guests: Option<u32>,

    pub allocations: BTreeMap<GuestId, Allocation>,
    pub reservations: BTreeMap<GuestId, Allocation>,
}

impl HostInfo {
    pub fn cpu_total(&self) -> u64 {
        self.cpu_cores as u64 * self.cpu_speed_mhz as u64
    }

    fn record(&self, host_id: HostId, kind: CapacityKind) -> CapacityRecord {
        let (total, used, reserved) = match kind {
            CapacityKind::Cpu => (self.cpu_total(), self.cpu_used, self.cpu_reserved),
            CapacityKind::Memory => (self.memory_total, self.memory_used, self.memory_reserved),
        };
        CapacityRecord {
            host_id,
            zone_id: self.zone_id,
            pod_id: self.pod_id,
            kind,
            total,
            used,
            reserved,
        }
    }
}

/// In-memory capacity state of a pool of hosts.
#[derive(Clone, Debug, Default)]
pub struct ResourcePoolState {
    hosts: BTreeMap<HostId, HostInfo>,
}

impl ResourcePoolState {
    /// Creates empty resource pool state.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds host with the given capacity and nothing allocated.
    pub fn add_host(&mut self, host: &Host, cpu_cores: u32, cpu_speed_mhz: u32, memory_total: u64) {
        self.hosts.insert(
            host.id,
            HostInfo {
                zone_id: host.zone_id,
                pod_id: host.pod_id,
                cluster_id: host.cluster_id,
                cpu_cores,
                cpu_speed_mhz,
                memory_total,
                cpu_used: 0,
                memory_used: 0,
                cpu_reserved: 0,
                memory_reserved: 0,
                max_guests: None,
                allocations: BTreeMap::new(),
                reservations: BTreeMap::new(),
            },
        );
    }

    /// Limits the number of guests running concurrently on the host.
    pub fn set_max_guests(&mut self, host_id: HostId, limit: u32) {
        if let Some(host) = self.hosts.get_mut(&host_id) {
            host.max_guests = Some(limit);
        }
    }

    /// Holds resources for an in-flight operation until it is committed with `allocate` or dropped with `release`.
    pub fn reserve(&mut self, alloc: &Allocation, host_id: HostId) {
        if let Some(host) = self.hosts.get_mut(&host_id) {
            if host.reservations.contains_key(&alloc.id) || host.allocations.contains_key(&alloc.id) {
                return;
            }
            host.cpu_reserved += alloc.cpu_mhz;
            host.memory_reserved += alloc.ram_bytes;
            host.reservations.insert(alloc.id, alloc.clone());
        }
    }

    /// Applies the allocation on the host, converting a matching reservation if there is one.
    ///
    /// Used amounts may exceed physical totals when the cluster overcommits.
    pub fn allocate(&mut self, alloc: &Allocation, host_id: HostId) {
        if let Some(host) = self.hosts.get_mut(&host_id) {
            if host.allocations.contains_key(&alloc.id) {
                return;
            }
            if let Some(reservation) = host.reservations.remove(&alloc.id) {
                host.cpu_reserved -= reservation.cpu_mhz;
                host.memory_reserved -= reservation.ram_bytes;
            }
            host.cpu_used += alloc.cpu_mhz;
            host.memory_used += alloc.ram_bytes;
            host.allocations.insert(alloc.id, alloc.clone());
        }
    }

    /// Removes the allocation or reservation with the given guest ID from the host.
    pub fn release(&mut self, guest_id: GuestId, host_id: HostId) {
        if let Some(host) = self.hosts.get_mut(&host_id) {
            if let Some(alloc) = host.allocations.remove(&guest_id) {
                host.cpu_used -= alloc.cpu_mhz;
                host.memory_used -= alloc.ram_bytes;
            }
            if let Some(reservation) = host.reservations.remove(&guest_id) {
                host.cpu_reserved -= reservation.cpu_mhz;
                host.memory_reserved -= reservation.ram_bytes;
            }
        }
    }
}

impl CapacityOracle for ResourcePoolState {
    fn has_capability(&self, host_id: HostId, cpu_cores: u32, cpu_speed_mhz: u32) -> bool {
        self.hosts
            .get(&host_id)
            .map_or(false, |h| h.cpu_cores >= cpu_cores && h.cpu_speed_mhz >= cpu_speed_mhz)
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
        let host = match self.hosts.get(&host_id) {
            Some(host) => host,
            None => return false,
        };
        let cpu_total = (host.cpu_total() as f64 * cpu_overcommit_ratio) as u64;
        let memory_total = (host.memory_total as f64 * memory_overcommit_ratio) as u64;
        let (cpu_taken, memory_taken) = if consider_reserved {
            (host.cpu_used + host.cpu_reserved, host.memory_used + host.memory_reserved)
        } else {
            (host.cpu_used, host.memory_used)
        };
        cpu_taken + cpu_mhz_needed <= cpu_total && memory_taken + ram_bytes_needed <= memory_total
    }

    fn reached_max_guest_limit(&self, host_id: HostId) -> bool {
        self.hosts.get(&host_id).map_or(false, |h| {
            h.max_guests
                .map_or(false, |limit| h.allocations.len() >= limit as usize)
        })
    }

    fn host_capacity(&self, host_id: HostId, kind: CapacityKind) -> Option<CapacityRecord> {
        self.hosts.get(&host_id).map(|h| h.record(host_id, kind))
    }

    fn list_capacity(&self, scope: &DeploymentScope, kind: CapacityKind) -> Vec<CapacityRecord> {
        self.hosts
            .iter()
            .filter(|(_, h)| scope.contains(h.zone_id, h.pod_id, h.cluster_id))
            .map(|(id, h)| h.record(*id, kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    fn pool() -> ResourcePoolState {
        let mut pool = ResourcePoolState::new();
        pool.add_host(&Host::new(1, "h1", 1, 1, 1), 4, 2000, 8 * GB);
        pool.add_host(&Host::new(2, "h2", 1, 2, 2), 2, 1000, 4 * GB);
        pool
    }

    #[test]
    fn capability_needs_cores_and_speed() {
        let pool = pool();
        assert!(pool.has_capability(1, 4, 2000));
        assert!(!pool.has_capability(1, 4, 2500));
        assert!(!pool.has_capability(1, 8, 1000));
        assert!(!pool.has_capability(42, 1, 1));
    }

    #[test]
    fn overcommit_scales_totals() {
        let mut pool = pool();
        pool.allocate(
            &Allocation {
                id: 1,
                cpu_mhz: 6000,
                ram_bytes: 6 * GB,
            },
            1,
        );
        assert!(!pool.has_capacity(1, 4000, GB, false, 1., 1.));
        assert!(pool.has_capacity(1, 4000, GB, false, 2., 1.));
        assert!(!pool.has_capacity(1, 1000, 4 * GB, false, 2., 1.));
        assert!(pool.has_capacity(1, 1000, 4 * GB, false, 2., 1.5));
    }

    #[test]
    fn reservations_count_only_when_considered() {
        let mut pool = pool();
        let alloc = Allocation {
            id: 7,
            cpu_mhz: 1500,
            ram_bytes: 3 * GB,
        };
        pool.reserve(&alloc, 2);
        assert!(pool.has_capacity(2, 1000, 2 * GB, false, 1., 1.));
        assert!(!pool.has_capacity(2, 1000, 2 * GB, true, 1., 1.));

        pool.allocate(&alloc, 2);
        let record = pool.host_capacity(2, CapacityKind::Memory).unwrap();
        assert_eq!((record.used, record.reserved), (3 * GB, 0));

        pool.release(7, 2);
        assert_eq!(pool.host_capacity(2, CapacityKind::Cpu).unwrap().free(), 2000);
    }

    #[test]
    fn guest_limit() {
        let mut pool = pool();
        pool.set_max_guests(1, 1);
        assert!(!pool.reached_max_guest_limit(1));
        pool.allocate(
            &Allocation {
                id: 1,
                cpu_mhz: 100,
                ram_bytes: GB,
            },
            1,
        );
        assert!(pool.reached_max_guest_limit(1));
        assert!(!pool.reached_max_guest_limit(2));
    }

    #[test]
    fn aggregate_sums_hosts_in_scope() {
        let mut pool = pool();
        pool.allocate(
            &Allocation {
                id: 1,
                cpu_mhz: 100,
                ram_bytes: GB,
            },
            2,
        );
        assert_eq!(
            pool.aggregate_capacity(&DeploymentScope::zone(1), CapacityKind::Memory),
            (12 * GB, GB)
        );
        assert_eq!(
            pool.aggregate_capacity(&DeploymentScope::pod(1, 1), CapacityKind::Cpu),
            (8000, 0)
        );
    }
}
