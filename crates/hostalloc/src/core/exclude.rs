//! Hosts, pods and clusters to skip within one deployment plan.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::core::common::{ClusterId, HostId, HostVerdict, PodId};
use crate::core::inventory::Host;

/// Accumulates resources known to be unusable for a deployment plan.
///
/// Share one instance across repeated allocator calls of the same plan so that hosts rejected once are not checked
/// again. Create a fresh instance for every independent plan.
#[derive(Clone, Debug, Default)]
pub struct ExcludeList {
    hosts: IndexMap<HostId, HostVerdict>,
    pods: BTreeSet<PodId>,
    clusters: BTreeSet<ClusterId>,
}

impl ExcludeList {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds host with the reason it was rejected. The first recorded reason is kept.
    pub fn add_host(&mut self, host_id: HostId, reason: HostVerdict) {
        self.hosts.entry(host_id).or_insert(reason);
    }

    pub fn add_pod(&mut self, pod_id: PodId) {
        self.pods.insert(pod_id);
    }

    pub fn add_cluster(&mut self, cluster_id: ClusterId) {
        self.clusters.insert(cluster_id);
    }

    pub fn contains_host(&self, host_id: HostId) -> bool {
        self.hosts.contains_key(&host_id)
    }

    /// Checks whether the host itself, its pod or its cluster is excluded.
    pub fn should_avoid_host(&self, host: &Host) -> bool {
        self.hosts.contains_key(&host.id)
            || self.pods.contains(&host.pod_id)
            || self.clusters.contains(&host.cluster_id)
    }

    pub fn reason(&self, host_id: HostId) -> Option<HostVerdict> {
        self.hosts.get(&host_id).copied()
    }

    /// Returns excluded hosts in the order they were added.
    pub fn hosts(&self) -> impl Iterator<Item = (HostId, HostVerdict)> + '_ {
        self.hosts.iter().map(|(id, reason)| (*id, *reason))
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let mut exclude = ExcludeList::new();
        exclude.add_host(3, HostVerdict::NotEnoughCapacity);
        exclude.add_host(1, HostVerdict::GpuUnavailable);
        exclude.add_host(3, HostVerdict::MaxGuestsReached);

        assert_eq!(exclude.reason(3), Some(HostVerdict::NotEnoughCapacity));
        assert_eq!(
            exclude.hosts().collect::<Vec<_>>(),
            vec![(3, HostVerdict::NotEnoughCapacity), (1, HostVerdict::GpuUnavailable)]
        );
    }

    #[test]
    fn pods_and_clusters_cover_their_hosts() {
        let mut exclude = ExcludeList::new();
        exclude.add_pod(2);
        exclude.add_cluster(5);

        assert!(exclude.should_avoid_host(&Host::new(1, "h1", 1, 2, 3)));
        assert!(exclude.should_avoid_host(&Host::new(2, "h2", 1, 1, 5)));
        assert!(!exclude.should_avoid_host(&Host::new(3, "h3", 1, 1, 3)));
        assert!(!exclude.contains_host(1));
    }
}
