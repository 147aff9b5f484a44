//! Host ranking strategies and capability-based prioritization.

use std::cmp::Reverse;
use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::core::capacity::CapacityOracle;
use crate::core::common::{AccountId, CapacityKind, DeploymentScope, HostId};
use crate::core::config::AllocationAlgorithm;
use crate::core::guests::GuestIndex;
use crate::core::inventory::{GpuIndex, Host};
use crate::core::workload::Template;

/// Data the ranking strategies may consult.
pub struct RankingInput<'a> {
    pub account_id: Option<AccountId>,
    pub scope: &'a DeploymentScope,
    pub order_by: CapacityKind,
    pub capacity: &'a dyn CapacityOracle,
    pub guests: &'a dyn GuestIndex,
}

/// Orders candidate hosts according to the allocation algorithm.
pub fn rank_hosts<R: Rng>(
    algorithm: AllocationAlgorithm,
    mut hosts: Vec<Host>,
    input: &RankingInput<'_>,
    rng: &mut R,
) -> Vec<Host> {
    match algorithm {
        AllocationAlgorithm::Random | AllocationAlgorithm::UserConcentratedPodRandom => {
            hosts.shuffle(rng);
        }
        AllocationAlgorithm::FirstFit | AllocationAlgorithm::UserConcentratedPodFirstFit => {}
        AllocationAlgorithm::UserDispersing => {
            if let Some(account_id) = input.account_id {
                let counts = input.guests.count_active_by_host(account_id, input.scope);
                hosts.sort_by_key(|h| counts.get(&h.id).copied().unwrap_or(0));
            }
        }
        AllocationAlgorithm::FirstFitLeastConsumed => {
            let free: HashMap<HostId, Option<u64>> = hosts
                .iter()
                .map(|h| (h.id, input.capacity.host_capacity(h.id, input.order_by).map(|r| r.free())))
                .collect();
            // hosts without capacity record go last
            hosts.sort_by_key(|h| Reverse(free[&h.id]));
        }
    }
    hosts
}

/// Result of capability prioritization.
#[derive(Debug, Default)]
pub struct PrioritizedHosts {
    /// hosts to check, in order
    pub hosts: Vec<Host>,
    /// hosts dropped because the template requires HVM
    pub no_hvm_hosts: Vec<Host>,
}

/// Checks HVM support, or reports every host as capable when the check is disabled.
pub fn host_supports_hvm(host: &Host, check_hvm: bool) -> bool {
    !check_hvm || host.supports_hvm()
}

/// Reorders ranked hosts by guest OS category, HVM capability and GPU presence.
///
/// Order: same guest OS category as the template, then hosts without category (non-HVM hosts first when the
/// template does not need HVM), then hosts with a different category. Hosts lacking HVM are dropped for templates
/// requiring it. Unless a GPU is requested, GPU-enabled hosts are moved to the end.
pub fn prioritize_hosts(
    hosts: Vec<Host>,
    template: &Template,
    gpu_requested: bool,
    check_hvm: bool,
    gpus: &dyn GpuIndex,
) -> PrioritizedHosts {
    let mut no_hvm_hosts = Vec::new();
    let mut high_priority = Vec::new();
    let mut low_priority = Vec::new();
    let mut without_hvm = Vec::new();
    let mut remaining = Vec::new();

    for host in hosts {
        let supports_hvm = host_supports_hvm(&host, check_hvm);
        if template.requires_hvm && !supports_hvm {
            no_hvm_hosts.push(host);
            continue;
        }
        match (&host.guest_os_category, &template.guest_os_category) {
            (Some(host_category), Some(template_category)) if host_category == template_category => {
                high_priority.push(host)
            }
            (Some(_), _) => low_priority.push(host),
            (None, _) => {
                if !template.requires_hvm && !supports_hvm {
                    without_hvm.push(host);
                } else {
                    remaining.push(host);
                }
            }
        }
    }

    let mut prioritized = high_priority;
    prioritized.extend(without_hvm);
    prioritized.extend(remaining);
    prioritized.extend(low_priority);

    if !gpu_requested {
        let (gpu_enabled, plain): (Vec<Host>, Vec<Host>) =
            prioritized.into_iter().partition(|h| gpus.is_gpu_enabled(h.id));
        prioritized = plain;
        prioritized.extend(gpu_enabled);
    }

    PrioritizedHosts {
        hosts: prioritized,
        no_hvm_hosts,
    }
}
