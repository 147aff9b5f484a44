//! Host allocator selecting hosts for a new workload within a deployment scope.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::core::capacity::CapacityOracle;
use crate::core::common::{DeploymentScope, HostId, HostType, HostVerdict};
use crate::core::config::{AllocatorConfig, OvercommitRatios};
use crate::core::error::Result;
use crate::core::exclude::ExcludeList;
use crate::core::guests::GuestIndex;
use crate::core::inventory::{GpuIndex, Host, Inventory, TagIndex};
use crate::core::logger::{PlacementLogger, StdoutLogger};
use crate::core::ranking::{prioritize_hosts, rank_hosts, RankingInput};
use crate::core::tag_filter::candidate_hosts;
use crate::core::workload::WorkloadProfile;

const COMPONENT: &str = "host_allocator";

/// Selects hosts able to run a workload.
///
/// The allocator does not change any state except its random generator and the exclude list passed by the caller.
/// Its result is advisory: the capacity of the selected hosts must be re-validated when the workload is committed,
/// because nothing prevents another placement from consuming it in between.
///
/// Hosts dedicated to other owners are expected to be excluded by the caller before calling the allocator,
/// see [`DedicatedResourceManager::exclude_foreign_dedications`].
///
/// [`DedicatedResourceManager::exclude_foreign_dedications`]:
///     crate::core::dedication_manager::DedicatedResourceManager::exclude_foreign_dedications
pub struct HostAllocator {
    config: AllocatorConfig,
    inventory: Rc<dyn Inventory>,
    tags: Rc<dyn TagIndex>,
    gpus: Rc<dyn GpuIndex>,
    capacity: Rc<dyn CapacityOracle>,
    guests: Rc<dyn GuestIndex>,
    logger: RefCell<Box<dyn PlacementLogger>>,
    rng: RefCell<Pcg64>,
}

impl HostAllocator {
    pub fn new(
        config: AllocatorConfig,
        inventory: Rc<dyn Inventory>,
        tags: Rc<dyn TagIndex>,
        gpus: Rc<dyn GpuIndex>,
        capacity: Rc<dyn CapacityOracle>,
        guests: Rc<dyn GuestIndex>,
    ) -> Self {
        let rng = Pcg64::seed_from_u64(config.random_seed);
        Self {
            config,
            inventory,
            tags,
            gpus,
            capacity,
            guests,
            logger: RefCell::new(Box::new(StdoutLogger::new())),
            rng: RefCell::new(rng),
        }
    }

    /// Replaces the default logger of per-host decisions.
    pub fn with_logger(self, logger: Box<dyn PlacementLogger>) -> Self {
        self.logger.replace(logger);
        self
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Saves decisions collected by the logger.
    pub fn save_log(&self, path: &str) -> std::result::Result<(), std::io::Error> {
        self.logger.borrow().save_log(path)
    }

    /// Returns up to `max_results` suitable hosts in scope, best first.
    ///
    /// Every host found unsuitable is added to `exclude`. Hosts already in `exclude` are skipped without querying
    /// the capacity oracle. Fails only on configuration errors, e.g. missing overcommit ratios of a cluster.
    pub fn select_hosts(
        &self,
        host_type: HostType,
        scope: &DeploymentScope,
        profile: &WorkloadProfile,
        exclude: &mut ExcludeList,
        max_results: usize,
        consider_reserved: bool,
    ) -> Result<Vec<Host>> {
        if host_type != HostType::Routing {
            // only routing hosts run guests
            return Ok(Vec::new());
        }
        let candidates = candidate_hosts(&*self.inventory, &*self.tags, host_type, scope, profile);
        self.allocate_to(candidates, host_type, scope, profile, exclude, max_results, consider_reserved)
    }

    /// Same as [`select_hosts`](Self::select_hosts), but considers only the given hosts.
    pub fn select_hosts_from(
        &self,
        hosts: Vec<Host>,
        host_type: HostType,
        scope: &DeploymentScope,
        profile: &WorkloadProfile,
        exclude: &mut ExcludeList,
        max_results: usize,
        consider_reserved: bool,
    ) -> Result<Vec<Host>> {
        if host_type != HostType::Routing {
            return Ok(Vec::new());
        }
        let candidates = hosts.into_iter().filter(|h| h.in_scope(scope)).collect();
        self.allocate_to(candidates, host_type, scope, profile, exclude, max_results, consider_reserved)
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate_to(
        &self,
        candidates: Vec<Host>,
        host_type: HostType,
        scope: &DeploymentScope,
        profile: &WorkloadProfile,
        exclude: &mut ExcludeList,
        max_results: usize,
        consider_reserved: bool,
    ) -> Result<Vec<Host>> {
        let candidate_ids: HashSet<HostId> = candidates.iter().map(|h| h.id).collect();
        for host in self.inventory.list_up_and_enabled_non_ha_hosts(host_type, scope) {
            if !candidate_ids.contains(&host.id) {
                exclude.add_host(host.id, HostVerdict::NotInCandidateSet);
            }
        }
        // Excluded hosts must not reach the capacity oracle, including through ranking.
        let candidates: Vec<Host> = candidates.into_iter().filter(|h| !exclude.should_avoid_host(h)).collect();

        let input = RankingInput {
            account_id: profile.account_id,
            scope,
            order_by: self.config.capacity_order_resource,
            capacity: &*self.capacity,
            guests: &*self.guests,
        };
        let ranked = rank_hosts(
            self.config.allocation_algorithm,
            candidates,
            &input,
            &mut *self.rng.borrow_mut(),
        );
        log::debug!(
            target: COMPONENT,
            "{} hosts to check for allocation with {}: {:?}",
            ranked.len(),
            self.config.allocation_algorithm,
            ranked.iter().map(|h| h.id).collect::<Vec<_>>()
        );

        let prioritized = prioritize_hosts(
            ranked,
            &profile.template,
            profile.requests_gpu(),
            self.config.check_hvm,
            &*self.gpus,
        );
        if !prioritized.no_hvm_hosts.is_empty() {
            log::debug!(
                target: COMPONENT,
                "not considering hosts {:?} to deploy template {} as they are not HVM enabled",
                prioritized.no_hvm_hosts.iter().map(|h| h.id).collect::<Vec<_>>(),
                profile.template.id
            );
            for host in &prioritized.no_hvm_hosts {
                exclude.add_host(host.id, HostVerdict::HvmNotSupported);
            }
        }

        let mut suitable = Vec::new();
        for host in prioritized.hosts {
            if suitable.len() >= max_results {
                break;
            }
            if exclude.should_avoid_host(&host) {
                continue;
            }
            let verdict = self.check_host(&host, profile, consider_reserved)?;
            self.logger.borrow_mut().log_decision(COMPONENT, &host, verdict);
            if verdict == HostVerdict::Accepted {
                suitable.push(host);
            } else {
                exclude.add_host(host.id, verdict);
            }
        }
        log::debug!(
            target: COMPONENT,
            "found {} suitable hosts: {:?}",
            suitable.len(),
            suitable.iter().map(|h| h.id).collect::<Vec<_>>()
        );
        Ok(suitable)
    }

    /// Checks guest limit, GPU availability, CPU capability and capacity of a single host.
    fn check_host(&self, host: &Host, profile: &WorkloadProfile, consider_reserved: bool) -> Result<HostVerdict> {
        if self.capacity.reached_max_guest_limit(host.id) {
            return Ok(HostVerdict::MaxGuestsReached);
        }
        let offering = &profile.offering;
        if let Some(gpu) = &offering.gpu {
            if !self.gpus.is_gpu_available(host.id, &gpu.group_name, &gpu.vgpu_type) {
                return Ok(HostVerdict::GpuUnavailable);
            }
        }

        let ratios = OvercommitRatios::for_cluster(&*self.inventory, host.cluster_id)?;
        let has_capability = self
            .capacity
            .has_capability(host.id, offering.cpu_cores, offering.cpu_speed_mhz);
        let has_capacity = self.capacity.has_capacity(
            host.id,
            offering.required_cpu_mhz(),
            offering.required_ram_bytes(),
            consider_reserved,
            ratios.cpu,
            ratios.memory,
        );
        Ok(match (has_capability, has_capacity) {
            (true, true) => HostVerdict::Accepted,
            (false, _) => HostVerdict::NoCpuCapability,
            (true, false) => HostVerdict::NotEnoughCapacity,
        })
    }
}
