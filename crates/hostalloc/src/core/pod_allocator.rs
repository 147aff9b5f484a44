//! Pod allocator choosing a pod, not a host, for legacy placement requests.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::core::capacity::{CapacityOracle, CapacityRecord};
use crate::core::common::{AccountId, CapacityKind, DeploymentScope, HostId, PodId, TemplateId, ZoneId};
use crate::core::config::AllocatorConfig;
use crate::core::guests::{Guest, GuestIndex, GuestState, GuestType};
use crate::core::inventory::{Inventory, Pod};
use crate::core::workload::{ServiceOffering, Template};

/// Answers where templates are stored.
pub trait TemplateIndex {
    fn is_template_available_in_pod(&self, template_id: TemplateId, zone_id: ZoneId, pod_id: PodId) -> bool;
}

/// Template index reporting every template as available in every pod.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateEverywhere;

impl TemplateIndex for TemplateEverywhere {
    fn is_template_available_in_pod(&self, _template_id: TemplateId, _zone_id: ZoneId, _pod_id: PodId) -> bool {
        true
    }
}

/// Chosen pod and a host in it which had enough capacity.
#[derive(Clone, Debug, PartialEq)]
pub struct PodSelection {
    pub pod: Pod,
    pub host_hint: Option<HostId>,
}

/// Selects a pod with enough capacity for a workload.
///
/// Capacity is evaluated with the static allocation model: the used amount of a host is the sum of reservations
/// of guests last placed on it, ignoring guests which are gone or stopped for too long. This model does not look at
/// reserved capacity of the capacity oracle at all.
pub struct PodAllocator {
    config: AllocatorConfig,
    inventory: Rc<dyn Inventory>,
    capacity: Rc<dyn CapacityOracle>,
    guests: Rc<dyn GuestIndex>,
    templates: Rc<dyn TemplateIndex>,
    rng: RefCell<Pcg64>,
}

impl PodAllocator {
    pub fn new(
        config: AllocatorConfig,
        inventory: Rc<dyn Inventory>,
        capacity: Rc<dyn CapacityOracle>,
        guests: Rc<dyn GuestIndex>,
        templates: Rc<dyn TemplateIndex>,
    ) -> Self {
        let rng = Pcg64::seed_from_u64(config.random_seed);
        Self {
            config,
            inventory,
            capacity,
            guests,
            templates,
            rng: RefCell::new(rng),
        }
    }

    /// Returns a pod of the zone able to run the workload, or `None` if there is no such pod.
    ///
    /// A suitable pod already holding guests or volumes of the account is returned right away,
    /// otherwise a random suitable pod is chosen. `now` is the current time in seconds,
    /// used to age stopped and destroyed guests.
    pub fn select_pod(
        &self,
        template: Option<&Template>,
        offering: Option<&ServiceOffering>,
        zone_id: ZoneId,
        account_id: AccountId,
        avoid_pods: &BTreeSet<PodId>,
        now: f64,
    ) -> Option<PodSelection> {
        let mut available = Vec::new();
        for pod in self.inventory.list_pods(zone_id) {
            if avoid_pods.contains(&pod.id) {
                continue;
            }
            if let Some(template) = template {
                if !self.templates.is_template_available_in_pod(template.id, zone_id, pod.id) {
                    log::debug!("template {} is not available in pod {}", template.id, pod.id);
                    continue;
                }
            }
            let host_hint = match offering {
                Some(offering) => match self.pod_capacity_hint(&pod, offering, now) {
                    Some(host_id) => Some(host_id),
                    None => {
                        log::debug!("pod {} does not have enough capacity", pod.id);
                        continue;
                    }
                },
                None => None,
            };
            if self.guests.account_has_footprint_in_pod(account_id, pod.id) {
                log::debug!("account {} already uses pod {}", account_id, pod.id);
                return Some(PodSelection { pod, host_hint });
            }
            available.push(PodSelection { pod, host_hint });
        }

        let selected = available.choose(&mut *self.rng.borrow_mut()).cloned();
        match &selected {
            Some(selection) => log::debug!("selected pod {} in zone {}", selection.pod.id, zone_id),
            None => log::debug!("no suitable pod found in zone {}", zone_id),
        }
        selected
    }

    /// Checks memory, then CPU. Returns the host of the first CPU row with enough room.
    fn pod_capacity_hint(&self, pod: &Pod, offering: &ServiceOffering, now: f64) -> Option<HostId> {
        let scope = DeploymentScope::pod(pod.zone_id, pod.id);
        let (memory_total, memory_used) = self.capacity.aggregate_capacity(&scope, CapacityKind::Memory);
        let (cpu_total, cpu_used) = self.capacity.aggregate_capacity(&scope, CapacityKind::Cpu);
        log::trace!(
            "pod {}: memory {}/{} bytes, cpu {}/{} MHz",
            pod.id,
            memory_used,
            memory_total,
            cpu_used,
            cpu_total
        );
        self.first_row_with_room(&scope, CapacityKind::Memory, offering.required_ram_bytes(), now)?;
        self.first_row_with_room(&scope, CapacityKind::Cpu, offering.required_cpu_mhz(), now)
    }

    fn first_row_with_room(
        &self,
        scope: &DeploymentScope,
        kind: CapacityKind,
        needed: u64,
        now: f64,
    ) -> Option<HostId> {
        self.capacity
            .list_capacity(scope, kind)
            .iter()
            .find(|row| self.static_used(row, now) + needed <= row.total)
            .map(|row| row.host_id)
    }

    /// Sums reservations of guests counted against the host of the capacity row.
    fn static_used(&self, row: &CapacityRecord, now: f64) -> u64 {
        self.guests
            .list_by_last_host(row.host_id)
            .iter()
            .filter(|guest| !self.skip_guest(guest, now))
            .map(|guest| match row.kind {
                CapacityKind::Cpu => guest.cpu_mhz,
                CapacityKind::Memory => guest.ram_bytes,
            })
            .sum()
    }

    fn skip_guest(&self, guest: &Guest, now: f64) -> bool {
        let elapsed = now - guest.update_time;
        match guest.state {
            GuestState::Expunging => true,
            GuestState::Destroyed if guest.guest_type != GuestType::User => true,
            GuestState::Destroyed => elapsed > self.config.destroyed_vm_skip_window,
            GuestState::Stopped => elapsed > self.config.stopped_vm_skip_window,
            _ => false,
        }
    }
}
