//! Guest workloads already known to the cloud.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::common::{AccountId, ClusterId, DeploymentScope, DomainId, GuestId, HostId, PodId, ZoneId};
use crate::core::inventory::Host;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Migrating,
    Destroyed,
    Expunging,
    Error,
}

impl GuestState {
    /// Guest occupies its host right now.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            GuestState::Starting | GuestState::Running | GuestState::Stopping | GuestState::Migrating
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestType {
    User,
    DomainRouter,
    ConsoleProxy,
    SecondaryStorageVm,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Guest {
    pub id: GuestId,
    pub guest_type: GuestType,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub zone_id: ZoneId,
    pub pod_id: Option<PodId>,
    /// host the guest currently runs on
    pub host_id: Option<HostId>,
    /// host the guest ran on most recently, kept after the guest stops
    pub last_host_id: Option<HostId>,
    pub state: GuestState,
    /// time of the last state change, in seconds
    pub update_time: f64,
    pub cpu_mhz: u64,
    pub ram_bytes: u64,
}

impl Guest {
    /// Creates a running user guest placed on the given host.
    pub fn running(
        id: GuestId,
        account_id: AccountId,
        domain_id: DomainId,
        zone_id: ZoneId,
        pod_id: PodId,
        host_id: HostId,
    ) -> Self {
        Self {
            id,
            guest_type: GuestType::User,
            account_id,
            domain_id,
            zone_id,
            pod_id: Some(pod_id),
            host_id: Some(host_id),
            last_host_id: Some(host_id),
            state: GuestState::Running,
            update_time: 0.,
            cpu_mhz: 0,
            ram_bytes: 0,
        }
    }

    pub fn with_resources(mut self, cpu_mhz: u64, ram_bytes: u64) -> Self {
        self.cpu_mhz = cpu_mhz;
        self.ram_bytes = ram_bytes;
        self
    }

    /// Moves the guest to the given state. Inactive guests leave their host but keep it as the last host.
    pub fn with_state(mut self, state: GuestState, update_time: f64) -> Self {
        self.state = state;
        self.update_time = update_time;
        if !state.is_active() {
            self.host_id = None;
        }
        self
    }
}

/// Read access to guest records.
pub trait GuestIndex {
    /// Returns active user guests currently placed on the host.
    fn list_active_user_guests(&self, host_id: HostId) -> Vec<Guest>;

    /// Returns guests of any state whose last host is the given one.
    fn list_by_last_host(&self, host_id: HostId) -> Vec<Guest>;

    /// Returns the number of active guests of the account on each host in scope. Hosts without such guests are absent.
    fn count_active_by_host(&self, account_id: AccountId, scope: &DeploymentScope) -> HashMap<HostId, usize>;

    /// Checks whether the account has guests or volumes in the pod.
    fn account_has_footprint_in_pod(&self, account_id: AccountId, pod_id: PodId) -> bool;
}

/// Guest records kept in memory.
#[derive(Default)]
pub struct InMemoryGuestIndex {
    guests: BTreeMap<GuestId, Guest>,
    host_locations: HashMap<HostId, (ZoneId, PodId, ClusterId)>,
    volumes: BTreeSet<(AccountId, PodId)>,
}

impl InMemoryGuestIndex {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_guest(&mut self, guest: Guest) {
        self.guests.insert(guest.id, guest);
    }

    /// Registers host position, needed for scoped counting.
    pub fn add_host(&mut self, host: &Host) {
        self.host_locations
            .insert(host.id, (host.zone_id, host.pod_id, host.cluster_id));
    }

    /// Registers a volume of the account stored in the pod.
    pub fn add_volume(&mut self, account_id: AccountId, pod_id: PodId) {
        self.volumes.insert((account_id, pod_id));
    }
}

impl GuestIndex for InMemoryGuestIndex {
    fn list_active_user_guests(&self, host_id: HostId) -> Vec<Guest> {
        self.guests
            .values()
            .filter(|g| g.guest_type == GuestType::User && g.state.is_active() && g.host_id == Some(host_id))
            .cloned()
            .collect()
    }

    fn list_by_last_host(&self, host_id: HostId) -> Vec<Guest> {
        self.guests
            .values()
            .filter(|g| g.last_host_id == Some(host_id))
            .cloned()
            .collect()
    }

    fn count_active_by_host(&self, account_id: AccountId, scope: &DeploymentScope) -> HashMap<HostId, usize> {
        let mut counts = HashMap::new();
        for guest in self.guests.values() {
            if guest.account_id != account_id || !guest.state.is_active() {
                continue;
            }
            if let Some(host_id) = guest.host_id {
                let in_scope = self
                    .host_locations
                    .get(&host_id)
                    .map_or(false, |(zone, pod, cluster)| scope.contains(*zone, *pod, *cluster));
                if in_scope {
                    *counts.entry(host_id).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    fn account_has_footprint_in_pod(&self, account_id: AccountId, pod_id: PodId) -> bool {
        self.volumes.contains(&(account_id, pod_id))
            || self.guests.values().any(|g| {
                g.account_id == account_id
                    && g.pod_id == Some(pod_id)
                    && !matches!(g.state, GuestState::Destroyed | GuestState::Expunging)
            })
    }
}
