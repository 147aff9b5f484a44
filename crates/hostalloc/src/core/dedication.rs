//! Dedicated resource records, dedication affinity groups and their registry.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::core::common::{AccountId, AffinityGroupId, ClusterId, DomainId, HostId, PodId, ZoneId};
use crate::core::error::StoreError;

/// Affinity group type holding dedication records.
pub const EXPLICIT_DEDICATION: &str = "ExplicitDedication";

/// Level of the zone -> pod -> cluster -> host hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceLevel {
    Zone,
    Pod,
    Cluster,
    Host,
}

impl Display for ResourceLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceLevel::Zone => "Zone",
            ResourceLevel::Pod => "Pod",
            ResourceLevel::Cluster => "Cluster",
            ResourceLevel::Host => "Host",
        };
        write!(f, "{}", s)
    }
}

/// Exclusive owner of a dedicated resource: an account, or a whole domain when `account_id` is `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Owner {
    pub domain_id: DomainId,
    pub account_id: Option<AccountId>,
}

/// Dedication of exactly one zone, pod, cluster or host.
#[derive(Clone, Debug, PartialEq)]
pub struct DedicatedResource {
    pub id: u64,
    pub zone_id: Option<ZoneId>,
    pub pod_id: Option<PodId>,
    pub cluster_id: Option<ClusterId>,
    pub host_id: Option<HostId>,
    pub domain_id: DomainId,
    pub account_id: Option<AccountId>,
    pub affinity_group_id: AffinityGroupId,
}

impl DedicatedResource {
    pub fn new(
        id: u64,
        level: ResourceLevel,
        resource_id: u64,
        owner: Owner,
        affinity_group_id: AffinityGroupId,
    ) -> Self {
        let mut record = Self {
            id,
            zone_id: None,
            pod_id: None,
            cluster_id: None,
            host_id: None,
            domain_id: owner.domain_id,
            account_id: owner.account_id,
            affinity_group_id,
        };
        match level {
            ResourceLevel::Zone => record.zone_id = Some(resource_id),
            ResourceLevel::Pod => record.pod_id = Some(resource_id),
            ResourceLevel::Cluster => record.cluster_id = Some(resource_id),
            ResourceLevel::Host => record.host_id = Some(resource_id),
        }
        record
    }

    pub fn level(&self) -> ResourceLevel {
        if self.zone_id.is_some() {
            ResourceLevel::Zone
        } else if self.pod_id.is_some() {
            ResourceLevel::Pod
        } else if self.cluster_id.is_some() {
            ResourceLevel::Cluster
        } else {
            ResourceLevel::Host
        }
    }

    pub fn resource_id(&self) -> u64 {
        self.zone_id
            .or(self.pod_id)
            .or(self.cluster_id)
            .or(self.host_id)
            .unwrap_or_default()
    }

    pub fn owner(&self) -> Owner {
        Owner {
            domain_id: self.domain_id,
            account_id: self.account_id,
        }
    }
}

/// Group of all dedication records of one owner.
#[derive(Clone, Debug, PartialEq)]
pub struct AffinityGroup {
    pub id: AffinityGroupId,
    pub name: String,
    pub group_type: String,
    pub description: String,
    pub domain_id: DomainId,
    pub account_id: Option<AccountId>,
}

impl AffinityGroup {
    pub fn owner(&self) -> Owner {
        Owner {
            domain_id: self.domain_id,
            account_id: self.account_id,
        }
    }
}

/// Mutations of one dedicate or release operation, applied all together or not at all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub released: Vec<DedicatedResource>,
    pub deleted_groups: Vec<AffinityGroup>,
    pub created_group: Option<AffinityGroup>,
    pub created: Option<DedicatedResource>,
}

/// Durable side of the registry.
///
/// `commit` must persist the whole change set atomically or fail without persisting anything.
pub trait DedicationStore {
    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StoreError>;
}

/// Store keeping committed change sets in memory.
#[derive(Default)]
pub struct InMemoryDedicationStore {
    committed: Vec<ChangeSet>,
    failure: Option<String>,
}

impl InMemoryDedicationStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes the next commit fail with the given message.
    pub fn fail_next_commit(&mut self, message: &str) {
        self.failure = Some(message.to_string());
    }

    pub fn committed(&self) -> &[ChangeSet] {
        &self.committed
    }
}

impl DedicationStore for InMemoryDedicationStore {
    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StoreError> {
        if let Some(message) = self.failure.take() {
            return Err(StoreError::Unavailable(message));
        }
        self.committed.push(changes.clone());
        Ok(())
    }
}

/// Current dedication records and affinity groups.
#[derive(Clone, Debug)]
pub struct DedicationRegistry {
    records: BTreeMap<u64, DedicatedResource>,
    groups: BTreeMap<AffinityGroupId, AffinityGroup>,
    next_record_id: u64,
    next_group_id: AffinityGroupId,
}

impl Default for DedicationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DedicationRegistry {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            groups: BTreeMap::new(),
            next_record_id: 1,
            next_group_id: 1,
        }
    }

    pub fn find(&self, level: ResourceLevel, resource_id: u64) -> Option<&DedicatedResource> {
        self.records
            .values()
            .find(|r| r.level() == level && r.resource_id() == resource_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &DedicatedResource> {
        self.records.values()
    }

    pub fn list_by_group(&self, group_id: AffinityGroupId) -> Vec<&DedicatedResource> {
        self.records
            .values()
            .filter(|r| r.affinity_group_id == group_id)
            .collect()
    }

    pub fn group(&self, group_id: AffinityGroupId) -> Option<&AffinityGroup> {
        self.groups.get(&group_id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &AffinityGroup> {
        self.groups.values()
    }

    pub fn find_group_for_owner(&self, owner: Owner) -> Option<&AffinityGroup> {
        self.groups
            .values()
            .find(|g| g.group_type == EXPLICIT_DEDICATION && g.owner() == owner)
    }

    /// Returns ID to be used by the next created record.
    pub fn next_record_id(&self) -> u64 {
        self.next_record_id
    }

    /// Returns ID to be used by the next created group.
    pub fn next_group_id(&self) -> AffinityGroupId {
        self.next_group_id
    }

    /// Applies committed changes.
    pub fn apply(&mut self, changes: &ChangeSet) {
        for record in &changes.released {
            self.records.remove(&record.id);
        }
        for group in &changes.deleted_groups {
            self.groups.remove(&group.id);
        }
        if let Some(group) = &changes.created_group {
            self.next_group_id = self.next_group_id.max(group.id + 1);
            self.groups.insert(group.id, group.clone());
        }
        if let Some(record) = &changes.created {
            self.next_record_id = self.next_record_id.max(record.id + 1);
            self.records.insert(record.id, record.clone());
        }
    }
}
