//! Dedication of zones, pods, clusters and hosts to accounts and domains.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::core::common::{AccountId, AffinityGroupId, DeploymentScope, DomainId, HostVerdict};
use crate::core::dedication::{
    AffinityGroup, ChangeSet, DedicatedResource, DedicationRegistry, DedicationStore, Owner, ResourceLevel,
    EXPLICIT_DEDICATION,
};
use crate::core::domain::{AccountDirectory, Domain, DomainDirectory};
use crate::core::error::{Error, Result};
use crate::core::exclude::ExcludeList;
use crate::core::guests::GuestIndex;
use crate::core::inventory::{Host, Inventory};

/// Filter for listing dedicated resources, unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct DedicationFilter {
    pub domain_id: Option<DomainId>,
    pub account_id: Option<AccountId>,
    pub affinity_group_id: Option<AffinityGroupId>,
}

/// Resource being dedicated together with its position in the hierarchy.
struct ResolvedResource {
    level: ResourceLevel,
    name: String,
    /// enclosing resources, nearest first
    ancestors: Vec<(ResourceLevel, u64)>,
    /// scope covering the resource, `None` for a host
    scope: Option<DeploymentScope>,
    /// hosts covered by the resource
    hosts: Vec<Host>,
}

/// Creates and releases dedication records while keeping the hierarchy consistent.
///
/// A resource may be dedicated to an owner only if every dedicated ancestor is usable by that owner: dedicated to
/// the same account, or to a domain (without account) containing the owner's domain. Dedicated descendants must
/// belong to the owner's domain subtree; those dedicated to exactly the same owner become redundant and are released
/// together with the new dedication. Descendants dedicated to anyone else are conflicts.
///
/// Each operation validates everything before touching state, then commits a single change set to the store. The
/// registry changes only after a successful commit. Methods take `&mut self`, so concurrent callers must share the
/// manager behind a lock, which serializes validation and commit.
pub struct DedicatedResourceManager {
    inventory: Rc<dyn Inventory>,
    domains: Rc<dyn DomainDirectory>,
    accounts: Rc<dyn AccountDirectory>,
    guests: Rc<dyn GuestIndex>,
    store: Box<dyn DedicationStore>,
    registry: DedicationRegistry,
}

impl DedicatedResourceManager {
    pub fn new(
        inventory: Rc<dyn Inventory>,
        domains: Rc<dyn DomainDirectory>,
        accounts: Rc<dyn AccountDirectory>,
        guests: Rc<dyn GuestIndex>,
        store: Box<dyn DedicationStore>,
    ) -> Self {
        Self {
            inventory,
            domains,
            accounts,
            guests,
            store,
            registry: DedicationRegistry::new(),
        }
    }

    /// Dedicates the resource to the account with the given name in the domain, or to the whole domain.
    ///
    /// If an ancestor is already dedicated to exactly the same owner, no new record is created and the ancestor
    /// record is returned.
    pub fn dedicate(
        &mut self,
        level: ResourceLevel,
        resource_id: u64,
        domain_id: DomainId,
        account_name: Option<&str>,
    ) -> Result<DedicatedResource> {
        let domain = self
            .domains
            .find_domain(domain_id)
            .ok_or_else(|| Error::InvalidParameter(format!("Unable to find domain by id {}", domain_id)))?;
        let account_id = match account_name {
            Some(name) => {
                let account = self.accounts.find_account(name, domain_id).ok_or_else(|| {
                    Error::InvalidParameter(format!("Unable to find account {} in domain {}", name, domain.name))
                })?;
                Some(account.id)
            }
            None => None,
        };
        let owner = Owner { domain_id, account_id };
        let resource = self.resolve(level, resource_id)?;

        if self.registry.find(level, resource_id).is_some() {
            log::error!("{} {} is already dedicated", level, resource.name);
            return Err(Error::AlreadyDedicated(format!("{} {}", level, resource.name)));
        }

        let child_domain_ids: BTreeSet<DomainId> = self.domains.child_domain_ids(domain_id).into_iter().collect();
        if let Some(covering) = self.check_ancestors(&resource, owner)? {
            log::info!(
                "{} {} is already covered by dedicated {} {}",
                level,
                resource.name,
                covering.level(),
                covering.resource_id()
            );
            return Ok(covering);
        }
        let to_release = self.check_descendants(&resource, owner, &child_domain_ids)?;
        self.check_host_workloads(&resource, owner, &child_domain_ids)?;

        let (group_id, created_group) = match self.registry.find_group_for_owner(owner) {
            Some(group) => (group.id, None),
            None => {
                let group = self.new_group(owner, account_name, &domain);
                (group.id, Some(group))
            }
        };
        let record = DedicatedResource::new(self.registry.next_record_id(), level, resource_id, owner, group_id);
        let changes = ChangeSet {
            deleted_groups: self.groups_emptied_by(&to_release, Some(group_id)),
            released: to_release,
            created_group,
            created: Some(record.clone()),
        };
        for released in &changes.released {
            log::info!(
                "releasing {} {} superseded by dedication of {} {}",
                released.level(),
                released.resource_id(),
                level,
                resource.name
            );
        }
        self.commit(changes, &format!("dedicate {}", level.to_string().to_lowercase()))?;
        log::info!("dedicated {} {} to {:?}", level, resource.name, owner);
        Ok(record)
    }

    /// Releases the dedication of the resource, deleting its affinity group if it was the last member.
    pub fn release(&mut self, level: ResourceLevel, resource_id: u64) -> Result<()> {
        let record = self
            .registry
            .find(level, resource_id)
            .cloned()
            .ok_or_else(|| Error::InvalidParameter("No Dedicated Resource available to release".to_string()))?;
        let changes = ChangeSet {
            deleted_groups: self.groups_emptied_by(std::slice::from_ref(&record), None),
            released: vec![record],
            ..Default::default()
        };
        self.commit(changes, &format!("release dedicated {}", level.to_string().to_lowercase()))?;
        log::info!("released dedicated {} {}", level, resource_id);
        Ok(())
    }

    pub fn find_by_level(&self, level: ResourceLevel, resource_id: u64) -> Option<&DedicatedResource> {
        self.registry.find(level, resource_id)
    }

    /// Lists dedicated resources of the level matching the filter.
    pub fn list(&self, level: ResourceLevel, filter: &DedicationFilter) -> Vec<&DedicatedResource> {
        self.registry
            .records()
            .filter(|r| r.level() == level)
            .filter(|r| filter.domain_id.map_or(true, |id| r.domain_id == id))
            .filter(|r| filter.account_id.map_or(true, |id| r.account_id == Some(id)))
            .filter(|r| filter.affinity_group_id.map_or(true, |id| r.affinity_group_id == id))
            .collect()
    }

    pub fn affinity_group(&self, group_id: AffinityGroupId) -> Option<&AffinityGroup> {
        self.registry.group(group_id)
    }

    pub fn affinity_groups(&self) -> Vec<&AffinityGroup> {
        self.registry.groups().collect()
    }

    /// Adds to the exclude list every host in scope covered by a dedication the owner may not use.
    pub fn exclude_foreign_dedications(&self, owner: Owner, scope: &DeploymentScope, exclude: &mut ExcludeList) {
        for host in self.inventory.list_hosts(scope) {
            let covering = [
                (ResourceLevel::Host, host.id),
                (ResourceLevel::Cluster, host.cluster_id),
                (ResourceLevel::Pod, host.pod_id),
                (ResourceLevel::Zone, host.zone_id),
            ];
            let foreign = covering
                .iter()
                .filter_map(|(level, id)| self.registry.find(*level, *id))
                .any(|dedicated| !self.is_usable_by(dedicated, owner));
            if foreign {
                exclude.add_host(host.id, HostVerdict::DedicatedToOtherOwner);
            }
        }
    }

    /// Checks whether workloads of the owner may run on the dedicated resource.
    fn is_usable_by(&self, dedicated: &DedicatedResource, owner: Owner) -> bool {
        match dedicated.account_id {
            Some(account_id) => owner.account_id == Some(account_id),
            None => self
                .domains
                .child_domain_ids(dedicated.domain_id)
                .contains(&owner.domain_id),
        }
    }

    fn resolve(&self, level: ResourceLevel, resource_id: u64) -> Result<ResolvedResource> {
        let not_found = || Error::InvalidParameter(format!("Unable to find {} by id {}", level, resource_id));
        let resolved = match level {
            ResourceLevel::Zone => {
                let zone = self.inventory.find_zone(resource_id).ok_or_else(not_found)?;
                let scope = DeploymentScope::zone(zone.id);
                ResolvedResource {
                    level,
                    name: zone.name,
                    ancestors: Vec::new(),
                    scope: Some(scope),
                    hosts: self.inventory.list_hosts(&scope),
                }
            }
            ResourceLevel::Pod => {
                let pod = self.inventory.find_pod(resource_id).ok_or_else(not_found)?;
                let scope = DeploymentScope::pod(pod.zone_id, pod.id);
                ResolvedResource {
                    level,
                    name: pod.name,
                    ancestors: vec![(ResourceLevel::Zone, pod.zone_id)],
                    scope: Some(scope),
                    hosts: self.inventory.list_hosts(&scope),
                }
            }
            ResourceLevel::Cluster => {
                let cluster = self.inventory.find_cluster(resource_id).ok_or_else(not_found)?;
                let scope = DeploymentScope::cluster(cluster.zone_id, cluster.pod_id, cluster.id);
                ResolvedResource {
                    level,
                    name: cluster.name,
                    ancestors: vec![(ResourceLevel::Pod, cluster.pod_id), (ResourceLevel::Zone, cluster.zone_id)],
                    scope: Some(scope),
                    hosts: self.inventory.list_hosts(&scope),
                }
            }
            ResourceLevel::Host => {
                let host = self.inventory.find_host(resource_id).ok_or_else(not_found)?;
                ResolvedResource {
                    level,
                    name: host.name.clone(),
                    ancestors: vec![
                        (ResourceLevel::Cluster, host.cluster_id),
                        (ResourceLevel::Pod, host.pod_id),
                        (ResourceLevel::Zone, host.zone_id),
                    ],
                    scope: None,
                    hosts: vec![host],
                }
            }
        };
        Ok(resolved)
    }

    fn resource_name(&self, level: ResourceLevel, id: u64) -> String {
        let name = match level {
            ResourceLevel::Zone => self.inventory.find_zone(id).map(|z| z.name),
            ResourceLevel::Pod => self.inventory.find_pod(id).map(|p| p.name),
            ResourceLevel::Cluster => self.inventory.find_cluster(id).map(|c| c.name),
            ResourceLevel::Host => self.inventory.find_host(id).map(|h| h.name),
        };
        name.unwrap_or_else(|| id.to_string())
    }

    /// Fails on an ancestor dedicated to an incompatible owner.
    /// Returns the nearest ancestor dedicated to the same owner.
    fn check_ancestors(&self, resource: &ResolvedResource, owner: Owner) -> Result<Option<DedicatedResource>> {
        let mut covering = None;
        for (level, id) in &resource.ancestors {
            let dedicated = match self.registry.find(*level, *id) {
                Some(dedicated) => dedicated,
                None => continue,
            };
            if dedicated.owner() == owner {
                if covering.is_none() {
                    covering = Some(dedicated.clone());
                }
            } else if !self.is_usable_by(dedicated, owner) {
                let name = self.resource_name(*level, *id);
                log::error!(
                    "Cannot dedicate {} {}. Its {} {} is already dedicated",
                    resource.level,
                    resource.name,
                    level,
                    name
                );
                return Err(Error::Conflict(format!(
                    "{}'s {} {} is already dedicated",
                    resource.level, level, name
                )));
            }
        }
        Ok(covering)
    }

    /// Returns dedicated descendants made redundant by the new dedication, fails on foreign ones.
    fn check_descendants(
        &self,
        resource: &ResolvedResource,
        owner: Owner,
        child_domain_ids: &BTreeSet<DomainId>,
    ) -> Result<Vec<DedicatedResource>> {
        let mut to_release = Vec::new();
        for (level, id) in self.descendants(resource) {
            let dedicated = match self.registry.find(level, id) {
                Some(dedicated) => dedicated,
                None => continue,
            };
            let name = self.resource_name(level, id);
            if !child_domain_ids.contains(&dedicated.domain_id) {
                log::error!(
                    "{} {} under {} {} is being used by other domain(s)",
                    level,
                    name,
                    resource.level,
                    resource.name
                );
                return Err(Error::Conflict(format!(
                    "{} {} under this {} {} is being used by other domain(s)",
                    level, name, resource.level, resource.name
                )));
            }
            let redundant = match owner.account_id {
                Some(_) => dedicated.account_id == owner.account_id,
                None => dedicated.account_id.is_none() && dedicated.domain_id == owner.domain_id,
            };
            if !redundant {
                log::error!(
                    "{} {} under {} {} is dedicated to different account/domain",
                    level,
                    name,
                    resource.level,
                    resource.name
                );
                return Err(Error::Conflict(format!(
                    "{} {} under this {} {} is dedicated to different account/domain",
                    level, name, resource.level, resource.name
                )));
            }
            to_release.push(dedicated.clone());
        }
        Ok(to_release)
    }

    /// Lists pods, clusters and hosts below the resource.
    fn descendants(&self, resource: &ResolvedResource) -> Vec<(ResourceLevel, u64)> {
        let scope = match &resource.scope {
            Some(scope) => scope,
            None => return Vec::new(),
        };
        let mut result = Vec::new();
        if resource.level == ResourceLevel::Zone {
            result.extend(self.inventory.list_pods(scope.zone_id).iter().map(|p| (ResourceLevel::Pod, p.id)));
        }
        if resource.level < ResourceLevel::Cluster {
            result.extend(self.inventory.list_clusters(scope).iter().map(|c| (ResourceLevel::Cluster, c.id)));
        }
        result.extend(resource.hosts.iter().map(|h| (ResourceLevel::Host, h.id)));
        result
    }

    /// Fails if a covered host runs user workloads of another account (or another domain subtree).
    fn check_host_workloads(
        &self,
        resource: &ResolvedResource,
        owner: Owner,
        child_domain_ids: &BTreeSet<DomainId>,
    ) -> Result<()> {
        for host in &resource.hosts {
            for guest in self.guests.list_active_user_guests(host.id) {
                let (foreign, kind) = match owner.account_id {
                    Some(account_id) => (guest.account_id != account_id, "account"),
                    None => (!child_domain_ids.contains(&guest.domain_id), "domain"),
                };
                if foreign {
                    log::info!(
                        "Host {} is unsuitable for explicit dedication as it runs instance {} of another {}",
                        host.name,
                        guest.id,
                        kind
                    );
                    return Err(Error::Conflict(format!(
                        "Host {} is unsuitable for explicit dedication as it runs instances of another {}",
                        host.name, kind
                    )));
                }
            }
        }
        Ok(())
    }

    fn new_group(&self, owner: Owner, account_name: Option<&str>, domain: &Domain) -> AffinityGroup {
        let name = match account_name {
            Some(account_name) => format!("DedicatedGrp-{}", account_name),
            None => format!("DedicatedGrp-domain-{}", domain.name),
        };
        AffinityGroup {
            id: self.registry.next_group_id(),
            name,
            group_type: EXPLICIT_DEDICATION.to_string(),
            description: "dedicated resources group".to_string(),
            domain_id: owner.domain_id,
            account_id: owner.account_id,
        }
    }

    /// Returns groups left without members once the records are released, except the group being kept.
    fn groups_emptied_by(&self, released: &[DedicatedResource], keep: Option<AffinityGroupId>) -> Vec<AffinityGroup> {
        let released_ids: BTreeSet<u64> = released.iter().map(|r| r.id).collect();
        let group_ids: BTreeSet<AffinityGroupId> = released.iter().map(|r| r.affinity_group_id).collect();
        group_ids
            .into_iter()
            .filter(|id| Some(*id) != keep)
            .filter(|id| {
                self.registry
                    .list_by_group(*id)
                    .iter()
                    .all(|r| released_ids.contains(&r.id))
            })
            .filter_map(|id| self.registry.group(id).cloned())
            .collect()
    }

    /// Commits the change set to the store, then applies it to the registry.
    fn commit(&mut self, changes: ChangeSet, operation: &str) -> Result<()> {
        if let Err(e) = self.store.commit(&changes) {
            log::error!("Unable to {} due to {}, changes: {:?}", operation, e, changes);
            return Err(Error::Persistence(operation.to_string()));
        }
        self.registry.apply(&changes);
        Ok(())
    }
}
