//! Candidate host selection by HA tag, offering tag and template tag.

use std::collections::HashSet;

use crate::core::common::{DeploymentScope, HostId, HostType};
use crate::core::inventory::{Host, Inventory, TagIndex};
use crate::core::workload::WorkloadProfile;

/// Host tag rule: `|` separated alternatives, each either an exact tag or a prefix ending with `*`.
///
/// `*` alone accepts every offering tag.
#[derive(Clone, Debug, PartialEq)]
pub struct TagRule {
    alternatives: Vec<Pattern>,
}

#[derive(Clone, Debug, PartialEq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

impl TagRule {
    pub fn parse(rule: &str) -> Self {
        let alternatives = rule
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_suffix('*') {
                Some(prefix) => Pattern::Prefix(prefix.to_string()),
                None => Pattern::Exact(s.to_string()),
            })
            .collect();
        Self { alternatives }
    }

    pub fn matches(&self, offering_tag: &str) -> bool {
        self.alternatives.iter().any(|p| match p {
            Pattern::Exact(tag) => tag == offering_tag,
            Pattern::Prefix(prefix) => offering_tag.starts_with(prefix.as_str()),
        })
    }
}

/// Returns hosts in scope the workload may be placed on according to its tags.
///
/// The HA tag, if set, overrides everything else. Without tags every up and enabled non-HA host qualifies.
/// When both offering and template tags are set, the two host sets are looked up independently and intersected.
pub fn candidate_hosts(
    inventory: &dyn Inventory,
    tags: &dyn TagIndex,
    host_type: HostType,
    scope: &DeploymentScope,
    profile: &WorkloadProfile,
) -> Vec<Host> {
    let offering_tag = profile.offering.host_tag.as_deref();
    let template_tag = profile.template.tag.as_deref();

    let ids = if let Some(ha_tag) = profile.ha_tag.as_deref() {
        tags.hosts_with_tag(host_type, scope, ha_tag)
    } else {
        match (offering_tag, template_tag) {
            (None, None) => return inventory.list_up_and_enabled_non_ha_hosts(host_type, scope),
            (Some(offering_tag), None) => hosts_matching_offering_tag(inventory, tags, host_type, scope, offering_tag),
            (None, Some(template_tag)) => tags.hosts_with_tag(host_type, scope, template_tag),
            (Some(offering_tag), Some(template_tag)) => {
                let by_offering = hosts_matching_offering_tag(inventory, tags, host_type, scope, offering_tag);
                let by_template: HashSet<HostId> =
                    tags.hosts_with_tag(host_type, scope, template_tag).into_iter().collect();
                by_offering.into_iter().filter(|id| by_template.contains(id)).collect()
            }
        }
    };

    let regular = profile.ha_tag.is_none();
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(*id))
        .filter_map(|id| inventory.find_host(id))
        .filter(|host| !(regular && host.ha_reserved))
        .collect()
}

/// Exact tag matches plus in-scope hosts whose tag rules accept the offering tag.
fn hosts_matching_offering_tag(
    inventory: &dyn Inventory,
    tags: &dyn TagIndex,
    host_type: HostType,
    scope: &DeploymentScope,
    offering_tag: &str,
) -> Vec<HostId> {
    let mut result = tags.hosts_with_tag(host_type, scope, offering_tag);
    for id in tags.hosts_with_rule_matching_offering_tag(offering_tag) {
        if result.contains(&id) {
            continue;
        }
        // rule lookups are not scoped
        if let Some(host) = inventory.find_host(id) {
            if host.host_type == host_type && host.in_scope(scope) && host.is_available() {
                result.push(id);
            }
        }
    }
    result
}
