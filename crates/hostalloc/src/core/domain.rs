//! Domain hierarchy and accounts.

use std::collections::BTreeMap;

use crate::core::common::{AccountId, DomainId};
use crate::core::error::{Error, Result};

pub const ROOT_DOMAIN_ID: DomainId = 1;

/// Domain record. The path lists domain names from the root, e.g. `/Org/Team/`; the root domain path is `/`.
#[derive(Clone, Debug, PartialEq)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    pub path: String,
    pub parent_id: Option<DomainId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub domain_id: DomainId,
}

/// Read-only domain hierarchy.
pub trait DomainDirectory {
    fn find_domain(&self, id: DomainId) -> Option<Domain>;

    /// Returns the domain and all of its descendants. Empty if the domain is unknown.
    fn child_domain_ids(&self, id: DomainId) -> Vec<DomainId>;
}

pub trait AccountDirectory {
    fn find_account(&self, name: &str, domain_id: DomainId) -> Option<Account>;
}

/// Domains and accounts kept in memory. Descendants are found by path prefix.
pub struct DomainTree {
    domains: BTreeMap<DomainId, Domain>,
    accounts: BTreeMap<AccountId, Account>,
}

impl Default for DomainTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainTree {
    /// Creates tree with the root domain only.
    pub fn new() -> Self {
        let mut domains = BTreeMap::new();
        domains.insert(
            ROOT_DOMAIN_ID,
            Domain {
                id: ROOT_DOMAIN_ID,
                name: "ROOT".to_string(),
                path: "/".to_string(),
                parent_id: None,
            },
        );
        Self {
            domains,
            accounts: BTreeMap::new(),
        }
    }

    /// Adds domain under the given parent.
    pub fn add_domain(&mut self, id: DomainId, name: &str, parent_id: DomainId) -> Result<()> {
        if self.domains.contains_key(&id) {
            return Err(Error::InvalidParameter(format!("domain with id {} already exists", id)));
        }
        let parent = self
            .domains
            .get(&parent_id)
            .ok_or_else(|| Error::InvalidParameter(format!("unable to find parent domain by id {}", parent_id)))?;
        let path = format!("{}{}/", parent.path, name);
        if self.domains.values().any(|d| d.path == path) {
            return Err(Error::InvalidParameter(format!("domain {} already exists", path)));
        }
        self.domains.insert(
            id,
            Domain {
                id,
                name: name.to_string(),
                path,
                parent_id: Some(parent_id),
            },
        );
        Ok(())
    }

    pub fn add_account(&mut self, id: AccountId, name: &str, domain_id: DomainId) -> Result<()> {
        if !self.domains.contains_key(&domain_id) {
            return Err(Error::InvalidParameter(format!("unable to find domain by id {}", domain_id)));
        }
        self.accounts.insert(
            id,
            Account {
                id,
                name: name.to_string(),
                domain_id,
            },
        );
        Ok(())
    }
}

impl DomainDirectory for DomainTree {
    fn find_domain(&self, id: DomainId) -> Option<Domain> {
        self.domains.get(&id).cloned()
    }

    fn child_domain_ids(&self, id: DomainId) -> Vec<DomainId> {
        match self.domains.get(&id) {
            Some(domain) => self
                .domains
                .values()
                .filter(|d| d.path.starts_with(&domain.path))
                .map(|d| d.id)
                .collect(),
            None => Vec::new(),
        }
    }
}

impl AccountDirectory for DomainTree {
    fn find_account(&self, name: &str, domain_id: DomainId) -> Option<Account> {
        self.accounts
            .values()
            .find(|a| a.name == name && a.domain_id == domain_id)
            .cloned()
    }
}
