//! Identifiers and small enums shared by the allocators and the dedication registry.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Serialize;

use crate::core::error::Error;

pub type ZoneId = u64;
pub type PodId = u64;
pub type ClusterId = u64;
pub type HostId = u64;
pub type DomainId = u64;
pub type AccountId = u64;
pub type GuestId = u64;
pub type TemplateId = u64;
pub type AffinityGroupId = u64;

/// Host type. Only routing (compute) hosts can run guest workloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum HostType {
    Routing,
    Storage,
    SecondaryStorage,
    ConsoleProxy,
}

/// Resource kind of a capacity record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CapacityKind {
    Cpu,
    Memory,
}

impl FromStr for CapacityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(CapacityKind::Cpu),
            "RAM" | "MEMORY" => Ok(CapacityKind::Memory),
            _ => Err(Error::Configuration(format!("unknown capacity kind: {}", s))),
        }
    }
}

impl Display for CapacityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityKind::Cpu => write!(f, "CPU"),
            CapacityKind::Memory => write!(f, "RAM"),
        }
    }
}

/// Part of the zone -> pod -> cluster hierarchy a placement request is restricted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeploymentScope {
    pub zone_id: ZoneId,
    pub pod_id: Option<PodId>,
    pub cluster_id: Option<ClusterId>,
}

impl DeploymentScope {
    pub fn zone(zone_id: ZoneId) -> Self {
        Self {
            zone_id,
            pod_id: None,
            cluster_id: None,
        }
    }

    pub fn pod(zone_id: ZoneId, pod_id: PodId) -> Self {
        Self {
            zone_id,
            pod_id: Some(pod_id),
            cluster_id: None,
        }
    }

    pub fn cluster(zone_id: ZoneId, pod_id: PodId, cluster_id: ClusterId) -> Self {
        Self {
            zone_id,
            pod_id: Some(pod_id),
            cluster_id: Some(cluster_id),
        }
    }

    /// Checks whether a resource located at the given position belongs to this scope.
    pub fn contains(&self, zone_id: ZoneId, pod_id: PodId, cluster_id: ClusterId) -> bool {
        self.zone_id == zone_id
            && self.pod_id.map_or(true, |id| id == pod_id)
            && self.cluster_id.map_or(true, |id| id == cluster_id)
    }
}

/// Outcome of checking a single host during placement.
///
/// Everything except `Accepted` means the host is unsuitable for the current plan. None of these is an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum HostVerdict {
    Accepted,
    NotInCandidateSet,
    HvmNotSupported,
    MaxGuestsReached,
    GpuUnavailable,
    NoCpuCapability,
    NotEnoughCapacity,
    DedicatedToOtherOwner,
}

impl Display for HostVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HostVerdict::Accepted => "accepted",
            HostVerdict::NotInCandidateSet => "not in candidate set",
            HostVerdict::HvmNotSupported => "HVM not supported",
            HostVerdict::MaxGuestsReached => "max guest limit reached",
            HostVerdict::GpuUnavailable => "requested GPU unavailable",
            HostVerdict::NoCpuCapability => "no CPU capability",
            HostVerdict::NotEnoughCapacity => "not enough capacity",
            HostVerdict::DedicatedToOtherOwner => "dedicated to other owner",
        };
        write!(f, "{}", s)
    }
}
