//! Workload profile passed to the allocators.

use crate::core::common::{AccountId, TemplateId};

/// GPU requested by a service offering.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuRequest {
    pub group_name: String,
    pub vgpu_type: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceOffering {
    pub cpu_cores: u32,
    pub cpu_speed_mhz: u32,
    pub ram_mb: u64,
    pub host_tag: Option<String>,
    pub gpu: Option<GpuRequest>,
}

impl ServiceOffering {
    pub fn new(cpu_cores: u32, cpu_speed_mhz: u32, ram_mb: u64) -> Self {
        Self {
            cpu_cores,
            cpu_speed_mhz,
            ram_mb,
            host_tag: None,
            gpu: None,
        }
    }

    pub fn with_host_tag(mut self, tag: &str) -> Self {
        self.host_tag = Some(tag.to_string());
        self
    }

    pub fn with_gpu(mut self, group_name: &str, vgpu_type: &str) -> Self {
        self.gpu = Some(GpuRequest {
            group_name: group_name.to_string(),
            vgpu_type: vgpu_type.to_string(),
        });
        self
    }

    /// Total CPU requested, cores times per-core speed.
    pub fn required_cpu_mhz(&self) -> u64 {
        self.cpu_cores as u64 * self.cpu_speed_mhz as u64
    }

    pub fn required_ram_bytes(&self) -> u64 {
        self.ram_mb * 1024 * 1024
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub id: TemplateId,
    pub tag: Option<String>,
    pub requires_hvm: bool,
    pub guest_os_category: Option<String>,
}

impl Template {
    pub fn new(id: TemplateId) -> Self {
        Self {
            id,
            tag: None,
            requires_hvm: false,
            guest_os_category: None,
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn requiring_hvm(mut self) -> Self {
        self.requires_hvm = true;
        self
    }

    pub fn with_guest_os_category(mut self, category: &str) -> Self {
        self.guest_os_category = Some(category.to_string());
        self
    }
}

/// Everything the host allocator needs to know about the workload being placed.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadProfile {
    pub account_id: Option<AccountId>,
    pub offering: ServiceOffering,
    pub template: Template,
    /// set when re-placing a workload after host failure, overrides all other tags
    pub ha_tag: Option<String>,
}

impl WorkloadProfile {
    pub fn new(account_id: Option<AccountId>, offering: ServiceOffering, template: Template) -> Self {
        Self {
            account_id,
            offering,
            template,
            ha_tag: None,
        }
    }

    pub fn with_ha_tag(mut self, tag: &str) -> Self {
        self.ha_tag = Some(tag.to_string());
        self
    }

    pub fn requests_gpu(&self) -> bool {
        self.offering.gpu.is_some()
    }
}
