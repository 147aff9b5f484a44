pub mod capacity;
pub mod common;
pub mod config;
pub mod dedication;
pub mod dedication_manager;
pub mod domain;
pub mod error;
pub mod exclude;
pub mod guests;
pub mod host_allocator;
pub mod inventory;
pub mod logger;
pub mod pod_allocator;
pub mod ranking;
pub mod tag_filter;
pub mod workload;
