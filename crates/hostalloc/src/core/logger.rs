//! Logging facilities to record per-host placement decisions.

use std::fs::File;

use log::Level;
use serde::Serialize;

use crate::core::common::HostVerdict;
use crate::core::inventory::Host;

pub trait PlacementLogger {
    fn log_decision(&mut self, component: &str, host: &Host, verdict: HostVerdict);

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error>;
}

/// Forwards decisions to the `log` facade.
#[derive(Default)]
pub struct StdoutLogger {}

impl StdoutLogger {
    pub fn new() -> Self {
        Self {}
    }
}

impl PlacementLogger for StdoutLogger {
    fn log_decision(&mut self, component: &str, host: &Host, verdict: HostVerdict) {
        if verdict == HostVerdict::Accepted {
            log::debug!(target: component, "found suitable host {} ({})", host.name, host.id);
        } else {
            log::debug!(target: component, "host {} ({}) is not suitable: {}", host.name, host.id, verdict);
        }
    }

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error> {
        Ok(())
    }
}

#[derive(Serialize)]
struct LogEntry {
    component: String,
    host_id: u64,
    host_name: String,
    verdict: String,
}

/// Keeps decisions in memory and saves them as CSV.
///
/// Accepted hosts are logged at info level, rejected ones at debug level.
pub struct FileLogger {
    log: Vec<LogEntry>,
    level: Level,
}

impl Default for FileLogger {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            level: Level::Info,
        }
    }
}

impl FileLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: Level) -> Self {
        Self { log: Vec::new(), level }
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

impl PlacementLogger for FileLogger {
    fn log_decision(&mut self, component: &str, host: &Host, verdict: HostVerdict) {
        let level = if verdict == HostVerdict::Accepted {
            Level::Info
        } else {
            Level::Debug
        };
        if self.level < level {
            return;
        }
        self.log.push(LogEntry {
            component: component.to_string(),
            host_id: host.id,
            host_name: host.name.clone(),
            verdict: verdict.to_string(),
        });
    }

    fn save_log(&self, path: &str) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut wtr = csv::Writer::from_writer(file);
        for entry in &self.log {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
