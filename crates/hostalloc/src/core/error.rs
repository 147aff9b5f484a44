//! Error types.

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the callers of the allocators and the dedication manager.
///
/// An unsuitable host is not an error, see [`HostVerdict`](crate::core::common::HostVerdict).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed configuration, fatal for the current call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unknown entity passed by the caller.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Request conflicts with the existing dedication hierarchy or host workloads.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource already has a dedication record.
    #[error("{0} is already dedicated")]
    AlreadyDedicated(String),

    /// Commit failed in the persistence layer. Details are logged, not returned.
    #[error("Failed to {0}. Please contact Cloud Support.")]
    Persistence(String),
}

impl Error {
    /// Returns true for errors caused by the current dedication state rather than by bad input.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::AlreadyDedicated(_))
    }
}

/// Errors reported by a [`DedicationStore`](crate::core::dedication::DedicationStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
