//! Error types for the tiered memory manager.
//!
//! Hot paths (fault resolution, policy sweeps) never panic. Errors there
//! are counted and logged; errors on administrative paths propagate to the
//! caller through these types.

use thiserror::Error;

use crate::fault::FaultSourceError;
use crate::tier::Tier;

/// Result type alias for pagetier operations.
pub type Result<T> = std::result::Result<T, PagetierError>;

/// Main error type for the tiered memory manager.
#[derive(Error, Debug)]
pub enum PagetierError {
    /// Invalid configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The fixed region table has no free slots.
    #[error("no free region slots (max {max})")]
    RegionTableFull {
        /// Configured slot capacity of the registry.
        max: usize,
    },

    /// The requested region overlaps an already active region.
    #[error("region {base:#x}+{length:#x} overlaps an active region")]
    RegionOverlap {
        /// Requested base address.
        base: u64,
        /// Requested byte length.
        length: u64,
    },

    /// Regions must cover at least one byte.
    #[error("region length must be non-zero")]
    EmptyRegion,

    /// A migration destination has no free page of capacity.
    #[error("destination tier {0} is full")]
    TierFull(Tier),

    /// The tier carries no backing configuration (Unknown).
    #[error("tier {0} has no backing configuration")]
    UnknownTier(Tier),

    /// No statistics record is tracked for the page.
    #[error("no statistics tracked for page {0:#x}")]
    UnknownPage(u64),

    /// Record allocation failed; the caller continues without the record.
    #[error("record allocation failed: {0}")]
    OutOfMemory(String),

    /// Error reported by the underlying fault source.
    #[error("fault source error: {0}")]
    FaultSource(#[from] FaultSourceError),

    /// Error from the hardware sampling subsystem.
    #[error("sampler error: {0}")]
    Sampler(String),

    /// IO errors (task spawning and similar).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
