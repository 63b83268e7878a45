//! Memory tier tags, specifications, and usage accounting.
//!
//! Two storage classes back managed pages: a small fast tier (DRAM-like)
//! and a larger slow tier (NVM/CXL-like). Physically distinct backing is an
//! extension; the core models residency as accounting.

use serde::{Deserialize, Serialize};

use crate::PAGE_SIZE;

/// Tier a page is resident in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    /// Placement not yet decided (only before the first fault resolution).
    Unknown = 0,
    /// Fast tier (DRAM).
    Fast = 1,
    /// Slow tier (NVM/CXL).
    Slow = 2,
}

impl Tier {
    /// Convert from raw u8 value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Tier::Unknown),
            1 => Some(Tier::Fast),
            2 => Some(Tier::Slow),
            _ => None,
        }
    }

    /// Whether this is a concrete, capacity-backed tier.
    #[inline]
    pub const fn is_known(self) -> bool {
        !matches!(self, Tier::Unknown)
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier as u8
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Unknown => write!(f, "Unknown"),
            Tier::Fast => write!(f, "Fast"),
            Tier::Slow => write!(f, "Slow"),
        }
    }
}

/// Static description of one tier: human name, capacity, latency hints.
///
/// The latency fields are informational. They describe the hardware the
/// tier models and may feed policy features; the core never sleeps on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSpec {
    /// Human-readable tier name ("DRAM", "NVM").
    pub name: String,
    /// Byte capacity of the tier.
    pub capacity: u64,
    /// Typical read latency in nanoseconds.
    pub read_latency_ns: u64,
    /// Typical write latency in nanoseconds.
    pub write_latency_ns: u64,
}

impl TierSpec {
    /// Default fast tier: 4 GiB of DRAM at roughly 80 ns reads.
    pub fn dram() -> Self {
        Self {
            name: "DRAM".to_string(),
            capacity: 4 * 1024 * 1024 * 1024,
            read_latency_ns: 80,
            write_latency_ns: 100,
        }
    }

    /// Default slow tier: 16 GiB of NVM at roughly 300 ns reads.
    pub fn nvm() -> Self {
        Self {
            name: "NVM".to_string(),
            capacity: 16 * 1024 * 1024 * 1024,
            read_latency_ns: 300,
            write_latency_ns: 500,
        }
    }

    /// Whether one more page fits given the current usage.
    #[inline]
    pub fn has_room(&self, used: u64) -> bool {
        used + PAGE_SIZE <= self.capacity
    }
}

/// Byte usage of both tiers.
///
/// Plain counters, not atomics: every writer serializes on the manager's
/// migration mutex, which owns a value of this type. The fault task bumps
/// one side on placement; the policy task moves pairs during migration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    /// Bytes accounted against the fast tier.
    pub fast: u64,
    /// Bytes accounted against the slow tier.
    pub slow: u64,
}

impl TierUsage {
    /// Usage of the given tier; Unknown reports zero.
    #[inline]
    pub fn used(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Fast => self.fast,
            Tier::Slow => self.slow,
            Tier::Unknown => 0,
        }
    }

    /// Charge bytes against a tier.
    #[inline]
    pub fn add(&mut self, tier: Tier, bytes: u64) {
        match tier {
            Tier::Fast => self.fast += bytes,
            Tier::Slow => self.slow += bytes,
            Tier::Unknown => {}
        }
    }

    /// Release bytes from a tier, saturating at zero.
    #[inline]
    pub fn sub(&mut self, tier: Tier, bytes: u64) {
        match tier {
            Tier::Fast => self.fast = self.fast.saturating_sub(bytes),
            Tier::Slow => self.slow = self.slow.saturating_sub(bytes),
            Tier::Unknown => {}
        }
    }
}
