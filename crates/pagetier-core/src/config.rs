//! Configuration for the manager, the migration policy, and the sampler.
//!
//! All structs carry the defaults of the reference deployment (4 GiB DRAM
//! plus 16 GiB NVM, 10 ms policy cycles) and validate themselves before the
//! manager starts.

use serde::{Deserialize, Serialize};

use crate::error::{PagetierError, Result};
use crate::tier::TierSpec;

/// Bucket count for the page statistics hash table (prime, sized for ~1M
/// tracked pages).
pub const PAGE_STATS_HASH_SIZE: usize = 1_048_583;

/// Bucket count for the hardware sample table (prime).
pub const SAMPLE_HASH_SIZE: usize = 65_537;

/// Top-level manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Maximum number of concurrently managed regions.
    pub max_regions: usize,
    /// Bucket count of the page statistics table.
    pub stats_buckets: usize,
    /// Policy loop interval in milliseconds.
    pub policy_interval_ms: u64,
    /// Fast tier specification.
    pub fast_tier: TierSpec,
    /// Slow tier specification.
    pub slow_tier: TierSpec,
    /// Migration policy thresholds.
    pub policy: PolicyConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_regions: 64,
            stats_buckets: PAGE_STATS_HASH_SIZE,
            policy_interval_ms: 10,
            fast_tier: TierSpec::dram(),
            slow_tier: TierSpec::nvm(),
            policy: PolicyConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Set the policy interval.
    pub fn policy_interval_ms(mut self, ms: u64) -> Self {
        self.policy_interval_ms = ms;
        self
    }

    /// Set the fast tier capacity in bytes.
    pub fn fast_capacity(mut self, bytes: u64) -> Self {
        self.fast_tier.capacity = bytes;
        self
    }

    /// Set the slow tier capacity in bytes.
    pub fn slow_capacity(mut self, bytes: u64) -> Self {
        self.slow_tier.capacity = bytes;
        self
    }

    /// Set the statistics table bucket count.
    pub fn stats_buckets(mut self, buckets: usize) -> Self {
        self.stats_buckets = buckets;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_regions == 0 {
            return Err(PagetierError::InvalidConfig(
                "max_regions must be greater than 0".to_string(),
            ));
        }
        if self.stats_buckets == 0 {
            return Err(PagetierError::InvalidConfig(
                "stats_buckets must be greater than 0".to_string(),
            ));
        }
        if self.policy_interval_ms == 0 {
            return Err(PagetierError::InvalidConfig(
                "policy_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.slow_tier.capacity == 0 {
            return Err(PagetierError::InvalidConfig(
                "slow tier capacity must be greater than 0".to_string(),
            ));
        }
        self.policy.validate()
    }
}

/// Thresholds for the default heuristic and the migration rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Heat above this promotes a slow-tier page.
    pub hot_threshold: f64,
    /// Heat below this demotes a fast-tier page.
    pub cold_threshold: f64,
    /// Decisions below this confidence are not executed.
    pub confidence_min: f64,
    /// Minimum nanoseconds a page stays put after a migration.
    pub min_residence_ns: u64,
    /// Migration budget per policy cycle.
    pub max_migrations_per_cycle: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hot_threshold: 0.7,
            cold_threshold: 0.3,
            confidence_min: 0.5,
            min_residence_ns: 100_000_000, // 100 ms
            max_migrations_per_cycle: 10,
        }
    }
}

impl PolicyConfig {
    /// Validate the thresholds.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.hot_threshold) || !(0.0..=1.0).contains(&self.cold_threshold)
        {
            return Err(PagetierError::InvalidConfig(
                "heat thresholds must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.cold_threshold >= self.hot_threshold {
            return Err(PagetierError::InvalidConfig(
                "cold threshold must be less than hot threshold".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_min) {
            return Err(PagetierError::InvalidConfig(
                "confidence_min must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.max_migrations_per_cycle == 0 {
            return Err(PagetierError::InvalidConfig(
                "max_migrations_per_cycle must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the optional hardware sample ingestor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// One hardware sample represents roughly this many accesses.
    pub sample_period: u64,
    /// Bucket count of the sample record table.
    pub sample_buckets: usize,
    /// Drain task polling interval in microseconds.
    pub drain_interval_us: u64,
    /// Ring buffer budget in pages (1 + 2^n, matching perf mmap layout).
    pub ring_pages: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sample_period: 100_007,
            sample_buckets: SAMPLE_HASH_SIZE,
            drain_interval_us: 1_000,
            ring_pages: 1 + (1 << 8),
        }
    }
}

impl SamplerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sample_period == 0 {
            return Err(PagetierError::InvalidConfig(
                "sample_period must be greater than 0".to_string(),
            ));
        }
        if self.sample_buckets == 0 {
            return Err(PagetierError::InvalidConfig(
                "sample_buckets must be greater than 0".to_string(),
            ));
        }
        if self.ring_pages < 2 || !(self.ring_pages - 1).is_power_of_two() {
            return Err(PagetierError::InvalidConfig(
                "ring_pages must be 1 + a power of two".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ManagerConfig::default().validate().is_ok());
        assert!(PolicyConfig::default().validate().is_ok());
        assert!(SamplerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_regions, 64);
        assert_eq!(config.stats_buckets, 1_048_583);
        assert_eq!(config.policy_interval_ms, 10);
        assert_eq!(config.policy.hot_threshold, 0.7);
        assert_eq!(config.policy.cold_threshold, 0.3);
        assert_eq!(config.policy.min_residence_ns, 100_000_000);
        assert_eq!(config.policy.max_migrations_per_cycle, 10);
    }

    #[test]
    fn test_invalid_thresholds() {
        let config = PolicyConfig {
            hot_threshold: 0.3,
            cold_threshold: 0.7, // inverted
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PolicyConfig {
            confidence_min: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ring_pages() {
        let config = SamplerConfig {
            ring_pages: 300, // 299 is not a power of two
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SamplerConfig {
            ring_pages: 1 + (1 << 4),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = ManagerConfig::default()
            .policy_interval_ms(50)
            .fast_capacity(1 << 20)
            .stats_buckets(97);
        assert_eq!(config.policy_interval_ms, 50);
        assert_eq!(config.fast_tier.capacity, 1 << 20);
        assert_eq!(config.stats_buckets, 97);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = ManagerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ManagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stats_buckets, config.stats_buckets);
        assert_eq!(back.fast_tier.capacity, config.fast_tier.capacity);
    }
}
