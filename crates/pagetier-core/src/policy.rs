//! Migration decisions and the pluggable policy seam.
//!
//! The policy loop hands each page's feature snapshot to the installed
//! [`MigrationPolicy`] and executes the decisions it returns. The trait is
//! the ML integration point: a research harness swaps in a learned model
//! at runtime with [`crate::TieredManager::set_policy`], and the built-in
//! [`HeuristicPolicy`] serves as the baseline.

use serde::Serialize;

use crate::clock::now_ns;
use crate::config::PolicyConfig;
use crate::stats::PageSnapshot;
use crate::tier::Tier;

/// A proposed tier change for one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationDecision {
    /// Page-aligned address of the page to move.
    pub page_addr: u64,
    /// Tier the page is currently accounted against.
    pub from_tier: Tier,
    /// Tier to move the page to.
    pub to_tier: Tier,
    /// Policy confidence in [0, 1]; low-confidence decisions are dropped.
    pub confidence: f64,
    /// Short human-readable justification.
    pub reason: &'static str,
}

impl MigrationDecision {
    /// Whether this decision is coherent for the snapshot it was made from.
    ///
    /// A decision whose source tier disagrees with the record, whose
    /// confidence leaves [0, 1], or which names no concrete destination is
    /// treated as no decision.
    pub fn is_valid_for(&self, page: &PageSnapshot) -> bool {
        self.from_tier == page.current_tier
            && self.from_tier.is_known()
            && self.to_tier.is_known()
            && self.from_tier != self.to_tier
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Decision function consulted for every tracked page each policy cycle.
///
/// Implementations must be cheap: the sweep calls `decide` once per page
/// under the statistics table's read lock.
pub trait MigrationPolicy: Send + Sync {
    /// Propose a migration for the page, or None to leave it in place.
    fn decide(&self, page: &PageSnapshot) -> Option<MigrationDecision>;
}

impl<F> MigrationPolicy for F
where
    F: Fn(&PageSnapshot) -> Option<MigrationDecision> + Send + Sync,
{
    fn decide(&self, page: &PageSnapshot) -> Option<MigrationDecision> {
        self(page)
    }
}

/// Default threshold heuristic: promote hot slow-tier pages, demote cold
/// fast-tier pages, never move a page that migrated recently.
pub struct HeuristicPolicy {
    config: PolicyConfig,
}

impl HeuristicPolicy {
    /// Create the heuristic with the given thresholds.
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }
}

impl Default for HeuristicPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl MigrationPolicy for HeuristicPolicy {
    fn decide(&self, page: &PageSnapshot) -> Option<MigrationDecision> {
        let now = now_ns();

        // Anti-thrashing: recently migrated pages stay put.
        if page.last_migration_ns > 0
            && now.saturating_sub(page.last_migration_ns) < self.config.min_residence_ns
        {
            return None;
        }

        if page.current_tier == Tier::Slow && page.heat_score > self.config.hot_threshold {
            return Some(MigrationDecision {
                page_addr: page.page_addr,
                from_tier: Tier::Slow,
                to_tier: Tier::Fast,
                confidence: page.heat_score,
                reason: "hot promotion",
            });
        }

        if page.current_tier == Tier::Fast && page.heat_score < self.config.cold_threshold {
            return Some(MigrationDecision {
                page_addr: page.page_addr,
                from_tier: Tier::Fast,
                to_tier: Tier::Slow,
                confidence: 1.0 - page.heat_score,
                reason: "cold demotion",
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tier: Tier, heat: f64, last_migration_ns: u64) -> PageSnapshot {
        PageSnapshot {
            page_addr: 0x10000,
            access_count: 10,
            read_count: 8,
            write_count: 2,
            first_access_ns: 1,
            last_access_ns: now_ns(),
            allocation_ns: 1,
            heat_score: heat,
            access_rate: 100.0,
            current_tier: tier,
            last_migration_ns,
            migration_count: 0,
        }
    }

    #[test]
    fn test_hot_promotion() {
        let policy = HeuristicPolicy::default();
        let decision = policy.decide(&snapshot(Tier::Slow, 0.9, 0)).unwrap();

        assert_eq!(decision.from_tier, Tier::Slow);
        assert_eq!(decision.to_tier, Tier::Fast);
        assert_eq!(decision.confidence, 0.9);
        assert_eq!(decision.reason, "hot promotion");
        assert!(decision.is_valid_for(&snapshot(Tier::Slow, 0.9, 0)));
    }

    #[test]
    fn test_cold_demotion() {
        let policy = HeuristicPolicy::default();
        let decision = policy.decide(&snapshot(Tier::Fast, 0.1, 0)).unwrap();

        assert_eq!(decision.from_tier, Tier::Fast);
        assert_eq!(decision.to_tier, Tier::Slow);
        assert!((decision.confidence - 0.9).abs() < 1e-12);
        assert_eq!(decision.reason, "cold demotion");
    }

    #[test]
    fn test_lukewarm_pages_stay() {
        let policy = HeuristicPolicy::default();
        // Neither hot enough in Slow nor cold enough in Fast.
        assert!(policy.decide(&snapshot(Tier::Slow, 0.5, 0)).is_none());
        assert!(policy.decide(&snapshot(Tier::Fast, 0.5, 0)).is_none());
        // Unknown tier never migrates.
        assert!(policy.decide(&snapshot(Tier::Unknown, 0.9, 0)).is_none());
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let policy = HeuristicPolicy::default();
        assert!(policy.decide(&snapshot(Tier::Slow, 0.7, 0)).is_none());
        assert!(policy.decide(&snapshot(Tier::Fast, 0.3, 0)).is_none());
    }

    #[test]
    fn test_anti_thrashing_window() {
        let policy = HeuristicPolicy::default();
        let config = PolicyConfig::default();

        // Migrated half a residence window ago: no decision even for a
        // page that crossed the opposite threshold.
        let recent = now_ns().saturating_sub(config.min_residence_ns / 2);
        assert!(policy.decide(&snapshot(Tier::Slow, 0.95, recent)).is_none());
        assert!(policy.decide(&snapshot(Tier::Fast, 0.05, recent)).is_none());

        // Past the window the decision comes back.
        let stale = now_ns().saturating_sub(config.min_residence_ns * 2);
        assert!(policy.decide(&snapshot(Tier::Slow, 0.95, stale)).is_some());
    }

    #[test]
    fn test_decision_validation() {
        let page = snapshot(Tier::Slow, 0.9, 0);
        let mut decision = MigrationDecision {
            page_addr: page.page_addr,
            from_tier: Tier::Slow,
            to_tier: Tier::Fast,
            confidence: 1.0,
            reason: "test",
        };
        assert!(decision.is_valid_for(&page));

        // Source tier mismatch.
        decision.from_tier = Tier::Fast;
        assert!(!decision.is_valid_for(&page));
        decision.from_tier = Tier::Slow;

        // Confidence out of range.
        decision.confidence = 1.5;
        assert!(!decision.is_valid_for(&page));
        decision.confidence = -0.1;
        assert!(!decision.is_valid_for(&page));
        decision.confidence = 1.0;

        // No concrete destination.
        decision.to_tier = Tier::Unknown;
        assert!(!decision.is_valid_for(&page));
        decision.to_tier = Tier::Slow;

        // Self-migration.
        assert!(!decision.is_valid_for(&page));
    }

    #[test]
    fn test_closure_policy() {
        let always_promote = |page: &PageSnapshot| {
            (page.current_tier == Tier::Slow).then(|| MigrationDecision {
                page_addr: page.page_addr,
                from_tier: Tier::Slow,
                to_tier: Tier::Fast,
                confidence: 1.0,
                reason: "forced promotion",
            })
        };

        let policy: &dyn MigrationPolicy = &always_promote;
        assert!(policy.decide(&snapshot(Tier::Slow, 0.0, 0)).is_some());
        assert!(policy.decide(&snapshot(Tier::Fast, 0.0, 0)).is_none());
    }
}
