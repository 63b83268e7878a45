//! Process-wide tiered memory manager.
//!
//! One [`TieredManager`] owns the region registry, the page statistics
//! table, tier accounting, the policy slot, and the two long-lived tasks:
//! the fault handler (latency-critical, drains the fault source) and the
//! policy loop (periodic, recomputes features and executes migrations).
//! Shutdown is cooperative: a single flag is observed at every loop
//! boundary and the tasks are joined in policy, fault, sampler order.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::clock::{now_ns, page_align};
use crate::config::ManagerConfig;
use crate::error::{PagetierError, Result};
use crate::fault::{FaultSource, FaultSourceError};
use crate::policy::{HeuristicPolicy, MigrationDecision, MigrationPolicy};
use crate::region::{RegionInfo, RegionRegistry};
use crate::sampler::HwSampler;
use crate::stats::{PageRecord, PageSnapshot, PageStatsTable, StatsSummary};
use crate::tier::{Tier, TierSpec, TierUsage};
use crate::PAGE_SIZE;

/// Poll timeout bounding how long the fault task can miss the shutdown
/// flag.
const FAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Cycles between periodic status lines (one second at the default
/// interval).
const STATUS_EVERY_CYCLES: u64 = 100;

/// Serializable snapshot of the manager's global counters.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Faults resolved since init.
    pub total_faults: u64,
    /// Migrations executed since init.
    pub total_migrations: u64,
    /// Policy cycles completed since init.
    pub policy_cycles: u64,
    /// Pages currently tracked in the statistics table.
    pub pages_tracked: u64,
    /// Bytes accounted against the fast tier.
    pub fast_used: u64,
    /// Fast tier capacity in bytes.
    pub fast_capacity: u64,
    /// Bytes accounted against the slow tier.
    pub slow_used: u64,
    /// Slow tier capacity in bytes.
    pub slow_capacity: u64,
    /// Number of active managed regions.
    pub active_regions: usize,
}

/// Userspace tiered memory manager.
///
/// Create with [`TieredManager::new`], then [`TieredManager::start`] the
/// background tasks. All components share this one object; tasks hold
/// `Arc` references, and [`TieredManager::shutdown`] joins them so no task
/// outlives the state.
pub struct TieredManager {
    config: ManagerConfig,
    fault_source: Arc<dyn FaultSource>,

    regions: RegionRegistry,
    stats: PageStatsTable,

    // Migration mutex. Tier usage is mutated only under this lock: the
    // fault task for the placement increment, the policy task for the
    // paired migration transfer.
    usage: Mutex<TierUsage>,

    policy: RwLock<Arc<dyn MigrationPolicy>>,
    default_policy: Arc<dyn MigrationPolicy>,
    sampler: RwLock<Option<Arc<HwSampler>>>,

    running: AtomicBool,
    // Policy task sleeps on this so shutdown can interrupt the interval.
    wakeup_lock: Mutex<()>,
    wakeup: Condvar,

    total_faults: AtomicU64,
    total_migrations: AtomicU64,
    policy_cycles: AtomicU64,

    fault_handle: Mutex<Option<JoinHandle<()>>>,
    policy_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TieredManager {
    /// Create a manager over the given fault source.
    pub fn new(config: ManagerConfig, fault_source: Arc<dyn FaultSource>) -> Result<Arc<Self>> {
        config.validate()?;

        info!(
            fast = %config.fast_tier.name,
            fast_capacity = config.fast_tier.capacity,
            slow = %config.slow_tier.name,
            slow_capacity = config.slow_tier.capacity,
            "initializing tiered memory manager"
        );

        let default_policy: Arc<dyn MigrationPolicy> =
            Arc::new(HeuristicPolicy::new(config.policy.clone()));

        Ok(Arc::new(Self {
            regions: RegionRegistry::new(config.max_regions),
            stats: PageStatsTable::new(config.stats_buckets),
            usage: Mutex::new(TierUsage::default()),
            policy: RwLock::new(Arc::clone(&default_policy)),
            default_policy,
            sampler: RwLock::new(None),
            running: AtomicBool::new(false),
            wakeup_lock: Mutex::new(()),
            wakeup: Condvar::new(),
            total_faults: AtomicU64::new(0),
            total_migrations: AtomicU64::new(0),
            policy_cycles: AtomicU64::new(0),
            fault_handle: Mutex::new(None),
            policy_handle: Mutex::new(None),
            config,
            fault_source,
        }))
    }

    /// Attach the optional hardware sampler. Its estimates are merged at
    /// the start of every policy cycle.
    pub fn attach_sampler(&self, sampler: Arc<HwSampler>) {
        *self.sampler.write() = Some(sampler);
    }

    /// Start the fault handler and policy tasks. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("manager already started");
            return Ok(());
        }

        let manager = Arc::clone(self);
        let fault_handle = std::thread::Builder::new()
            .name("pagetier-fault".to_string())
            .spawn(move || manager.fault_loop())?;
        *self.fault_handle.lock() = Some(fault_handle);

        let manager = Arc::clone(self);
        let policy_handle = std::thread::Builder::new()
            .name("pagetier-policy".to_string())
            .spawn(move || manager.policy_loop())?;
        *self.policy_handle.lock() = Some(policy_handle);

        info!("tiered memory manager started");
        Ok(())
    }

    /// Stop and join the background tasks, disarm all regions, and free
    /// the statistics table. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("shutting down tiered memory manager");
        self.wakeup.notify_all();

        if let Some(handle) = self.policy_handle.lock().take() {
            if handle.join().is_err() {
                warn!("policy task panicked");
            }
        }
        if let Some(handle) = self.fault_handle.lock().take() {
            if handle.join().is_err() {
                warn!("fault task panicked");
            }
        }

        if let Some(sampler) = self.sampler.read().clone() {
            sampler.shutdown();
        }

        for (base, length) in self.regions.deactivate_all() {
            if let Err(err) = self.fault_source.disarm(base, length) {
                warn!("failed to disarm region {:#x}: {}", base, err);
            }
        }

        info!(
            faults = self.total_faults.load(Ordering::Relaxed),
            migrations = self.total_migrations.load(Ordering::Relaxed),
            cycles = self.policy_cycles.load(Ordering::Relaxed),
            "final stats"
        );

        self.stats.clear();
        info!("shutdown complete");
    }

    // ------------------------------------------------------------------
    // Region management
    // ------------------------------------------------------------------

    /// Register `[addr, addr+length)` for managed demand paging.
    pub fn register_region(&self, addr: u64, length: u64) -> Result<()> {
        let slot = self.regions.register(addr, length)?;
        if let Err(err) = self.fault_source.arm(addr, length) {
            self.regions.unregister(addr);
            return Err(err.into());
        }
        info!(
            "registered managed region {:#x} + {} bytes (slot {})",
            addr, length, slot
        );
        Ok(())
    }

    /// Stop managing the region based at `addr`. Unknown addresses are
    /// silently ignored.
    pub fn unregister_region(&self, addr: u64) {
        let Some(length) = self.regions.unregister(addr) else {
            return;
        };
        if let Err(err) = self.fault_source.disarm(addr, length) {
            warn!("failed to disarm region {:#x}: {}", addr, err);
        }
        info!("unregistered managed region {:#x}", addr);
    }

    // ------------------------------------------------------------------
    // Fault handling
    // ------------------------------------------------------------------

    fn fault_loop(&self) {
        info!("fault handler task running");

        while self.running.load(Ordering::SeqCst) {
            match self.fault_source.poll(FAULT_POLL_TIMEOUT) {
                Ok(None) => continue,
                Ok(Some(event)) => self.handle_fault(event.addr),
                Err(FaultSourceError::Interrupted) => continue,
                Err(err) => {
                    error!(%err, "fault source poll failed, fault task exiting");
                    break;
                }
            }
        }

        info!("fault handler task exiting");
    }

    /// Resolve one fault: place, satisfy, account, record.
    fn handle_fault(&self, fault_addr: u64) {
        let page = page_align(fault_addr);
        let tier = self.decide_initial_placement();

        match self.fault_source.zero_fill(page) {
            Ok(()) => {}
            // Another resolution won the race; nothing to account.
            Err(FaultSourceError::AlreadyMapped(_)) => return,
            Err(err) => {
                error!("failed to satisfy fault at {:#x}: {}", page, err);
                return;
            }
        }

        self.usage.lock().add(tier, PAGE_SIZE);

        match self.stats.lookup_or_create(page) {
            Ok(rec) => {
                rec.set_current_tier(tier);
                rec.record_access(false);
            }
            Err(err) => {
                // The page is mapped either way; it just goes untracked.
                error!("failed to track faulted page {:#x}: {}", page, err);
            }
        }

        if let Some(counters) = self.regions.find(page) {
            counters.record_fault(tier);
        }
        self.total_faults.fetch_add(1, Ordering::Relaxed);

        debug!("resolved fault at {:#x} -> {}", page, tier);
    }

    /// Fast tier while it has room, then slow, then fast regardless.
    ///
    /// The exhausted case is the integration point for an eviction path; the
    /// core itself has none and only reports the condition.
    fn decide_initial_placement(&self) -> Tier {
        let usage = self.usage.lock();
        if self.config.fast_tier.has_room(usage.fast) {
            Tier::Fast
        } else if self.config.slow_tier.has_room(usage.slow) {
            Tier::Slow
        } else {
            error!("both tiers exhausted, placing in fast tier anyway");
            Tier::Fast
        }
    }

    // ------------------------------------------------------------------
    // Policy loop
    // ------------------------------------------------------------------

    fn policy_loop(&self) {
        info!(
            interval_ms = self.config.policy_interval_ms,
            "policy task running"
        );
        let interval = Duration::from_millis(self.config.policy_interval_ms);

        while self.running.load(Ordering::SeqCst) {
            {
                let mut guard = self.wakeup_lock.lock();
                self.wakeup.wait_for(&mut guard, interval);
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.run_policy_cycle();
        }

        info!("policy task exiting");
    }

    /// Execute one policy cycle: merge samples, refresh features, sweep
    /// the table, and run at most the configured number of migrations.
    ///
    /// The policy task calls this on its interval; research harnesses may
    /// call it directly to step the policy deterministically.
    pub fn run_policy_cycle(&self) {
        self.policy_cycles.fetch_add(1, Ordering::Relaxed);

        if let Some(sampler) = self.sampler.read().clone() {
            sampler.merge_into(&self.stats);
        }

        self.stats.update_all_features();

        let policy = self.policy.read().clone();
        let min_confidence = self.config.policy.confidence_min;
        let max_migrations = self.config.policy.max_migrations_per_cycle;

        // Collect qualifying decisions under the read lock, then execute
        // without it so the fault path's inserts are never blocked behind
        // migration work.
        let mut candidates: Vec<(Arc<PageRecord>, MigrationDecision)> = Vec::new();
        self.stats.for_each(|rec| {
            let snapshot = rec.snapshot();
            if let Some(decision) = policy.decide(&snapshot) {
                if !decision.is_valid_for(&snapshot) {
                    debug!(
                        "ignoring invalid policy decision for {:#x}",
                        snapshot.page_addr
                    );
                    return;
                }
                if decision.confidence >= min_confidence {
                    candidates.push((Arc::clone(rec), decision));
                }
            }
        });

        let mut migrated = 0u32;
        for (rec, decision) in candidates {
            if migrated >= max_migrations {
                // The rest carry over to later cycles.
                break;
            }
            match self.execute_migration(&rec, &decision) {
                Ok(()) => migrated += 1,
                Err(err) => debug!(%err, "migration skipped"),
            }
        }

        let cycles = self.policy_cycles.load(Ordering::Relaxed);
        if cycles % STATUS_EVERY_CYCLES == 0 {
            info!(
                cycles,
                pages = self.stats.len(),
                faults = self.total_faults.load(Ordering::Relaxed),
                migrations = self.total_migrations.load(Ordering::Relaxed),
                "policy status"
            );
        }
    }

    fn tier_spec(&self, tier: Tier) -> Result<&TierSpec> {
        match tier {
            Tier::Fast => Ok(&self.config.fast_tier),
            Tier::Slow => Ok(&self.config.slow_tier),
            Tier::Unknown => Err(PagetierError::UnknownTier(tier)),
        }
    }

    /// Move a page's residency between tiers.
    ///
    /// Capacity is checked and both usage counters are adjusted under the
    /// migration mutex. Residency is metadata; an implementation that
    /// physically copies page bytes between per-tier backing mappings
    /// would do so here before flipping the record.
    fn execute_migration(&self, rec: &PageRecord, decision: &MigrationDecision) -> Result<()> {
        let dest = self.tier_spec(decision.to_tier)?;

        {
            let mut usage = self.usage.lock();
            if !dest.has_room(usage.used(decision.to_tier)) {
                return Err(PagetierError::TierFull(decision.to_tier));
            }
            usage.sub(decision.from_tier, PAGE_SIZE);
            usage.add(decision.to_tier, PAGE_SIZE);
        }

        rec.set_current_tier(decision.to_tier);
        rec.mark_migrated(now_ns());
        self.total_migrations.fetch_add(1, Ordering::Relaxed);

        debug!(
            "migrated page {:#x}: {} -> {} ({})",
            decision.page_addr, decision.from_tier, decision.to_tier, decision.reason
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Policy and statistics access
    // ------------------------------------------------------------------

    /// Install a migration policy, or reinstate the default heuristic with
    /// `None`. Takes effect on the next policy cycle.
    pub fn set_policy(&self, policy: Option<Arc<dyn MigrationPolicy>>) {
        let custom = policy.is_some();
        *self.policy.write() = policy.unwrap_or_else(|| Arc::clone(&self.default_policy));
        info!(
            "migration policy {}",
            if custom { "updated" } else { "reset to default" }
        );
    }

    /// Snapshot of the statistics record for a page, if tracked.
    pub fn get_page_stats(&self, addr: u64) -> Option<PageSnapshot> {
        self.stats.lookup(addr).map(|rec| rec.snapshot())
    }

    /// Record a software-observed access (application instrumentation).
    pub fn record_access(&self, addr: u64, is_write: bool) {
        if let Err(err) = self.stats.record_access(addr, is_write) {
            warn!("failed to record access at {:#x}: {}", addr, err);
        }
    }

    /// Aggregate heat statistics over all tracked pages.
    pub fn page_summary(&self) -> StatsSummary {
        self.stats.summary()
    }

    /// Snapshot of the manager's global counters and tier usage.
    pub fn stats(&self) -> ManagerStats {
        let usage = *self.usage.lock();
        ManagerStats {
            total_faults: self.total_faults.load(Ordering::Relaxed),
            total_migrations: self.total_migrations.load(Ordering::Relaxed),
            policy_cycles: self.policy_cycles.load(Ordering::Relaxed),
            pages_tracked: self.stats.len(),
            fast_used: usage.fast,
            fast_capacity: self.config.fast_tier.capacity,
            slow_used: usage.slow,
            slow_capacity: self.config.slow_tier.capacity,
            active_regions: self.regions.active_count(),
        }
    }

    /// Active region snapshots.
    pub fn regions(&self) -> Vec<RegionInfo> {
        self.regions.snapshot()
    }

    /// Human-readable status of counters, tier usage, and regions.
    pub fn status(&self) -> String {
        let stats = self.stats();
        let mut out = String::new();

        let _ = writeln!(out, "=== Tiered Memory Manager Status ===");
        let _ = writeln!(
            out,
            "Faults: {}  Migrations: {}  Cycles: {}  Pages: {}",
            stats.total_faults, stats.total_migrations, stats.policy_cycles, stats.pages_tracked
        );

        let _ = writeln!(out, "Tiers:");
        for (spec, used) in [
            (&self.config.fast_tier, stats.fast_used),
            (&self.config.slow_tier, stats.slow_used),
        ] {
            let pct = if spec.capacity > 0 {
                100.0 * used as f64 / spec.capacity as f64
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "  {}: {}/{} bytes ({:.1}%)",
                spec.name, used, spec.capacity, pct
            );
        }

        let _ = writeln!(out, "Managed regions: {}", stats.active_regions);
        for region in self.regions.snapshot() {
            let _ = writeln!(
                out,
                "  [{}] {:#x} + {} bytes ({} faults)",
                region.slot, region.base_addr, region.length, region.total_faults
            );
        }

        if let Some(sampler) = self.sampler.read().clone() {
            let sampler_stats = sampler.stats();
            let _ = writeln!(
                out,
                "Sampler: active={} samples={} throttles={} errors={}",
                sampler_stats.active,
                sampler_stats.total_samples,
                sampler_stats.throttle_events,
                sampler_stats.errors
            );
        }

        out
    }

    /// Total faults resolved since init.
    #[inline]
    pub fn total_faults(&self) -> u64 {
        self.total_faults.load(Ordering::Relaxed)
    }

    /// Total migrations executed since init.
    #[inline]
    pub fn total_migrations(&self) -> u64 {
        self.total_migrations.load(Ordering::Relaxed)
    }

    /// Policy cycles completed since init.
    #[inline]
    pub fn policy_cycles(&self) -> u64 {
        self.policy_cycles.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::SimFaultSource;
    use crate::stats::PageRecord;

    fn test_config() -> ManagerConfig {
        ManagerConfig::default()
            .stats_buckets(1009)
            .policy_interval_ms(3_600_000)
    }

    fn manager_with_sim(config: ManagerConfig) -> (Arc<TieredManager>, SimFaultSource) {
        let sim = SimFaultSource::new();
        let manager = TieredManager::new(config, Arc::new(sim.clone())).unwrap();
        (manager, sim)
    }

    fn fault_record(manager: &TieredManager, addr: u64, tier: Tier) -> Arc<PageRecord> {
        // Shortcut for tests that do not drive the fault task: account the
        // page the way handle_fault would.
        manager.usage.lock().add(tier, PAGE_SIZE);
        let rec = manager.stats.lookup_or_create(addr).unwrap();
        rec.set_current_tier(tier);
        rec.record_access(false);
        rec
    }

    fn idle_record(manager: &TieredManager, addr: u64, tier: Tier) -> Arc<PageRecord> {
        // A page that was placed long ago and never touched since. With no
        // recorded accesses the frequency term stays zero, so heat is pure
        // recency decay.
        manager.usage.lock().add(tier, PAGE_SIZE);
        let rec = manager.stats.lookup_or_create(addr).unwrap();
        rec.set_current_tier(tier);
        rec.set_last_access_ns(now_ns().saturating_sub(30_000_000_000));
        rec
    }

    #[test]
    fn test_start_and_shutdown_idempotent() {
        let (manager, _sim) = manager_with_sim(test_config());

        manager.start().unwrap();
        manager.start().unwrap();

        manager.shutdown();
        manager.shutdown();

        // Restart after shutdown works.
        manager.start().unwrap();
        manager.shutdown();
    }

    #[test]
    fn test_placement_prefers_fast_then_slow() {
        let config = test_config().fast_capacity(2 * PAGE_SIZE);
        let (manager, _sim) = manager_with_sim(config);

        assert_eq!(manager.decide_initial_placement(), Tier::Fast);
        manager.usage.lock().add(Tier::Fast, PAGE_SIZE);
        assert_eq!(manager.decide_initial_placement(), Tier::Fast);
        manager.usage.lock().add(Tier::Fast, PAGE_SIZE);

        // Fast is exactly at capacity: the next page falls to slow.
        assert_eq!(manager.decide_initial_placement(), Tier::Slow);
    }

    #[test]
    fn test_placement_when_both_exhausted() {
        let config = test_config()
            .fast_capacity(PAGE_SIZE)
            .slow_capacity(PAGE_SIZE);
        let (manager, _sim) = manager_with_sim(config);

        manager.usage.lock().add(Tier::Fast, PAGE_SIZE);
        manager.usage.lock().add(Tier::Slow, PAGE_SIZE);
        assert_eq!(manager.decide_initial_placement(), Tier::Fast);
    }

    #[test]
    fn test_execute_migration_moves_accounting() {
        let (manager, _sim) = manager_with_sim(test_config());
        let rec = fault_record(&manager, 0x10000, Tier::Fast);

        let decision = MigrationDecision {
            page_addr: 0x10000,
            from_tier: Tier::Fast,
            to_tier: Tier::Slow,
            confidence: 1.0,
            reason: "test",
        };
        manager.execute_migration(&rec, &decision).unwrap();

        assert_eq!(rec.current_tier(), Tier::Slow);
        assert_eq!(rec.migration_count(), 1);
        assert!(rec.last_migration_ns() > 0);
        assert_eq!(manager.total_migrations(), 1);

        let usage = *manager.usage.lock();
        assert_eq!(usage.fast, 0);
        assert_eq!(usage.slow, PAGE_SIZE);
    }

    #[test]
    fn test_migration_to_full_tier_skipped() {
        let config = test_config().fast_capacity(0);
        let (manager, _sim) = manager_with_sim(config);
        let rec = fault_record(&manager, 0x10000, Tier::Slow);

        let decision = MigrationDecision {
            page_addr: 0x10000,
            from_tier: Tier::Slow,
            to_tier: Tier::Fast,
            confidence: 1.0,
            reason: "test",
        };
        assert!(matches!(
            manager.execute_migration(&rec, &decision),
            Err(PagetierError::TierFull(Tier::Fast))
        ));

        // Record and accounting are unchanged.
        assert_eq!(rec.current_tier(), Tier::Slow);
        assert_eq!(rec.migration_count(), 0);
        assert_eq!(manager.usage.lock().slow, PAGE_SIZE);
        assert_eq!(manager.total_migrations(), 0);
    }

    #[test]
    fn test_cycle_demotes_idle_fast_page() {
        let (manager, _sim) = manager_with_sim(test_config());
        // Thirty idle seconds push the heat far under the cold threshold.
        let _rec = idle_record(&manager, 0x20000, Tier::Fast);

        manager.run_policy_cycle();

        let snapshot = manager.get_page_stats(0x20000).unwrap();
        assert_eq!(snapshot.current_tier, Tier::Slow);
        assert!(snapshot.heat_score < 0.3);
        assert_eq!(snapshot.migration_count, 1);
        assert_eq!(manager.policy_cycles(), 1);

        let usage = *manager.usage.lock();
        assert_eq!(usage.fast, 0);
        assert_eq!(usage.slow, PAGE_SIZE);
    }

    #[test]
    fn test_cycle_respects_residence_window() {
        let (manager, _sim) = manager_with_sim(test_config());
        let rec = idle_record(&manager, 0x20000, Tier::Fast);

        manager.run_policy_cycle();
        assert_eq!(rec.current_tier(), Tier::Slow);
        assert_eq!(rec.migration_count(), 1);

        // Heat the page up past the promotion threshold. It still migrated
        // a moment ago, so the residence window suppresses the decision.
        for _ in 0..5000 {
            rec.record_access(false);
        }
        manager.run_policy_cycle();
        assert_eq!(rec.migration_count(), 1);
        assert_eq!(rec.current_tier(), Tier::Slow);
    }

    #[test]
    fn test_set_policy_and_reset() {
        let (manager, _sim) = manager_with_sim(test_config());
        let rec = fault_record(&manager, 0x30000, Tier::Slow);

        let promote_all = |page: &PageSnapshot| {
            (page.current_tier == Tier::Slow).then(|| MigrationDecision {
                page_addr: page.page_addr,
                from_tier: Tier::Slow,
                to_tier: Tier::Fast,
                confidence: 1.0,
                reason: "forced promotion",
            })
        };
        manager.set_policy(Some(Arc::new(promote_all)));
        manager.run_policy_cycle();
        assert_eq!(rec.current_tier(), Tier::Fast);

        // Double reset is idempotent and reinstates the heuristic, which
        // leaves a freshly migrated page alone.
        manager.set_policy(None);
        manager.set_policy(None);
        manager.run_policy_cycle();
        assert_eq!(rec.current_tier(), Tier::Fast);
    }

    #[test]
    fn test_low_confidence_decisions_dropped() {
        let (manager, _sim) = manager_with_sim(test_config());
        let rec = fault_record(&manager, 0x40000, Tier::Slow);

        let timid = |page: &PageSnapshot| {
            Some(MigrationDecision {
                page_addr: page.page_addr,
                from_tier: page.current_tier,
                to_tier: Tier::Fast,
                confidence: 0.2,
                reason: "timid",
            })
        };
        manager.set_policy(Some(Arc::new(timid)));
        manager.run_policy_cycle();

        assert_eq!(rec.current_tier(), Tier::Slow);
        assert_eq!(manager.total_migrations(), 0);
    }

    #[test]
    fn test_invalid_decisions_ignored() {
        let (manager, _sim) = manager_with_sim(test_config());
        let rec = fault_record(&manager, 0x50000, Tier::Slow);

        // Claims the page is in Fast when it is in Slow.
        let confused = |page: &PageSnapshot| {
            Some(MigrationDecision {
                page_addr: page.page_addr,
                from_tier: Tier::Fast,
                to_tier: Tier::Slow,
                confidence: 1.0,
                reason: "confused",
            })
        };
        manager.set_policy(Some(Arc::new(confused)));
        manager.run_policy_cycle();

        assert_eq!(rec.current_tier(), Tier::Slow);
        assert_eq!(manager.total_migrations(), 0);
    }

    #[test]
    fn test_status_renders() {
        let (manager, _sim) = manager_with_sim(test_config());
        manager.register_region(0x100000, 16 * PAGE_SIZE).unwrap();
        fault_record(&manager, 0x100000, Tier::Fast);

        let status = manager.status();
        assert!(status.contains("Tiered Memory Manager Status"));
        assert!(status.contains("DRAM"));
        assert!(status.contains("NVM"));
        assert!(status.contains("Managed regions: 1"));
    }
}
