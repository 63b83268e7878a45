//! Per-page access statistics and derived migration features.
//!
//! Every page the manager has ever observed gets a [`PageRecord`] holding
//! raw access counters and the derived features the policy consumes (heat
//! score, access rate). Records live in a chained hash table keyed by
//! page-aligned address; the table lock guards only chain structure, the
//! counters inside a record are atomics updated lock-free.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::{now_ns, page_align};
use crate::error::{PagetierError, Result};
use crate::tier::Tier;

/// Fibonacci hashing constant (64-bit golden ratio, odd).
const HASH_GOLDEN: u64 = 0x9E3779B97F4A7C15;

/// Access statistics for one managed page.
///
/// Counters and timestamps are Relaxed atomics; the sum invariant
/// `access_count == read_count + write_count` holds once the fault path has
/// quiesced, not at every intermediate instant. The derived doubles are
/// written only by the policy task and stored as f64 bit patterns.
pub struct PageRecord {
    /// Page-aligned virtual address (table key).
    page_addr: u64,

    // Access counters
    access_count: AtomicU64,
    read_count: AtomicU64,
    write_count: AtomicU64,

    // Temporal features
    first_access_ns: u64,
    last_access_ns: AtomicU64,
    allocation_ns: u64,

    // Derived features, f64 bits, single writer (policy task)
    heat_score: AtomicU64,
    access_rate: AtomicU64,

    // Placement state
    current_tier: AtomicU8,
    last_migration_ns: AtomicU64,
    migration_count: AtomicU32,
}

impl PageRecord {
    fn new(page_addr: u64) -> Self {
        let now = now_ns();
        Self {
            page_addr,
            access_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            first_access_ns: now,
            last_access_ns: AtomicU64::new(now),
            allocation_ns: now,
            heat_score: AtomicU64::new(0.0f64.to_bits()),
            access_rate: AtomicU64::new(0.0f64.to_bits()),
            current_tier: AtomicU8::new(Tier::Unknown as u8),
            last_migration_ns: AtomicU64::new(0),
            migration_count: AtomicU32::new(0),
        }
    }

    /// Page-aligned address this record tracks.
    #[inline]
    pub fn page_addr(&self) -> u64 {
        self.page_addr
    }

    /// Total observed accesses.
    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Observed read accesses.
    #[inline]
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Observed write accesses.
    #[inline]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Timestamp of the most recent observed access.
    #[inline]
    pub fn last_access_ns(&self) -> u64 {
        self.last_access_ns.load(Ordering::Relaxed)
    }

    /// Timestamp of the first observed access.
    #[inline]
    pub fn first_access_ns(&self) -> u64 {
        self.first_access_ns
    }

    /// Current heat score in [0, 1].
    #[inline]
    pub fn heat_score(&self) -> f64 {
        f64::from_bits(self.heat_score.load(Ordering::Relaxed))
    }

    /// Current access rate in accesses per second.
    #[inline]
    pub fn access_rate(&self) -> f64 {
        f64::from_bits(self.access_rate.load(Ordering::Relaxed))
    }

    /// Tier this page is currently accounted against.
    #[inline]
    pub fn current_tier(&self) -> Tier {
        Tier::from_u8(self.current_tier.load(Ordering::Acquire)).unwrap_or(Tier::Unknown)
    }

    /// Set the tier this page is accounted against.
    #[inline]
    pub fn set_current_tier(&self, tier: Tier) {
        self.current_tier.store(tier as u8, Ordering::Release);
    }

    /// Timestamp of the last migration, 0 if never migrated.
    #[inline]
    pub fn last_migration_ns(&self) -> u64 {
        self.last_migration_ns.load(Ordering::Relaxed)
    }

    /// Number of completed migrations.
    #[inline]
    pub fn migration_count(&self) -> u32 {
        self.migration_count.load(Ordering::Relaxed)
    }

    /// Record one access. Relaxed ordering throughout; the sum invariant is
    /// eventual.
    pub fn record_access(&self, is_write: bool) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        if is_write {
            self.write_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.read_count.fetch_add(1, Ordering::Relaxed);
        }
        self.last_access_ns.store(now_ns(), Ordering::Relaxed);
    }

    /// Stamp a completed migration on the record.
    pub(crate) fn mark_migrated(&self, now: u64) {
        self.last_migration_ns.store(now, Ordering::Relaxed);
        self.migration_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a hardware sampling estimate into the software-observed counts.
    ///
    /// Sampling estimates dominate when they exceed the fault-path counts;
    /// fault-path counts dominate before any samples accrue. The access
    /// total is recomputed as the sum and the last-access timestamp is
    /// advanced if the sampler saw newer activity.
    pub(crate) fn apply_sample_estimate(
        &self,
        estimated_reads: u64,
        estimated_writes: u64,
        last_sample_ns: u64,
    ) {
        if estimated_reads > self.read_count.load(Ordering::Relaxed) {
            self.read_count.store(estimated_reads, Ordering::Relaxed);
        }
        if estimated_writes > self.write_count.load(Ordering::Relaxed) {
            self.write_count.store(estimated_writes, Ordering::Relaxed);
        }

        let total =
            self.read_count.load(Ordering::Relaxed) + self.write_count.load(Ordering::Relaxed);
        self.access_count.store(total, Ordering::Relaxed);

        if last_sample_ns > self.last_access_ns.load(Ordering::Relaxed) {
            self.last_access_ns.store(last_sample_ns, Ordering::Relaxed);
        }
    }

    /// Recompute the derived features from the raw counters.
    ///
    /// Only the policy task calls this; the derived fields have a single
    /// writer even though they are stored as atomics for the readers.
    pub fn compute_features(&self) {
        let now = now_ns();
        let access_count = self.access_count.load(Ordering::Relaxed);
        let last_access = self.last_access_ns.load(Ordering::Relaxed);

        // Access rate in accesses per second over the record lifetime.
        let lifetime_ns = now.saturating_sub(self.allocation_ns);
        if lifetime_ns > 0 {
            let rate = access_count as f64 * 1e9 / lifetime_ns as f64;
            self.access_rate.store(rate.to_bits(), Ordering::Relaxed);
        }

        // Heat combines exponential recency decay (~10 s half-life) with
        // frequency normalized to 1000 accesses/s.
        let age_s = now.saturating_sub(last_access) as f64 / 1e9;
        let recency = (-0.07 * age_s).exp();
        let frequency = (self.access_rate() / 1000.0).min(1.0);

        let heat = (0.6 * recency + 0.4 * frequency).clamp(0.0, 1.0);
        self.heat_score.store(heat.to_bits(), Ordering::Relaxed);
    }

    /// Plain-value snapshot for policy input and the external API.
    pub fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            page_addr: self.page_addr,
            access_count: self.access_count(),
            read_count: self.read_count(),
            write_count: self.write_count(),
            first_access_ns: self.first_access_ns,
            last_access_ns: self.last_access_ns(),
            allocation_ns: self.allocation_ns,
            heat_score: self.heat_score(),
            access_rate: self.access_rate(),
            current_tier: self.current_tier(),
            last_migration_ns: self.last_migration_ns(),
            migration_count: self.migration_count(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_access_ns(&self, ns: u64) {
        self.last_access_ns.store(ns, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a page record.
///
/// These are the features a migration policy sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSnapshot {
    /// Page-aligned virtual address.
    pub page_addr: u64,
    /// Total observed accesses.
    pub access_count: u64,
    /// Observed read accesses.
    pub read_count: u64,
    /// Observed write accesses.
    pub write_count: u64,
    /// Timestamp of the first observed access.
    pub first_access_ns: u64,
    /// Timestamp of the most recent observed access.
    pub last_access_ns: u64,
    /// Timestamp of record creation.
    pub allocation_ns: u64,
    /// Hotness estimate in [0, 1].
    pub heat_score: f64,
    /// Accesses per second over the record lifetime.
    pub access_rate: f64,
    /// Tier the page is accounted against.
    pub current_tier: Tier,
    /// Timestamp of the last migration, 0 if never migrated.
    pub last_migration_ns: u64,
    /// Number of completed migrations.
    pub migration_count: u32,
}

/// Aggregate view over all tracked pages.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSummary {
    /// Total tracked pages.
    pub pages: u64,
    /// Pages with heat above 0.5.
    pub hot: u64,
    /// Pages with heat at or below 0.5.
    pub cold: u64,
    /// Mean heat across all pages.
    pub mean_heat: f64,
}

/// Concurrent map from page-aligned address to [`PageRecord`].
///
/// Prime-length bucket array with per-bucket chains behind one
/// reader/writer lock. Lookups and sweeps take the read lock; only record
/// creation and table teardown take the write lock.
pub struct PageStatsTable {
    buckets: RwLock<Vec<Vec<Arc<PageRecord>>>>,
    bucket_count: usize,
    tracked: AtomicU64,
}

impl PageStatsTable {
    /// Create a table with the given bucket count.
    pub fn new(bucket_count: usize) -> Self {
        Self {
            buckets: RwLock::new(vec![Vec::new(); bucket_count]),
            bucket_count,
            tracked: AtomicU64::new(0),
        }
    }

    #[inline]
    fn bucket_of(&self, page_addr: u64) -> usize {
        let pfn = page_addr >> 12;
        (pfn.wrapping_mul(HASH_GOLDEN) % self.bucket_count as u64) as usize
    }

    /// Look up the record for an address. Never allocates.
    pub fn lookup(&self, addr: u64) -> Option<Arc<PageRecord>> {
        let page = page_align(addr);
        let buckets = self.buckets.read();
        buckets[self.bucket_of(page)]
            .iter()
            .find(|rec| rec.page_addr == page)
            .map(Arc::clone)
    }

    /// Look up the record for an address, creating it if absent.
    ///
    /// Read-locked probe first, then the double-check-after-upgrade pattern
    /// under the write lock. Fails only when the chain cannot grow.
    pub fn lookup_or_create(&self, addr: u64) -> Result<Arc<PageRecord>> {
        let page = page_align(addr);
        let idx = self.bucket_of(page);

        {
            let buckets = self.buckets.read();
            if let Some(rec) = buckets[idx].iter().find(|rec| rec.page_addr == page) {
                return Ok(Arc::clone(rec));
            }
        }

        let mut buckets = self.buckets.write();
        // Re-check: another thread may have inserted between the locks.
        if let Some(rec) = buckets[idx].iter().find(|rec| rec.page_addr == page) {
            return Ok(Arc::clone(rec));
        }

        buckets[idx]
            .try_reserve(1)
            .map_err(|err| PagetierError::OutOfMemory(err.to_string()))?;
        let rec = Arc::new(PageRecord::new(page));
        buckets[idx].push(Arc::clone(&rec));
        self.tracked.fetch_add(1, Ordering::Relaxed);
        Ok(rec)
    }

    /// Record one access at an address, creating the record if needed.
    pub fn record_access(&self, addr: u64, is_write: bool) -> Result<()> {
        let rec = self.lookup_or_create(addr)?;
        rec.record_access(is_write);
        Ok(())
    }

    /// Visit every record under the read lock.
    pub fn for_each<F: FnMut(&Arc<PageRecord>)>(&self, mut f: F) {
        let buckets = self.buckets.read();
        for chain in buckets.iter() {
            for rec in chain {
                f(rec);
            }
        }
    }

    /// Recompute derived features for every record.
    pub fn update_all_features(&self) {
        self.for_each(|rec| rec.compute_features());
    }

    /// Aggregate heat statistics for diagnostics.
    pub fn summary(&self) -> StatsSummary {
        let mut summary = StatsSummary {
            pages: self.len(),
            ..Default::default()
        };
        let mut total_heat = 0.0;
        self.for_each(|rec| {
            let heat = rec.heat_score();
            total_heat += heat;
            if heat > 0.5 {
                summary.hot += 1;
            } else {
                summary.cold += 1;
            }
        });
        if summary.pages > 0 {
            summary.mean_heat = total_heat / summary.pages as f64;
        }
        summary
    }

    /// Number of tracked pages.
    #[inline]
    pub fn len(&self) -> u64 {
        self.tracked.load(Ordering::Relaxed)
    }

    /// Whether the table tracks no pages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record. Used at manager shutdown.
    pub fn clear(&self) {
        let mut buckets = self.buckets.write();
        for chain in buckets.iter_mut() {
            chain.clear();
        }
        self.tracked.store(0, Ordering::Relaxed);
    }
}
