//! Fixed-slot directory of managed memory regions.
//!
//! Regions are the address ranges the fault source is armed for. The
//! registry is a small fixed array behind a mutex; per-region counters are
//! atomics so the fault handler only holds the mutex while locating the
//! owning slot, never while updating counts.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{PagetierError, Result};
use crate::tier::Tier;

/// Fault and placement counters for one region.
#[derive(Debug, Default)]
pub struct RegionCounters {
    total_faults: AtomicU64,
    pages_in_fast: AtomicU64,
    pages_in_slow: AtomicU64,
}

impl RegionCounters {
    /// Record a resolved fault placed in the given tier.
    pub fn record_fault(&self, tier: Tier) {
        self.total_faults.fetch_add(1, Ordering::Relaxed);
        match tier {
            Tier::Fast => self.pages_in_fast.fetch_add(1, Ordering::Relaxed),
            Tier::Slow => self.pages_in_slow.fetch_add(1, Ordering::Relaxed),
            Tier::Unknown => 0,
        };
    }

    /// Total faults resolved within the region.
    #[inline]
    pub fn total_faults(&self) -> u64 {
        self.total_faults.load(Ordering::Relaxed)
    }

    /// Pages first placed in the fast tier.
    #[inline]
    pub fn pages_in_fast(&self) -> u64 {
        self.pages_in_fast.load(Ordering::Relaxed)
    }

    /// Pages first placed in the slow tier.
    #[inline]
    pub fn pages_in_slow(&self) -> u64 {
        self.pages_in_slow.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct RegionSlot {
    base_addr: u64,
    length: u64,
    active: bool,
    counters: Arc<RegionCounters>,
}

impl RegionSlot {
    fn empty() -> Self {
        Self {
            base_addr: 0,
            length: 0,
            active: false,
            counters: Arc::new(RegionCounters::default()),
        }
    }

    #[inline]
    fn contains(&self, page_addr: u64) -> bool {
        self.active && page_addr >= self.base_addr && page_addr < self.base_addr + self.length
    }

    #[inline]
    fn overlaps(&self, base: u64, length: u64) -> bool {
        self.active && base < self.base_addr + self.length && self.base_addr < base + length
    }
}

/// Snapshot of one active region for status output.
#[derive(Debug, Clone, Serialize)]
pub struct RegionInfo {
    /// Slot index in the registry.
    pub slot: usize,
    /// Base address of the region.
    pub base_addr: u64,
    /// Byte length of the region.
    pub length: u64,
    /// Faults resolved within the region.
    pub total_faults: u64,
    /// Pages first placed in the fast tier.
    pub pages_in_fast: u64,
    /// Pages first placed in the slow tier.
    pub pages_in_slow: u64,
}

/// Directory of managed regions with a fixed slot capacity.
pub struct RegionRegistry {
    slots: Mutex<Vec<RegionSlot>>,
    active_count: AtomicUsize,
    max_regions: usize,
}

impl RegionRegistry {
    /// Create a registry with the given slot capacity.
    pub fn new(max_regions: usize) -> Self {
        let slots = (0..max_regions).map(|_| RegionSlot::empty()).collect();
        Self {
            slots: Mutex::new(slots),
            active_count: AtomicUsize::new(0),
            max_regions,
        }
    }

    /// Activate the first free slot for `[base, base+length)`.
    ///
    /// Rejects zero-length regions, overlap with any active region, and a
    /// full table. Returns the slot index.
    pub fn register(&self, base: u64, length: u64) -> Result<usize> {
        if length == 0 {
            return Err(PagetierError::EmptyRegion);
        }

        let mut slots = self.slots.lock();

        if slots.iter().any(|slot| slot.overlaps(base, length)) {
            return Err(PagetierError::RegionOverlap { base, length });
        }

        let slot_id = slots
            .iter()
            .position(|slot| !slot.active)
            .ok_or(PagetierError::RegionTableFull {
                max: self.max_regions,
            })?;

        slots[slot_id] = RegionSlot {
            base_addr: base,
            length,
            active: true,
            counters: Arc::new(RegionCounters::default()),
        };
        self.active_count.fetch_add(1, Ordering::Relaxed);
        Ok(slot_id)
    }

    /// Deactivate the region with the given base address.
    ///
    /// Returns the region length for fault-source disarming, or None if no
    /// active region matches (silently ignored by callers).
    pub fn unregister(&self, base: u64) -> Option<u64> {
        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| slot.active && slot.base_addr == base)?;
        slot.active = false;
        let length = slot.length;
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        Some(length)
    }

    /// Find the active region containing a page address.
    ///
    /// Linear scan under a brief mutex hold; the returned counters are
    /// updated without the lock.
    pub fn find(&self, page_addr: u64) -> Option<Arc<RegionCounters>> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|slot| slot.contains(page_addr))
            .map(|slot| Arc::clone(&slot.counters))
    }

    /// Number of active regions.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Snapshot of every active region.
    pub fn snapshot(&self) -> Vec<RegionInfo> {
        let slots = self.slots.lock();
        slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.active)
            .map(|(slot_id, slot)| RegionInfo {
                slot: slot_id,
                base_addr: slot.base_addr,
                length: slot.length,
                total_faults: slot.counters.total_faults(),
                pages_in_fast: slot.counters.pages_in_fast(),
                pages_in_slow: slot.counters.pages_in_slow(),
            })
            .collect()
    }

    /// Deactivate every region, returning their ranges for disarming.
    pub fn deactivate_all(&self) -> Vec<(u64, u64)> {
        let mut slots = self.slots.lock();
        let mut ranges = Vec::new();
        for slot in slots.iter_mut() {
            if slot.active {
                slot.active = false;
                ranges.push((slot.base_addr, slot.length));
            }
        }
        self.active_count.store(0, Ordering::Relaxed);
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_SIZE;

    #[test]
    fn test_register_unregister_round_trip() {
        let registry = RegionRegistry::new(4);
        assert_eq!(registry.active_count(), 0);

        registry.register(0x10000, 16 * PAGE_SIZE).unwrap();
        assert_eq!(registry.active_count(), 1);

        assert_eq!(registry.unregister(0x10000), Some(16 * PAGE_SIZE));
        assert_eq!(registry.active_count(), 0);

        // Unknown base is silently ignored.
        assert_eq!(registry.unregister(0x10000), None);
    }

    #[test]
    fn test_zero_length_rejected() {
        let registry = RegionRegistry::new(4);
        assert!(matches!(
            registry.register(0x10000, 0),
            Err(PagetierError::EmptyRegion)
        ));
    }

    #[test]
    fn test_overlap_rejected() {
        let registry = RegionRegistry::new(4);
        registry.register(0x10000, 8 * PAGE_SIZE).unwrap();

        // Partial overlap from below and above, and full containment.
        assert!(registry.register(0x10000 - PAGE_SIZE, 2 * PAGE_SIZE).is_err());
        assert!(registry
            .register(0x10000 + 7 * PAGE_SIZE, 2 * PAGE_SIZE)
            .is_err());
        assert!(registry.register(0x10000 + PAGE_SIZE, PAGE_SIZE).is_err());

        // Adjacent region is fine.
        assert!(registry.register(0x10000 + 8 * PAGE_SIZE, PAGE_SIZE).is_ok());
    }

    #[test]
    fn test_table_full() {
        let registry = RegionRegistry::new(2);
        registry.register(0x10000, PAGE_SIZE).unwrap();
        registry.register(0x20000, PAGE_SIZE).unwrap();
        assert!(matches!(
            registry.register(0x30000, PAGE_SIZE),
            Err(PagetierError::RegionTableFull { max: 2 })
        ));

        // Freeing a slot makes the table usable again.
        registry.unregister(0x10000);
        assert!(registry.register(0x30000, PAGE_SIZE).is_ok());
    }

    #[test]
    fn test_find_half_open_range() {
        let registry = RegionRegistry::new(4);
        registry.register(0x40000, 4 * PAGE_SIZE).unwrap();

        assert!(registry.find(0x40000).is_some());
        assert!(registry.find(0x40000 + 4 * PAGE_SIZE - 1).is_some());
        assert!(registry.find(0x40000 + 4 * PAGE_SIZE).is_none());
        assert!(registry.find(0x40000 - 1).is_none());
    }

    #[test]
    fn test_counters() {
        let registry = RegionRegistry::new(4);
        registry.register(0x50000, 4 * PAGE_SIZE).unwrap();

        let counters = registry.find(0x50000).unwrap();
        counters.record_fault(Tier::Fast);
        counters.record_fault(Tier::Fast);
        counters.record_fault(Tier::Slow);

        let info = &registry.snapshot()[0];
        assert_eq!(info.total_faults, 3);
        assert_eq!(info.pages_in_fast, 2);
        assert_eq!(info.pages_in_slow, 1);
    }

    #[test]
    fn test_deactivate_all() {
        let registry = RegionRegistry::new(4);
        registry.register(0x10000, PAGE_SIZE).unwrap();
        registry.register(0x20000, PAGE_SIZE).unwrap();

        let mut ranges = registry.deactivate_all();
        ranges.sort_unstable();
        assert_eq!(ranges, vec![(0x10000, PAGE_SIZE), (0x20000, PAGE_SIZE)]);
        assert_eq!(registry.active_count(), 0);
    }
}
