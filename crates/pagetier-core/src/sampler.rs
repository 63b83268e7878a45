//! Hardware memory-access sample ingestion.
//!
//! Platforms with a statistical sampling facility (Intel PEBS via
//! perf_event on Linux) can observe roughly one access in every
//! `sample_period` without instrumenting the application. The
//! [`HwSampler`] drains such a facility through the [`SampleSource`]
//! abstraction into its own address-keyed table and merges the scaled-up
//! estimates into the page statistics on demand. The whole subsystem is
//! optional; the manager runs without it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{now_ns, page_align};
use crate::config::SamplerConfig;
use crate::error::{PagetierError, Result};
use crate::stats::PageStatsTable;

const HASH_GOLDEN: u64 = 0x9E3779B97F4A7C15;

/// Whether a sampled access was a load or a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Memory load.
    Read,
    /// Memory store.
    Write,
}

/// One sampled memory access.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    /// Sampled virtual address; zero samples are discarded.
    pub addr: u64,
    /// Load or store.
    pub kind: AccessKind,
    /// Access latency weight reported by the hardware.
    pub latency_weight: u64,
}

/// Abstraction over the sampling facility's ring buffers.
pub trait SampleSource: Send + Sync {
    /// Move all pending samples into `out`, returning how many were added.
    fn drain(&self, out: &mut Vec<Sample>) -> usize;

    /// Ring overflow or throttle events since the previous call.
    fn take_throttle_events(&self) -> u64;
}

/// Bounded in-memory sample queue standing in for hardware ring buffers.
///
/// Tests and unprivileged runs push synthetic samples; overflow beyond the
/// ring capacity is counted as a throttle event and the sample dropped,
/// matching how a saturated perf buffer loses records.
#[derive(Clone)]
pub struct SimSampleSource {
    queue: Arc<Mutex<VecDeque<Sample>>>,
    capacity: usize,
    throttled: Arc<AtomicU64>,
}

impl SimSampleSource {
    /// Create a queue bounded by the config's ring budget.
    pub fn new(config: &SamplerConfig) -> Self {
        // One Sample per 32 bytes of ring is roughly the perf record size.
        let capacity = config.ring_pages * crate::PAGE_SIZE as usize / 32;
        Self::with_capacity(capacity)
    }

    /// Create a queue with an explicit sample capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
            throttled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push one synthetic sample, dropping it if the ring is full.
    pub fn push(&self, sample: Sample) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            return;
        }
        queue.push_back(sample);
    }
}

impl SampleSource for SimSampleSource {
    fn drain(&self, out: &mut Vec<Sample>) -> usize {
        let mut queue = self.queue.lock();
        let n = queue.len();
        out.extend(queue.drain(..));
        n
    }

    fn take_throttle_events(&self) -> u64 {
        self.throttled.swap(0, Ordering::Relaxed)
    }
}

/// Sampled access counts for one page.
pub struct SampleRecord {
    addr: u64,
    read_samples: AtomicU64,
    write_samples: AtomicU64,
    total_latency: AtomicU64,
    last_sample_ns: AtomicU64,
}

impl SampleRecord {
    fn new(addr: u64) -> Self {
        Self {
            addr,
            read_samples: AtomicU64::new(0),
            write_samples: AtomicU64::new(0),
            total_latency: AtomicU64::new(0),
            last_sample_ns: AtomicU64::new(0),
        }
    }

    /// Page-aligned address this record tracks.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Number of read samples observed.
    #[inline]
    pub fn read_samples(&self) -> u64 {
        self.read_samples.load(Ordering::Relaxed)
    }

    /// Number of write samples observed.
    #[inline]
    pub fn write_samples(&self) -> u64 {
        self.write_samples.load(Ordering::Relaxed)
    }

    /// Sum of reported access latency weights.
    #[inline]
    pub fn total_latency(&self) -> u64 {
        self.total_latency.load(Ordering::Relaxed)
    }

    /// Timestamp of the most recent sample.
    #[inline]
    pub fn last_sample_ns(&self) -> u64 {
        self.last_sample_ns.load(Ordering::Relaxed)
    }
}

/// Lifecycle state of the sampling subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SamplerState {
    /// Nothing set up yet.
    Uninitialized = 0,
    /// Facility set up, not sampling.
    Initialized = 1,
    /// Sampling active, drain task running.
    Running = 2,
    /// Sampling paused, resources retained.
    Stopped = 3,
    /// Resources freed.
    Shutdown = 4,
}

impl SamplerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SamplerState::Initialized,
            2 => SamplerState::Running,
            3 => SamplerState::Stopped,
            4 => SamplerState::Shutdown,
            _ => SamplerState::Uninitialized,
        }
    }
}

// Atomic storage for the state tag
struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(state: SamplerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> SamplerState {
        SamplerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: SamplerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Global sampler counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SamplerStats {
    /// Samples ingested in total.
    pub total_samples: u64,
    /// Read samples ingested.
    pub read_samples: u64,
    /// Write samples ingested.
    pub write_samples: u64,
    /// Ring overflow or throttle events observed.
    pub throttle_events: u64,
    /// Ingestion errors (allocation failures, malformed records).
    pub errors: u64,
    /// Unique pages with at least one sample.
    pub pages_sampled: u64,
    /// Whether sampling is currently active.
    pub active: bool,
}

/// Drains a [`SampleSource`] into a per-page sample table and merges the
/// estimates into the page statistics.
pub struct HwSampler {
    config: SamplerConfig,
    source: Arc<dyn SampleSource>,
    buckets: RwLock<Vec<Vec<Arc<SampleRecord>>>>,
    pages_sampled: AtomicU64,
    state: AtomicState,
    drain_running: Arc<AtomicBool>,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
    total_samples: AtomicU64,
    read_samples: AtomicU64,
    write_samples: AtomicU64,
    throttle_events: AtomicU64,
    errors: AtomicU64,
}

impl HwSampler {
    /// Create a sampler over the given source. Call [`HwSampler::init`]
    /// and [`HwSampler::start`] to begin ingestion.
    pub fn new(config: SamplerConfig, source: Arc<dyn SampleSource>) -> Result<Arc<Self>> {
        config.validate()?;
        let bucket_count = config.sample_buckets;
        Ok(Arc::new(Self {
            config,
            source,
            buckets: RwLock::new(vec![Vec::new(); bucket_count]),
            pages_sampled: AtomicU64::new(0),
            state: AtomicState::new(SamplerState::Uninitialized),
            drain_running: Arc::new(AtomicBool::new(false)),
            drain_handle: Mutex::new(None),
            total_samples: AtomicU64::new(0),
            read_samples: AtomicU64::new(0),
            write_samples: AtomicU64::new(0),
            throttle_events: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SamplerState {
        self.state.load()
    }

    /// Whether sampling is active.
    pub fn is_active(&self) -> bool {
        self.state.load() == SamplerState::Running
    }

    /// Set up the sampling facility. Idempotent; re-initializes after
    /// shutdown.
    pub fn init(&self) -> Result<()> {
        match self.state.load() {
            SamplerState::Uninitialized | SamplerState::Shutdown => {
                self.state.store(SamplerState::Initialized);
                info!(
                    sample_period = self.config.sample_period,
                    "hardware sampler initialized"
                );
                Ok(())
            }
            _ => {
                debug!("sampler already initialized");
                Ok(())
            }
        }
    }

    /// Begin sampling and spawn the drain task. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        match self.state.load() {
            SamplerState::Running => return Ok(()),
            SamplerState::Initialized | SamplerState::Stopped => {}
            state => {
                return Err(PagetierError::Sampler(format!(
                    "cannot start sampler from state {state:?}"
                )))
            }
        }

        self.drain_running.store(true, Ordering::Release);
        let sampler = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("pagetier-sampler".to_string())
            .spawn(move || sampler.drain_loop())?;
        *self.drain_handle.lock() = Some(handle);

        self.state.store(SamplerState::Running);
        info!("hardware sampling started");
        Ok(())
    }

    /// Pause sampling and join the drain task. Resources are retained so
    /// [`HwSampler::start`] can resume.
    pub fn stop(&self) {
        if self.state.load() != SamplerState::Running {
            return;
        }

        self.drain_running.store(false, Ordering::Release);
        if let Some(handle) = self.drain_handle.lock().take() {
            if handle.join().is_err() {
                warn!("sampler drain task panicked");
            }
        }

        self.state.store(SamplerState::Stopped);
        info!("hardware sampling stopped");
    }

    /// Stop sampling and free all records.
    pub fn shutdown(&self) {
        match self.state.load() {
            SamplerState::Uninitialized | SamplerState::Shutdown => return,
            _ => {}
        }

        self.stop();
        self.clear_records();
        self.state.store(SamplerState::Shutdown);
        info!("sampler shutdown complete");
    }

    fn drain_loop(&self) {
        let interval = Duration::from_micros(self.config.drain_interval_us);
        let mut buf = Vec::new();

        info!("sampler drain task running");
        while self.drain_running.load(Ordering::Acquire) {
            self.drain_now_buffered(&mut buf);
            std::thread::sleep(interval);
        }
        info!("sampler drain task exiting");
    }

    /// Drain all pending samples synchronously.
    ///
    /// The drain task calls this on its own cadence; deterministic
    /// harnesses may call it directly instead of waiting.
    pub fn drain_now(&self) {
        let mut buf = Vec::new();
        self.drain_now_buffered(&mut buf);
    }

    fn drain_now_buffered(&self, buf: &mut Vec<Sample>) {
        buf.clear();
        self.source.drain(buf);
        for sample in buf.iter() {
            self.record_sample(*sample);
        }
        let throttled = self.source.take_throttle_events();
        if throttled > 0 {
            self.throttle_events.fetch_add(throttled, Ordering::Relaxed);
        }
    }

    fn record_sample(&self, sample: Sample) {
        if sample.addr == 0 {
            return;
        }

        let Some(rec) = self.lookup_or_create(sample.addr) else {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match sample.kind {
            AccessKind::Read => {
                rec.read_samples.fetch_add(1, Ordering::Relaxed);
                self.read_samples.fetch_add(1, Ordering::Relaxed);
            }
            AccessKind::Write => {
                rec.write_samples.fetch_add(1, Ordering::Relaxed);
                self.write_samples.fetch_add(1, Ordering::Relaxed);
            }
        }
        rec.total_latency
            .fetch_add(sample.latency_weight, Ordering::Relaxed);
        rec.last_sample_ns.store(now_ns(), Ordering::Relaxed);

        self.total_samples.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn bucket_of(&self, page_addr: u64) -> usize {
        let pfn = page_addr >> 12;
        (pfn.wrapping_mul(HASH_GOLDEN) % self.config.sample_buckets as u64) as usize
    }

    fn lookup_or_create(&self, addr: u64) -> Option<Arc<SampleRecord>> {
        let page = page_align(addr);
        let idx = self.bucket_of(page);

        {
            let buckets = self.buckets.read();
            if let Some(rec) = buckets[idx].iter().find(|rec| rec.addr == page) {
                return Some(Arc::clone(rec));
            }
        }

        let mut buckets = self.buckets.write();
        if let Some(rec) = buckets[idx].iter().find(|rec| rec.addr == page) {
            return Some(Arc::clone(rec));
        }

        buckets[idx].try_reserve(1).ok()?;
        let rec = Arc::new(SampleRecord::new(page));
        buckets[idx].push(Arc::clone(&rec));
        self.pages_sampled.fetch_add(1, Ordering::Relaxed);
        Some(rec)
    }

    /// Sample record for a page, if any samples landed on it.
    pub fn get_record(&self, addr: u64) -> Option<Arc<SampleRecord>> {
        let page = page_align(addr);
        let buckets = self.buckets.read();
        buckets[self.bucket_of(page)]
            .iter()
            .find(|rec| rec.addr == page)
            .map(Arc::clone)
    }

    /// Merge sampled estimates into the page statistics table.
    ///
    /// Each sample stands for roughly `sample_period` true accesses, so the
    /// estimate is `samples * sample_period`; the estimate overwrites the
    /// software-observed count only when it exceeds it.
    pub fn merge_into(&self, stats: &PageStatsTable) {
        let period = self.config.sample_period;
        let buckets = self.buckets.read();

        for chain in buckets.iter() {
            for rec in chain {
                let page = match stats.lookup_or_create(rec.addr) {
                    Ok(page) => page,
                    Err(err) => {
                        debug!(%err, addr = rec.addr, "sample merge skipped page");
                        self.errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                let estimated_reads = rec.read_samples().saturating_mul(period);
                let estimated_writes = rec.write_samples().saturating_mul(period);
                page.apply_sample_estimate(estimated_reads, estimated_writes, rec.last_sample_ns());
            }
        }
    }

    /// Drop all sample records and reset the counters.
    pub fn clear_records(&self) {
        let mut buckets = self.buckets.write();
        for chain in buckets.iter_mut() {
            chain.clear();
        }
        self.pages_sampled.store(0, Ordering::Relaxed);
        self.total_samples.store(0, Ordering::Relaxed);
        self.read_samples.store(0, Ordering::Relaxed);
        self.write_samples.store(0, Ordering::Relaxed);
        self.throttle_events.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    /// Global sampler statistics.
    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            total_samples: self.total_samples.load(Ordering::Relaxed),
            read_samples: self.read_samples.load(Ordering::Relaxed),
            write_samples: self.write_samples.load(Ordering::Relaxed),
            throttle_events: self.throttle_events.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            pages_sampled: self.pages_sampled.load(Ordering::Relaxed),
            active: self.is_active(),
        }
    }
}
