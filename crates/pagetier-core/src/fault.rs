//! Fault source abstraction and an in-process simulator.
//!
//! The manager consumes any facility that reports "page touched but not
//! present" for armed address ranges and accepts a zero-fill primitive that
//! releases the faulting thread. On Linux that facility is userfaultfd; the
//! [`FaultSource`] trait keeps the core independent of it, and
//! [`SimFaultSource`] provides the same contract in-process so the whole
//! dataplane runs without kernel privileges.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::clock::page_align;

/// How long a simulated faulting thread waits for resolution before giving
/// up. Generous next to the handler's 100 ms poll granularity.
const TOUCH_TIMEOUT: Duration = Duration::from_secs(2);

/// One "missing page" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultEvent {
    /// Faulting virtual address (not necessarily page-aligned).
    pub addr: u64,
}

/// Errors reported by a fault source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FaultSourceError {
    /// The target page is already mapped. Benign race; callers treat this
    /// as success.
    #[error("page {0:#x} is already mapped")]
    AlreadyMapped(u64),

    /// The poll was interrupted; retry on the next loop iteration.
    #[error("poll interrupted")]
    Interrupted,

    /// The source has been closed and delivers no further events.
    #[error("fault source closed")]
    Closed,

    /// A simulated faulting thread timed out waiting for resolution.
    #[error("fault wait timed out for page {0:#x}")]
    TimedOut(u64),

    /// Arming or disarming a range failed.
    #[error("failed to update armed range {base:#x}+{length:#x}")]
    ArmFailed {
        /// Range base address.
        base: u64,
        /// Range byte length.
        length: u64,
    },
}

/// A facility that reports missing-page faults for armed ranges and
/// satisfies them with zero-filled pages.
///
/// Implementations must be pollable with a timeout so the handler task can
/// observe shutdown within a bounded delay.
pub trait FaultSource: Send + Sync {
    /// Start reporting missing-page faults for `[base, base+length)`.
    fn arm(&self, base: u64, length: u64) -> Result<(), FaultSourceError>;

    /// Stop reporting faults for `[base, base+length)`.
    fn disarm(&self, base: u64, length: u64) -> Result<(), FaultSourceError>;

    /// Wait up to `timeout` for the next fault notification.
    ///
    /// `Ok(None)` means the timeout elapsed without an event.
    fn poll(&self, timeout: Duration) -> Result<Option<FaultEvent>, FaultSourceError>;

    /// Install a zero-filled page at the page-aligned address and release
    /// any thread blocked on it.
    fn zero_fill(&self, page_addr: u64) -> Result<(), FaultSourceError>;
}

#[derive(Default)]
struct SimInner {
    armed: Mutex<Vec<(u64, u64)>>,
    queue: Mutex<VecDeque<FaultEvent>>,
    queue_cv: Condvar,
    mapped: Mutex<HashSet<u64>>,
    mapped_cv: Condvar,
    closed: AtomicBool,
}

/// In-process fault source for tests and unprivileged runs.
///
/// Models the kernel side of demand paging: [`SimFaultSource::touch`]
/// plays the faulting application thread, blocking until the handler task
/// resolves the page. Touches outside any armed range are satisfied
/// directly, the way an unmanaged fault never reaches userspace.
#[derive(Clone, Default)]
pub struct SimFaultSource {
    inner: Arc<SimInner>,
}

impl SimFaultSource {
    /// Create an idle simulator with no armed ranges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an application thread touching `addr`.
    ///
    /// Blocks until the handler installs the page, up to an internal
    /// timeout. Touches on already-mapped pages return immediately without
    /// raising a fault.
    pub fn touch(&self, addr: u64) -> Result<(), FaultSourceError> {
        let page = page_align(addr);

        if self.inner.mapped.lock().contains(&page) {
            return Ok(());
        }

        if !self.is_armed(page) {
            // Unmanaged range: the kernel satisfies this fault itself.
            self.inner.mapped.lock().insert(page);
            return Ok(());
        }

        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(FaultEvent { addr });
            self.inner.queue_cv.notify_one();
        }

        let deadline = Instant::now() + TOUCH_TIMEOUT;
        let mut mapped = self.inner.mapped.lock();
        while !mapped.contains(&page) {
            let now = Instant::now();
            if now >= deadline {
                return Err(FaultSourceError::TimedOut(page));
            }
            self.inner.mapped_cv.wait_for(&mut mapped, deadline - now);
        }
        Ok(())
    }

    /// Whether the page at `addr` is currently mapped.
    pub fn is_mapped(&self, addr: u64) -> bool {
        self.inner.mapped.lock().contains(&page_align(addr))
    }

    /// Close the source. Subsequent polls fail, modelling a dead fault fd.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.queue_cv.notify_all();
    }

    fn is_armed(&self, page: u64) -> bool {
        let armed = self.inner.armed.lock();
        armed
            .iter()
            .any(|&(base, length)| page >= base && page < base + length)
    }
}

impl FaultSource for SimFaultSource {
    fn arm(&self, base: u64, length: u64) -> Result<(), FaultSourceError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FaultSourceError::ArmFailed { base, length });
        }
        self.inner.armed.lock().push((base, length));
        Ok(())
    }

    fn disarm(&self, base: u64, length: u64) -> Result<(), FaultSourceError> {
        let mut armed = self.inner.armed.lock();
        armed.retain(|&(b, l)| !(b == base && l == length));
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Option<FaultEvent>, FaultSourceError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FaultSourceError::Closed);
        }
        let mut queue = self.inner.queue.lock();
        if let Some(event) = queue.pop_front() {
            return Ok(Some(event));
        }
        self.inner.queue_cv.wait_for(&mut queue, timeout);
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FaultSourceError::Closed);
        }
        Ok(queue.pop_front())
    }

    fn zero_fill(&self, page_addr: u64) -> Result<(), FaultSourceError> {
        let page = page_align(page_addr);
        let mut mapped = self.inner.mapped.lock();
        if !mapped.insert(page) {
            return Err(FaultSourceError::AlreadyMapped(page));
        }
        self.inner.mapped_cv.notify_all();
        Ok(())
    }
}
