//! Admission gate
//!
//! Process-wide counting gate that bounds concurrent upstream calls. A slot
//! is held by a [`GatePermit`]; dropping the permit releases the slot, so a
//! relay that is cancelled, fails, or completes gives its slot back exactly
//! once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::routes::metrics::{record_gate_wait, set_gate_in_flight};

#[derive(Debug, Default)]
struct GateStats {
    total_acquires: AtomicU64,
    total_releases: AtomicU64,
    waiting: AtomicU64,
    peak_in_flight: AtomicU64,
}

/// Counts a waiter for as long as it is queued, including when the
/// acquiring future is dropped before admission.
struct WaitingGuard<'a>(&'a AtomicU64);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct GateSnapshot {
    pub capacity: usize,
    pub available: usize,
    pub in_flight: usize,
    pub waiting: u64,
    pub total_acquires: u64,
    pub total_releases: u64,
    pub peak_in_flight: u64,
}

/// Counting gate with fixed capacity.
///
/// Waiters are admitted in FIFO order.
#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<GateStats>,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots. A capacity of zero is rejected.
    pub fn new(capacity: usize) -> Result<Self, RelayError> {
        if capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "admission gate capacity must be at least 1".to_string(),
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(RelayError::InvalidConfig(format!(
                "admission gate capacity {} exceeds {}",
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            stats: Arc::new(GateStats::default()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let available = self.available();
        GateSnapshot {
            capacity: self.capacity,
            available,
            in_flight: self.capacity - available,
            waiting: self.stats.waiting.load(Ordering::Relaxed),
            total_acquires: self.stats.total_acquires.load(Ordering::Relaxed),
            total_releases: self.stats.total_releases.load(Ordering::Relaxed),
            peak_in_flight: self.stats.peak_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Wait until a slot is free and take it.
    pub async fn acquire(&self) -> Result<GatePermit, RelayError> {
        let started = Instant::now();
        let waiting = WaitingGuard::enter(&self.stats.waiting);
        let result = self.semaphore.clone().acquire_owned().await;
        drop(waiting);

        let permit = result.map_err(|_| RelayError::GateClosed)?;
        let waited = started.elapsed();
        record_gate_wait(waited.as_secs_f64());
        trace!(waited_ms = waited.as_millis() as u64, "Admission slot acquired");
        Ok(self.admit(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(self.admit(permit)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        self.stats.total_acquires.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.in_flight() as u64;
        self.stats.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);
        set_gate_in_flight(in_flight as f64);
        debug!(
            in_flight = in_flight,
            capacity = self.capacity,
            "Admitted upstream call"
        );

        GatePermit {
            permit: Some(permit),
            semaphore: self.semaphore.clone(),
            capacity: self.capacity,
            stats: self.stats.clone(),
        }
    }
}

/// A held gate slot, released on drop
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<GateStats>,
}

impl GatePermit {
    /// Give the slot back now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.stats.total_releases.fetch_add(1, Ordering::Relaxed);
            let in_flight = self.capacity - self.semaphore.available_permits();
            set_gate_in_flight(in_flight as f64);
            debug!(in_flight = in_flight, "Released admission slot");
        }
    }
}
