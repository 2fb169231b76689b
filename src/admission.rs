//! Admission control: bounds how many pipelines run at once.
//!
//! A counting semaphore with `capacity` permits. Each admitted job holds an
//! [`AdmissionPermit`]; dropping the permit (normal return, `?`, panic
//! unwind, task cancellation) frees the slot. Waiters are woken in no
//! particular order.

use crate::error::ConvertError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Gate shared by every front end of one service instance.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicUsize,
}

/// A held conversion slot. Released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    inner: Arc<Inner>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                admitted: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait up to `timeout` for a free slot.
    pub async fn acquire(&self, timeout: Duration) -> Result<AdmissionPermit, ConvertError> {
        let started = Instant::now();
        let semaphore = Arc::clone(&self.inner.semaphore);
        let permit = match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(ConvertError::Internal("admission semaphore closed".into()))
            }
            Err(_elapsed) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(
                    "Admission timed out after {}ms ({} slots busy)",
                    waited_ms, self.inner.capacity
                );
                return Err(ConvertError::AdmissionTimeout {
                    capacity: self.inner.capacity,
                    waited_ms,
                });
            }
        };

        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(active, Ordering::SeqCst);
        self.inner.admitted.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Admitted job ({}/{} active, waited {:?})",
            active,
            self.inner.capacity,
            started.elapsed()
        );
        Ok(AdmissionPermit {
            _permit: permit,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest `active()` ever observed.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Total permits ever granted.
    pub fn admitted(&self) -> usize {
        self.inner.admitted.load(Ordering::SeqCst)
    }
}
