//! Admission gate bounding concurrent inferences

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ApplicationError;

/// Counting gate in front of the model runtime
///
/// Callers wait for a permit; the permit is released when dropped.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl AdmissionGate {
    /// Create a gate admitting at most `capacity` inferences (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a permit
    pub async fn admit(&self) -> Result<AdmissionPermit, ApplicationError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ApplicationError::Internal("admission gate closed".to_string()))?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(AdmissionPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Maximum concurrent inferences
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inferences currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// Held for the duration of one inference
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
