//! Upsert/train coordinator
//!
//! Counts upserts across all workers and decides when the shared index should
//! be retrained. The read-increment-reset runs under one mutex, so each
//! threshold crossing hands `TrainNow` to exactly one caller.

use std::sync::Mutex;
use tracing::debug;

/// Outcome of recording a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainDecision {
    /// This caller crossed the threshold and must issue the train call
    TrainNow,
    NoOp,
}

pub struct TrainCoordinator {
    threshold: u64,
    upserts: Mutex<u64>,
}

impl TrainCoordinator {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            upserts: Mutex::new(0),
        }
    }

    /// Add `n` upserted records to the shared count
    ///
    /// Resets the count to zero when it reaches the threshold. The train call
    /// itself happens outside the lock; its failure does not restore the count.
    pub fn record_upserts(&self, n: usize) -> TrainDecision {
        // A poisoned lock still holds a valid count.
        let mut upserts = self.upserts.lock().unwrap_or_else(|e| e.into_inner());
        *upserts += n as u64;
        if *upserts >= self.threshold {
            debug!(upserts = *upserts, threshold = self.threshold, "Train threshold crossed");
            *upserts = 0;
            TrainDecision::TrainNow
        } else {
            TrainDecision::NoOp
        }
    }

    /// Current count since the last reset
    pub fn pending(&self) -> u64 {
        *self.upserts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}
