//! Bandwidth usage samples
//!
//! A fixed-capacity ring buffer of per-transfer byte counts, kept so the
//! daemon can report recent throughput without unbounded memory growth.
//! The oldest sample is dropped when the buffer is full.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use nimbus_core::domain::TransferDirection;

/// One recorded burst of traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSample {
    pub timestamp: DateTime<Utc>,
    pub direction: TransferDirection,
    pub bytes: u64,
}

/// Fixed-capacity history of recent usage samples
#[derive(Debug)]
pub struct UsageHistory {
    capacity: usize,
    samples: VecDeque<UsageSample>,
}

impl UsageHistory {
    /// Creates a history holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Records a sample, dropping the oldest when full
    pub fn record(&mut self, direction: TransferDirection, bytes: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(UsageSample {
            timestamp: Utc::now(),
            direction,
            bytes,
        });
    }

    /// Sum of recorded bytes for one direction
    pub fn total_bytes(&self, direction: TransferDirection) -> u64 {
        self.samples
            .iter()
            .filter(|s| s.direction == direction)
            .map(|s| s.bytes)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterates samples oldest first
    pub fn iter(&self) -> impl Iterator<Item = &UsageSample> {
        self.samples.iter()
    }
}

// ============================================================================
// Unit tests
// ============================================================================
