//! Aggregate upload bandwidth accounting.

use std::collections::VecDeque;

use crate::slot::SlotError;

/// Fixed-size rolling window of aggregate bandwidth samples plus a lifetime
/// session average.
#[derive(Debug, Clone)]
pub struct BandwidthWindow {
    samples: VecDeque<f32>,
    capacity: usize,
    average: f32,
    count: u64,
}

impl BandwidthWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            average: 0.0,
            count: 0,
        }
    }

    /// Push one aggregate sample, evicting the oldest when full.
    pub fn record(&mut self, total: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(total);

        let n = self.count as f32;
        self.average = (self.average * n + total) / (n + 1.0);
        self.count += 1;
    }

    /// Mean of the window.  Unavailable until the window has filled once.
    pub fn measured(&self) -> Result<f32, SlotError> {
        if self.samples.len() < self.capacity {
            return Err(SlotError::InsufficientData);
        }
        Ok(self.samples.iter().sum::<f32>() / self.samples.len() as f32)
    }

    /// Lifetime average.  Unavailable before the first sample.
    pub fn average(&self) -> Result<f32, SlotError> {
        if self.count == 0 {
            return Err(SlotError::InsufficientData);
        }
        Ok(self.average)
    }

    pub fn sample_count(&self) -> u64 {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the window size, keeping the newest samples.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }
}
