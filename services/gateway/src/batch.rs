//! Batch aggregation of converted readings.

/// Bounded buffer of converted values that flushes to an arithmetic mean.
///
/// The caller appends values and is expected to flush immediately after
/// the append that fills the batch, so the capacity-th value is included
/// in the mean and the buffer starts the next cycle empty.
#[derive(Debug)]
pub struct BatchAggregator {
    values: Vec<f64>,
    capacity: usize,
}

impl BatchAggregator {
    /// Create an aggregator with a fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one converted value.
    pub fn append(&mut self, value: f64) {
        self.values.push(value);
    }

    /// Whether the batch has reached capacity.
    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean of the buffered values, clearing the buffer.
    ///
    /// Returns `None` on an empty buffer rather than dividing by zero.
    pub fn flush(&mut self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let sum: f64 = self.values.iter().sum();
        let mean = sum / self.values.len() as f64;
        self.values.clear();
        Some(mean)
    }

    /// Discard all buffered values without producing a mean.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
